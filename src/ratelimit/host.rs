use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;

use super::{Permit, RateTable, Registry, Throttle, TokenLimiter};
use crate::{Result, Token};

/// A [`TokenLimiter`] whose token is the hostname of a URL.
///
/// The hostname is lowercased, so `https://Example.com/a` and
/// `http://example.com:8080/b` share the same limit. A host limiter and a
/// token limiter for the same hostname pace against each other.
///
/// If the URL cannot be parsed or has no host, the limiter is still created;
/// [`HostLimiter::acquire`] then fails with [`crate::ErrorKind::MissingToken`].
///
/// # Examples
///
/// ```
/// use request_limiter::{HostLimiter, RateTable};
///
/// # #[tokio::main]
/// # async fn main() -> request_limiter::Result<()> {
/// let rates = RateTable::new().with_rate("example.com", 5.0);
/// let limiter = HostLimiter::new(rates, "https://example.com/index.html", false);
/// assert_eq!(limiter.token().as_str(), "example.com");
///
/// let status = limiter.run(async { 200 }).await?;
/// assert_eq!(status, 200);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HostLimiter {
    inner: TokenLimiter,
}

impl HostLimiter {
    /// Create a limiter for the host of `url` using the process-wide
    /// [`Registry::global`]
    #[must_use]
    pub fn new(rates: impl Into<Arc<RateTable>>, url: impl AsRef<str>, debug: bool) -> Self {
        Self::with_registry(Registry::global().clone(), rates, url, debug)
    }

    /// Create a limiter for the host of `url` whose state lives in `registry`
    #[must_use]
    pub fn with_registry(
        registry: Registry,
        rates: impl Into<Arc<RateTable>>,
        url: impl AsRef<str>,
        debug: bool,
    ) -> Self {
        let token = Token::from_url(url.as_ref());
        Self {
            inner: TokenLimiter::with_registry(registry, rates, token, debug),
        }
    }

    /// The hostname this limiter paces, empty if the URL had none
    #[must_use]
    pub const fn token(&self) -> &Token {
        self.inner.token()
    }

    /// The limiter all calls are delegated to
    #[must_use]
    pub const fn as_token_limiter(&self) -> &TokenLimiter {
        &self.inner
    }

    /// See [`TokenLimiter::acquire`]
    ///
    /// # Errors
    ///
    /// Fails like [`TokenLimiter::acquire`].
    pub async fn acquire(&self) -> Result<Permit> {
        self.inner.acquire().await
    }

    /// See [`TokenLimiter::run`]
    ///
    /// # Errors
    ///
    /// Fails like [`TokenLimiter::acquire`].
    pub async fn run<F>(&self, operation: F) -> Result<F::Output>
    where
        F: IntoFuture,
    {
        self.inner.run(operation).await
    }
}

impl From<HostLimiter> for TokenLimiter {
    fn from(limiter: HostLimiter) -> Self {
        limiter.inner
    }
}

#[async_trait]
impl Throttle for HostLimiter {
    fn token(&self) -> &Token {
        self.inner.token()
    }

    async fn acquire(&self) -> Result<Permit> {
        self.inner.acquire().await
    }
}
