use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use super::registry::TokenState;
use super::{RateTable, Registry};
use crate::{ErrorKind, Result, Token};

/// Scoped throttling around a single outbound operation.
///
/// Implemented by every limiter in this crate, so code can stay generic over
/// how the token was derived.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// The token this limiter paces
    fn token(&self) -> &Token;

    /// Wait until an operation on [`Throttle::token`] may start.
    ///
    /// The returned [`Permit`] must be kept alive for as long as the
    /// operation runs.
    async fn acquire(&self) -> Result<Permit>;
}

/// Limits how often operations sharing a [`Token`] may start.
///
/// Operations on the same token never overlap, and two consecutive starts
/// are at least `1 / rate` seconds apart, where `rate` is the token's entry
/// in the [`RateTable`]. Operations on different tokens do not affect each
/// other.
///
/// Constructing a limiter does not validate anything. Missing tokens and
/// missing or invalid rates are reported by [`TokenLimiter::acquire`].
///
/// # Examples
///
/// ```
/// use request_limiter::{RateTable, TokenLimiter};
///
/// # #[tokio::main]
/// # async fn main() -> request_limiter::Result<()> {
/// let rates = RateTable::new().with_rate("api.example.com", 2.0);
/// let limiter = TokenLimiter::new(rates, "api.example.com", false);
///
/// for page in 1..=3 {
///     let permit = limiter.acquire().await?;
///     // At most two pages per second are requested from api.example.com
///     println!("fetching page {page}");
///     drop(permit);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenLimiter {
    registry: Registry,
    rates: Arc<RateTable>,
    token: Token,
    debug: bool,
}

impl TokenLimiter {
    /// Create a limiter for `token` using the process-wide
    /// [`Registry::global`].
    ///
    /// If `debug` is set, every wait and every finished operation is
    /// reported on stderr.
    #[must_use]
    pub fn new(rates: impl Into<Arc<RateTable>>, token: impl Into<Token>, debug: bool) -> Self {
        Self::with_registry(Registry::global().clone(), rates, token, debug)
    }

    /// Create a limiter for `token` whose state lives in `registry`
    #[must_use]
    pub fn with_registry(
        registry: Registry,
        rates: impl Into<Arc<RateTable>>,
        token: impl Into<Token>,
        debug: bool,
    ) -> Self {
        Self {
            registry,
            rates: rates.into(),
            token: token.into(),
            debug,
        }
    }

    /// The token this limiter paces
    #[must_use]
    pub const fn token(&self) -> &Token {
        &self.token
    }

    /// The registry holding this limiter's state
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether waits and finished operations are reported on stderr
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    /// Wait until an operation on this limiter's token may start.
    ///
    /// This first waits for any other permit on the same token to be
    /// dropped, then sleeps until `1 / rate` seconds have passed since the
    /// previous operation started. Only the calling task is suspended.
    ///
    /// Dropping the returned future at any point releases everything it
    /// holds; no start time is recorded in that case.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::MissingToken`] if the token is empty. Nothing is
    ///   locked in that case.
    /// - [`ErrorKind::UndefinedRate`] if the rate table has no entry for
    ///   the token.
    /// - [`ErrorKind::InvalidRate`] if the rate is zero, negative or not a
    ///   number.
    ///
    /// Rate errors are detected once the token's lock is held; the lock is
    /// released again before the error is returned.
    pub async fn acquire(&self) -> Result<Permit> {
        if self.token.is_empty() {
            return Err(ErrorKind::MissingToken);
        }

        let state = self.registry.state(&self.token);
        let last_start = state.last_start.clone().lock_owned().await;

        let wait = self.wait_time(*last_start)?;
        self.report(&wait_message(&self.token, wait));
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        state.stats().record_wait(wait);
        Ok(Permit {
            token: self.token.clone(),
            debug: self.debug,
            waited: wait,
            state,
            last_start,
        })
    }

    /// Run `operation` as soon as this limiter permits it and return its
    /// output.
    ///
    /// The permit is released when `operation` completes, panics, or when
    /// the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Fails like [`TokenLimiter::acquire`], in which case `operation` is
    /// never polled.
    pub async fn run<F>(&self, operation: F) -> Result<F::Output>
    where
        F: IntoFuture,
    {
        let _permit = self.acquire().await?;
        Ok(operation.await)
    }

    /// Time left until the next operation may start
    fn wait_time(&self, last_start: Option<Instant>) -> Result<Duration> {
        let interval = self.interval()?;
        let Some(last_start) = last_start else {
            return Ok(Duration::ZERO);
        };
        let next_start = last_start
            .checked_add(interval)
            .ok_or_else(|| self.invalid_rate())?;
        Ok(next_start.saturating_duration_since(Instant::now()))
    }

    /// Minimum time between two starts on this token
    fn interval(&self) -> Result<Duration> {
        let rate = self
            .rates
            .get(&self.token)
            .ok_or_else(|| ErrorKind::UndefinedRate(self.token.clone()))?;

        if rate.is_nan() || rate <= 0.0 {
            return Err(self.invalid_rate());
        }
        Duration::try_from_secs_f64(rate.recip()).map_err(|_| self.invalid_rate())
    }

    fn invalid_rate(&self) -> ErrorKind {
        ErrorKind::InvalidRate {
            token: self.token.clone(),
            rate: self.rates.get(&self.token).unwrap_or(f64::NAN),
        }
    }

    fn report(&self, message: &str) {
        report(self.debug, message);
    }
}

#[async_trait]
impl Throttle for TokenLimiter {
    fn token(&self) -> &Token {
        &self.token
    }

    async fn acquire(&self) -> Result<Permit> {
        TokenLimiter::acquire(self).await
    }
}

/// Permission to run one operation on a token.
///
/// Dropping the permit marks the operation as finished: its start time is
/// recorded for pacing the next operation and the token is released. This
/// happens no matter how the scope holding the permit is left.
#[derive(Debug)]
#[must_use = "the token is released as soon as the permit is dropped"]
pub struct Permit {
    token: Token,
    debug: bool,
    waited: Duration,
    state: Arc<TokenState>,
    last_start: OwnedMutexGuard<Option<Instant>>,
}

impl Permit {
    /// The token this permit was granted for
    #[must_use]
    pub const fn token(&self) -> &Token {
        &self.token
    }

    /// How long the acquisition slept before granting this permit
    #[must_use]
    pub const fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        report(self.debug, &finished_message(&self.token));

        let now = Instant::now();
        *self.last_start = Some(now);
        self.state.stats().last_start = Some(now);
        // The lock itself is released when `last_start` is dropped
    }
}

/// Hand the message to the logger, and also print it to stderr in debug mode
fn report(debug: bool, message: &str) {
    log::debug!("{message}");
    if debug {
        eprintln!("{message}");
    }
}

fn wait_message(token: &Token, wait: Duration) -> String {
    format!(
        "[{token}]: wait {} sec before next request.",
        wait.as_secs_f64()
    )
}

fn finished_message(token: &Token) -> String {
    format!("[{token}]: request just finished.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn limiter(token: &str, rate: f64) -> TokenLimiter {
        let rates = RateTable::new().with_rate("a.com", rate);
        TokenLimiter::with_registry(Registry::new(), rates, token, false)
    }

    #[test]
    fn test_messages() {
        let token = Token::from("a.com");
        assert_eq!(
            wait_message(&token, Duration::ZERO),
            "[a.com]: wait 0 sec before next request."
        );
        assert_eq!(
            wait_message(&token, Duration::from_millis(500)),
            "[a.com]: wait 0.5 sec before next request."
        );
        assert_eq!(finished_message(&token), "[a.com]: request just finished.");
    }

    #[test]
    fn test_construction_does_not_touch_registry() {
        let limiter = limiter("", -1.0);
        assert_eq!(limiter.token().as_str(), "");
        assert!(!limiter.debug());
        assert_eq!(limiter.registry().active_token_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquisition_does_not_wait() {
        let limiter = limiter("a.com", 1.0);
        let start = Instant::now();

        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::ZERO);
        assert_eq!(permit.token().as_str(), "a.com");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquisition_waits_for_interval() {
        let limiter = limiter("a.com", 4.0);

        drop(limiter.acquire().await.unwrap());
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_accounts_for_elapsed_time() {
        let limiter = limiter("a.com", 1.0);

        drop(limiter.acquire().await.unwrap());
        tokio::time::advance(Duration::from_millis(400)).await;

        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_measured_from_release() {
        let limiter = limiter("a.com", 2.0);

        let permit = limiter.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        drop(permit);

        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let limiter = limiter("", 1.0);
        let result = limiter.acquire().await;

        assert!(matches!(result, Err(ErrorKind::MissingToken)));
        assert_eq!(limiter.registry().active_token_count(), 0);
    }

    #[tokio::test]
    async fn test_undefined_rate_releases_lock() {
        let limiter = limiter("b.com", 1.0);

        let result = limiter.acquire().await;
        assert!(matches!(result, Err(ErrorKind::UndefinedRate(token)) if token.as_str() == "b.com"));
        assert!(!limiter.registry().is_locked("b.com"));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-2.0)]
    #[case(f64::NAN)]
    #[case(f64::MIN_POSITIVE)]
    #[tokio::test]
    async fn test_invalid_rate_releases_lock(#[case] rate: f64) {
        let limiter = limiter("a.com", rate);

        let result = limiter.acquire().await;
        assert!(matches!(result, Err(ErrorKind::InvalidRate { .. })));
        assert!(!limiter.registry().is_locked("a.com"));
        assert_eq!(limiter.registry().token_stats("a.com").permits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_rate_never_waits() {
        let limiter = limiter("a.com", f64::INFINITY);

        drop(limiter.acquire().await.unwrap());
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_output_and_releases() {
        let limiter = limiter("a.com", 1.0);

        let output = limiter.run(async { 42 }).await.unwrap();
        assert_eq!(output, 42);
        assert!(!limiter.registry().is_locked("a.com"));

        let stats = limiter.registry().token_stats("a.com");
        assert_eq!(stats.permits, 1);
        assert!(stats.last_start.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_releases_when_operation_fails() {
        let limiter = limiter("a.com", 1.0);

        let output: Result<std::result::Result<(), &str>> =
            limiter.run(async { Err("connection refused") }).await;
        assert_eq!(output.unwrap(), Err("connection refused"));
        assert!(!limiter.registry().is_locked("a.com"));

        // The failed operation still counts for pacing
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_does_not_poll_operation_on_error() {
        let limiter = limiter("b.com", 1.0);
        let mut polled = false;

        let result = limiter.run(async { polled = true }).await;
        assert!(result.is_err());
        assert!(!polled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_throttle_releases_lock() {
        let limiter = limiter("a.com", 1.0);
        drop(limiter.acquire().await.unwrap());

        // Give up long before the one second interval has passed
        let result =
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(result.is_err());
        assert!(!limiter.registry().is_locked("a.com"));

        // No start was recorded by the cancelled attempt, so the first
        // interval still applies
        let permit = limiter.acquire().await.unwrap();
        assert_eq!(permit.waited(), Duration::from_millis(900));
        assert_eq!(limiter.registry().token_stats("a.com").permits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting_for_lock() {
        let limiter = limiter("a.com", 1.0);
        let permit = limiter.acquire().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), limiter.acquire()).await;
        assert!(result.is_err());

        // Still held by `permit` only
        assert!(limiter.registry().is_locked("a.com"));
        drop(permit);
        assert!(!limiter.registry().is_locked("a.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_trait() {
        async fn twice(throttle: &dyn Throttle) -> Duration {
            drop(throttle.acquire().await.unwrap());
            throttle.acquire().await.unwrap().waited()
        }

        let limiter = limiter("a.com", 2.0);
        assert_eq!(Throttle::token(&limiter).as_str(), "a.com");
        assert_eq!(twice(&limiter).await, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let limiter = limiter("a.com", 2.0);
        for _ in 0..3 {
            drop(limiter.acquire().await.unwrap());
        }

        let stats = limiter.registry().token_stats("a.com");
        assert_eq!(stats.permits, 3);
        assert_eq!(stats.throttled, 2);
        assert_eq!(stats.total_wait, Duration::from_secs(1));
        assert_eq!(stats.max_wait, Duration::from_millis(500));
    }

    /// Keeps every record passed to the `log` facade
    struct CaptureLogger(std::sync::Mutex<Vec<String>>);

    impl log::Log for CaptureLogger {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::Level::Debug
        }

        fn log(&self, record: &log::Record<'_>) {
            if let Ok(mut lines) = self.0.lock() {
                lines.push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger(std::sync::Mutex::new(Vec::new()));

    #[tokio::test(start_paused = true)]
    async fn test_debug_mode_still_logs() {
        // Only the first logger installed in this process is kept
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);

        let rates = RateTable::new().with_rate("logged.example", 2.0);
        let limiter = TokenLimiter::with_registry(Registry::new(), rates, "logged.example", true);
        drop(limiter.acquire().await.unwrap());
        drop(limiter.acquire().await.unwrap());

        let lines: Vec<String> = LOGGER
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("[logged.example]"))
            .cloned()
            .collect();
        assert_eq!(
            lines,
            vec![
                "[logged.example]: wait 0 sec before next request.",
                "[logged.example]: request just finished.",
                "[logged.example]: wait 0.5 sec before next request.",
                "[logged.example]: request just finished.",
            ]
        );
    }
}
