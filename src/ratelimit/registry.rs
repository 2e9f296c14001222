use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use super::TokenStats;
use crate::Token;

/// Registry shared by every limiter which does not bring its own
static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Lock and bookkeeping for a single token
#[derive(Debug, Default)]
pub(crate) struct TokenState {
    /// Held for the whole in-flight window of a permit.
    /// Guards the start time of the most recent operation, `None` if no
    /// operation was started yet.
    pub(crate) last_start: Arc<AsyncMutex<Option<Instant>>>,

    /// Snapshot of what happened on this token so far
    stats: Mutex<TokenStats>,
}

impl TokenState {
    /// Statistics are plain counters, so a panic while they were locked
    /// cannot leave them in a state worth refusing to read.
    pub(crate) fn stats(&self) -> MutexGuard<'_, TokenStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps every [`Token`] to its lock and last start time.
///
/// Token state is created on first use and kept for as long as the registry
/// lives. Limiters referring to the same token through the same registry
/// serialize and pace against each other; limiters using different
/// registries never interact.
///
/// Cloning a `Registry` is cheap and yields a handle to the same state.
///
/// # Examples
///
/// ```
/// use request_limiter::{RateTable, Registry, TokenLimiter};
///
/// # #[tokio::main]
/// # async fn main() -> request_limiter::Result<()> {
/// let registry = Registry::new();
/// let rates = RateTable::new().with_rate("example.com", 10.0);
/// let limiter = TokenLimiter::with_registry(registry.clone(), rates, "example.com", false);
///
/// limiter.run(async { /* talk to example.com */ }).await?;
///
/// assert_eq!(registry.active_token_count(), 1);
/// assert_eq!(registry.token_stats("example.com").permits, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tokens: Arc<DashMap<Token, Arc<TokenState>>>,
}

impl Registry {
    /// Create an empty registry, independent of [`Registry::global`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`crate::TokenLimiter::new`] and
    /// [`crate::HostLimiter::new`]
    #[must_use]
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Get the state for `token`, creating it if this is the first reference.
    ///
    /// Concurrent first references to the same token all receive the same state.
    pub(crate) fn state(&self, token: &Token) -> Arc<TokenState> {
        if let Some(state) = self.tokens.get(token) {
            return state.clone();
        }

        self.tokens
            .entry(token.clone())
            .or_insert_with(|| {
                log::trace!("[{token}]: creating rate limit state");
                Arc::default()
            })
            .clone()
    }

    /// Get statistics for a specific token
    ///
    /// Returns empty statistics for tokens which were never acquired.
    #[must_use]
    pub fn token_stats(&self, token: impl AsRef<str>) -> TokenStats {
        self.tokens
            .get(token.as_ref())
            .map(|state| *state.stats())
            .unwrap_or_default()
    }

    /// Get statistics for all tokens seen so far
    #[must_use]
    pub fn all_token_stats(&self) -> HashMap<Token, TokenStats> {
        self.tokens
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value().stats()))
            .collect()
    }

    /// Number of distinct tokens this registry has created state for
    #[must_use]
    pub fn active_token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Whether a permit for `token` is currently held, or its lock is
    /// held by an acquisition that is still waiting to be granted
    #[must_use]
    pub fn is_locked(&self, token: impl AsRef<str>) -> bool {
        self.tokens
            .get(token.as_ref())
            .is_some_and(|state| state.last_start.try_lock().is_err())
    }
}
