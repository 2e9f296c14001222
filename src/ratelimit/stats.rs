use std::time::Duration;
use tokio::time::Instant;

/// Record and report throttling statistics for a single [`crate::Token`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStats {
    /// Number of permits granted, i.e. operations allowed to start
    pub permits: u64,
    /// Number of permits which had to wait before being granted
    pub throttled: u64,
    /// Sum of all throttle waits
    pub total_wait: Duration,
    /// Longest single throttle wait
    pub max_wait: Duration,
    /// Time at which the last operation was recorded as started
    pub last_start: Option<Instant>,
}

impl TokenStats {
    /// Record a granted permit together with the time it had to wait
    pub(crate) fn record_wait(&mut self, wait: Duration) {
        self.permits += 1;
        if !wait.is_zero() {
            self.throttled += 1;
            self.total_wait += wait;
            self.max_wait = self.max_wait.max(wait);
        }
    }

    /// Average wait across all granted permits
    #[must_use]
    pub fn average_wait(&self) -> Duration {
        match u32::try_from(self.permits) {
            Ok(0) => Duration::ZERO,
            Ok(permits) => self.total_wait / permits,
            #[allow(clippy::cast_precision_loss)]
            Err(_) => self.total_wait.div_f64(self.permits as f64),
        }
    }

    /// Fraction of permits which had to wait, between 0.0 and 1.0
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throttle_rate(&self) -> f64 {
        if self.permits == 0 {
            0.0
        } else {
            self.throttled as f64 / self.permits as f64
        }
    }
}
