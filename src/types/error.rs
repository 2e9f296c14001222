use std::path::PathBuf;
use thiserror::Error;

use crate::Token;

/// Possible errors when interacting with `request_limiter`
///
/// None of these are transient; retrying the same acquisition with the same
/// configuration fails the same way.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The limiter was acquired without a token, e.g. because the URL
    /// given to a [`crate::HostLimiter`] had no hostname.
    #[error(
        "Token missing. Construct the limiter with a token, e.g. `TokenLimiter::new(rates, \"your token\", false)`"
    )]
    MissingToken,

    /// The rate table has no entry for the token
    #[error("No rate defined for token `{0}`")]
    UndefinedRate(Token),

    /// The configured rate is zero, negative, not a number, or so small that
    /// the interval between requests cannot be represented
    #[error("Invalid rate {rate} for token `{token}`: must be a positive number of requests per second")]
    InvalidRate {
        /// The token with the offending rate
        token: Token,
        /// The configured rate
        rate: f64,
    },

    /// A rate table file could not be read
    #[error("Failed to read rate table from `{}`: {}", .0.display(), .1)]
    ReadConfig(PathBuf, #[source] std::io::Error),

    /// A rate table could not be parsed
    #[error("Failed to parse rate table: {0}")]
    ParseConfig(#[from] toml::de::Error),
}

impl ErrorKind {
    /// Whether this error was caused by the rate configuration rather than
    /// by how the limiter was constructed
    #[must_use]
    pub const fn is_rate_error(&self) -> bool {
        matches!(self, Self::UndefinedRate(_) | Self::InvalidRate { .. })
    }
}
