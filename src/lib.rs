//! `request_limiter` spaces out outbound operations which share a rate limit.
//!
//! Wrap every call to a rate limited endpoint in a limiter. Calls sharing a
//! token never overlap and start no more often than the token's configured
//! rate allows:
//!
//! ```
//! use request_limiter::{RateTable, Result, TokenLimiter};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let rates = RateTable::new().with_rate("search-api", 2.0);
//!     let limiter = TokenLimiter::new(rates, "search-api", false);
//!
//!     for query in ["rust", "tokio", "serde"] {
//!         let permit = limiter.acquire().await?;
//!         println!("searching for {query}");
//!         drop(permit);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! When the rate limit applies per server, let a [`HostLimiter`] derive the
//! token from the URL you are about to request:
//!
//! ```
//! use request_limiter::{HostLimiter, RateTable, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let rates = RateTable::from_toml(r#""github.com" = "1s""#)?;
//!     let limiter = HostLimiter::new(rates, "https://github.com/lycheeverse/lychee", false);
//!
//!     let body = limiter.run(async { "<html>...</html>" }).await?;
//!     assert!(body.starts_with("<html>"));
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

mod types;

pub mod ratelimit;

pub use ratelimit::{HostLimiter, Permit, RateTable, Registry, Throttle, TokenLimiter, TokenStats};
pub use types::*;
