//! Per-token and per-host request pacing.
//!
//! Operations sharing a token are serialized, and consecutive starts are
//! spaced by at least `1 / rate` seconds. There is no burst capacity: a
//! token with a rate of 2.0 starts at most one operation every 500ms.
//!
//! # Architecture
//!
//! - [`RateTable`]: Requests per second for each token
//! - [`Registry`]: Lock and last start time for each token, created on demand
//! - [`TokenLimiter`]: Paces operations on an explicitly given token
//! - [`HostLimiter`]: Paces operations on the hostname of a URL
//! - [`Permit`]: Held while an operation runs, records its start when dropped
//! - [`TokenStats`]: Statistics tracking for each token

mod config;
mod host;
mod limiter;
mod registry;
mod stats;

pub use config::RateTable;
pub use host::HostLimiter;
pub use limiter::{Permit, Throttle, TokenLimiter};
pub use registry::Registry;
pub use stats::TokenStats;
