mod error;
mod token;

pub use error::ErrorKind;
pub use token::Token;

/// The `request_limiter` `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
