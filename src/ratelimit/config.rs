use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{ErrorKind, Result, Token};

/// Maximum number of permitted request starts per second, keyed by token.
///
/// Limiters only ever read from a rate table. Values are not validated when
/// the table is built: a zero or negative rate is reported as
/// [`ErrorKind::InvalidRate`] when a limiter for that token is acquired.
///
/// In TOML every entry is either a number of requests per second or a
/// [humantime](https://docs.rs/humantime) interval between requests:
///
/// ```
/// use request_limiter::RateTable;
///
/// let rates = RateTable::from_toml(
///     r#"
///     "api.github.com" = 2.5
///     "example.com" = "500ms"
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(rates.get("api.github.com"), Some(2.5));
/// assert_eq!(rates.get("example.com"), Some(2.0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(#[serde(deserialize_with = "deserialize_rates")] HashMap<Token, f64>);

impl RateTable {
    /// Create an empty rate table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rate for `token`, builder style
    #[must_use]
    pub fn with_rate(mut self, token: impl Into<Token>, rate: f64) -> Self {
        self.insert(token, rate);
        self
    }

    /// Add or replace the rate for `token`, returning the previous rate
    pub fn insert(&mut self, token: impl Into<Token>, rate: f64) -> Option<f64> {
        self.0.insert(token.into(), rate)
    }

    /// Requests per second configured for `token`
    #[must_use]
    pub fn get(&self, token: impl AsRef<str>) -> Option<f64> {
        self.0.get(token.as_ref()).copied()
    }

    /// Number of configured tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no rates are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all configured tokens and their rates
    pub fn iter(&self) -> impl Iterator<Item = (&Token, f64)> {
        self.0.iter().map(|(token, rate)| (token, *rate))
    }

    /// Parse a rate table from TOML
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ParseConfig`] if the input is not a TOML table of
    /// numbers and interval strings, or if an interval is zero.
    pub fn from_toml(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Read a rate table from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ReadConfig`] if the file cannot be read and
    /// [`ErrorKind::ParseConfig`] if its content is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::ReadConfig(path.to_path_buf(), e))?;
        Self::from_toml(&content)
    }
}

impl FromStr for RateTable {
    type Err = ErrorKind;

    fn from_str(input: &str) -> Result<Self> {
        Self::from_toml(input)
    }
}

impl From<HashMap<Token, f64>> for RateTable {
    fn from(rates: HashMap<Token, f64>) -> Self {
        Self(rates)
    }
}

impl<T: Into<Token>> FromIterator<(T, f64)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (T, f64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(token, rate)| (token.into(), rate))
                .collect(),
        )
    }
}

/// A single rate table entry as written in TOML
#[derive(Deserialize)]
#[serde(untagged)]
enum RateEntry {
    PerSecond(f64),
    Interval(String),
}

impl RateEntry {
    fn into_rate<E: serde::de::Error>(self) -> std::result::Result<f64, E> {
        match self {
            Self::PerSecond(rate) => Ok(rate),
            Self::Interval(input) => {
                let interval: Duration = input
                    .parse::<humantime::Duration>()
                    .map_err(|e| E::custom(format!("Invalid interval '{input}': {e}")))?
                    .into();
                if interval.is_zero() {
                    return Err(E::custom(format!("Interval '{input}' must not be zero")));
                }
                Ok(1.0 / interval.as_secs_f64())
            }
        }
    }
}

/// Custom deserializer for rates given either per second or as an interval
fn deserialize_rates<'de, D>(deserializer: D) -> std::result::Result<HashMap<Token, f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    HashMap::<Token, RateEntry>::deserialize(deserializer)?
        .into_iter()
        .map(|(token, entry)| Ok((token, entry.into_rate::<D::Error>()?)))
        .collect()
}
