use std::{fmt, str::FromStr, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

static LEAD_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^([+-]?\d+)\s*(ms|milliseconds?|s|secs?|seconds?|m|mins?|minutes?)?$",
    )
    .expect("lead time pattern is valid")
});

/// A lead time string that could not be understood
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid lead time {input:?}; expected a whole number with an optional unit such as `ms`, `s`, or `m`")]
pub struct InvalidLeadTime {
    input: String,
}

/// How long before a session expires to ask the user to re-authenticate
///
/// A lead time of zero disables the prompt. Values are accepted as a number of
/// milliseconds or as a string such as `"5m"`, `"30 secs"`, or `"1500"`.
/// Negative values are clamped to zero.
///
/// ```
/// use onetap_session::LeadTime;
///
/// let lead: LeadTime = "5m".parse()?;
/// assert_eq!(lead.as_millis(), 300_000);
/// # Ok::<(), onetap_session::InvalidLeadTime>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LeadTime(Duration);

impl LeadTime {
    /// No re-authentication prompt
    pub const DISABLED: Self = Self(Duration::ZERO);

    /// Constructs a lead time from a duration
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Constructs a lead time from a possibly negative count of milliseconds
    pub fn from_millis(millis: i64) -> Self {
        Self(Duration::from_millis(millis.max(0).unsigned_abs()))
    }

    /// Whether the re-authentication prompt is disabled
    pub fn is_disabled(self) -> bool {
        self.0.is_zero()
    }

    /// The lead time, or `None` if disabled
    pub fn duration(self) -> Option<Duration> {
        if self.is_disabled() {
            None
        } else {
            Some(self.0)
        }
    }

    /// The lead time in whole milliseconds
    pub fn as_millis(self) -> u128 {
        self.0.as_millis()
    }
}

impl Default for LeadTime {
    fn default() -> Self {
        Self(Duration::from_secs(5 * 60))
    }
}

impl fmt::Display for LeadTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

impl FromStr for LeadTime {
    type Err = InvalidLeadTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidLeadTime {
            input: s.to_owned(),
        };

        let captures = LEAD_TIME.captures(s.trim()).ok_or_else(invalid)?;
        let amount: i64 = captures[1].parse().map_err(|_| invalid())?;

        let unit_millis: i64 = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
            None => 1,
            Some(unit) if unit == "ms" || unit.starts_with("milli") => 1,
            Some(unit) if unit.starts_with('s') => 1_000,
            Some(_) => 60_000,
        };

        let millis = amount.checked_mul(unit_millis).ok_or_else(invalid)?;
        Ok(Self::from_millis(millis))
    }
}

impl<'de> Deserialize<'de> for LeadTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Self::from_millis(millis)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}
