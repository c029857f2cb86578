use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};

/// A duration that serialises to/from the human form used on the wire:
/// `"10s"`, `"500ms"`, `"1h30m"`. Zero serialises as the empty string, and
/// the empty string deserialises to zero, so a job created without a field
/// present round-trips cleanly through `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct KDuration(pub StdDuration);

impl KDuration {
    pub const ZERO: KDuration = KDuration(StdDuration::ZERO);

    pub fn as_std(&self) -> StdDuration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<StdDuration> for KDuration {
    fn from(d: StdDuration) -> Self {
        KDuration(d)
    }
}

impl From<KDuration> for StdDuration {
    fn from(d: KDuration) -> Self {
        d.0
    }
}

impl fmt::Display for KDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_zero() {
            write!(f, "")
        } else {
            write!(f, "{}", humantime::format_duration(self.0))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseKDurationError {
    #[error("invalid duration {0:?}: {1}")]
    Invalid(String, humantime::DurationError),
}

impl FromStr for KDuration {
    type Err = ParseKDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(KDuration::ZERO);
        }
        humantime::parse_duration(s)
            .map(KDuration)
            .map_err(|e| ParseKDurationError::Invalid(s.to_owned(), e))
    }
}

impl Serialize for KDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct KDurationVisitor;

impl<'de> Visitor<'de> for KDurationVisitor {
    type Value = KDuration;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a duration string like \"10s\", \"500ms\" or \"\"")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        KDuration::from_str(s).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for KDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(KDurationVisitor)
    }
}
