use std::{fmt, str::FromStr, time::Duration};

/// Block production scheduling: either the producer never fires on a
/// timer (only on explicit force) or it fires every fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBetweenBlocks {
    /// The producer only runs when forced (e.g. by a full tx pool).
    Never,
    /// The producer runs on a fixed interval.
    Every(Duration),
}

impl fmt::Display for TimeBetweenBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Every(d) => write!(f, "{}", humantime::format_duration(*d)),
        }
    }
}

impl FromStr for TimeBetweenBlocks {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("never") {
            return Ok(Self::Never);
        }
        humantime::parse_duration(s).map(Self::Every).map_err(|err| err.to_string())
    }
}

impl serde::Serialize for TimeBetweenBlocks {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for TimeBetweenBlocks {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
