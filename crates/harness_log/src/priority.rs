use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buffer::Priority;
use crate::error::ConfigError;

pub const DEBUG: Priority = 10;
pub const VERBOSE: Priority = 20;
pub const INFO: Priority = 30;
pub const STDOUT: Priority = 40;
pub const STDERR: Priority = 50;
pub const WARNING: Priority = 60;
pub const ERROR: Priority = 70;

/// Named priorities a condition may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Debug,
    Verbose,
    Info,
    Stdout,
    Stderr,
    Warning,
    Error,
}

impl Stream {
    pub const ALL: [Stream; 7] = [
        Stream::Debug,
        Stream::Verbose,
        Stream::Info,
        Stream::Stdout,
        Stream::Stderr,
        Stream::Warning,
        Stream::Error,
    ];

    pub fn priority(self) -> Priority {
        match self {
            Stream::Debug => DEBUG,
            Stream::Verbose => VERBOSE,
            Stream::Info => INFO,
            Stream::Stdout => STDOUT,
            Stream::Stderr => STDERR,
            Stream::Warning => WARNING,
            Stream::Error => ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Debug => "debug",
            Stream::Verbose => "verbose",
            Stream::Info => "info",
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
            Stream::Warning => "warning",
            Stream::Error => "error",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stream `{0}`")]
pub struct UnknownStream(pub String);

impl FromStr for Stream {
    type Err = UnknownStream;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        Stream::ALL
            .into_iter()
            .find(|stream| stream.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownStream(raw.to_string()))
    }
}

/// Maps the host engine's severity scale onto priorities.
///
/// Index `n` holds the priority for engine severity `n`; severities outside
/// the table clamp to the first or last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Priority>", into = "Vec<Priority>")]
pub struct SeverityMap {
    levels: Vec<Priority>,
}

impl Default for SeverityMap {
    fn default() -> Self {
        Self {
            levels: vec![ERROR, WARNING, INFO, VERBOSE, DEBUG],
        }
    }
}

impl SeverityMap {
    pub fn new(levels: Vec<Priority>) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::InvalidSeverityMap(
                "table must not be empty".to_string(),
            ));
        }
        let ascending = levels.windows(2).all(|pair| pair[0] <= pair[1]);
        let descending = levels.windows(2).all(|pair| pair[0] >= pair[1]);
        if !ascending && !descending {
            return Err(ConfigError::InvalidSeverityMap(format!(
                "table {levels:?} is not monotone"
            )));
        }
        Ok(Self { levels })
    }

    pub fn map(&self, severity: i32) -> Priority {
        let last = self.levels.len().saturating_sub(1);
        let idx = usize::try_from(severity).unwrap_or(0).min(last);
        self.levels.get(idx).copied().unwrap_or(INFO)
    }

    pub fn levels(&self) -> &[Priority] {
        &self.levels
    }
}

impl TryFrom<Vec<Priority>> for SeverityMap {
    type Error = ConfigError;

    fn try_from(levels: Vec<Priority>) -> Result<Self, Self::Error> {
        Self::new(levels)
    }
}

impl From<SeverityMap> for Vec<Priority> {
    fn from(map: SeverityMap) -> Self {
        map.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_is_total() {
        let map = SeverityMap::default();
        assert_eq!(map.map(0), ERROR);
        assert_eq!(map.map(2), INFO);
        assert_eq!(map.map(4), DEBUG);
        assert_eq!(map.map(-3), ERROR);
        assert_eq!(map.map(99), DEBUG);
    }

    #[test]
    fn rejects_non_monotone_tables() {
        assert!(SeverityMap::new(vec![]).is_err());
        assert!(SeverityMap::new(vec![10, 30, 20]).is_err());
        assert!(SeverityMap::new(vec![10, 10, 20]).is_ok());
    }

    #[test]
    fn stream_names_parse_case_insensitively() {
        assert_eq!("StdErr".parse::<Stream>(), Ok(Stream::Stderr));
        assert_eq!(Stream::Warning.priority(), WARNING);
        assert!("console".parse::<Stream>().is_err());
    }
}
