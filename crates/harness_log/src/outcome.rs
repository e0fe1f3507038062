use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Fatal failure of the unit.
    Error,
    /// Non-fatal, assertion-style failure.
    Warning,
    /// The unit was deliberately not executed.
    SkippedByDirective,
    /// The unit did not match the selection pattern; no result is written.
    SkippedByPattern,
}

/// Failure captured for a unit. The first one reported for a node wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Warning,
            message: message.into(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::SkippedByDirective,
            message: message.into(),
        }
    }

    pub fn excluded(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::SkippedByPattern,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Skipped,
    Passed,
    Warning,
    Failed,
}

impl Outcome {
    /// Maps a captured failure onto the outcome written for the node.
    /// `None` means the result is suppressed entirely.
    pub fn from_failure(failure: Option<&Failure>) -> Option<(Outcome, String)> {
        let Some(failure) = failure else {
            return Some((Outcome::Passed, String::new()));
        };
        let outcome = match failure.kind {
            FailureKind::SkippedByPattern => return None,
            FailureKind::SkippedByDirective => Outcome::Skipped,
            FailureKind::Warning => Outcome::Warning,
            FailureKind::Error => Outcome::Failed,
        };
        Some((outcome, failure.message.clone()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::Passed => "passed",
            Outcome::Warning => "warning",
            Outcome::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_follows_failure_kind() {
        assert_eq!(
            Outcome::from_failure(None),
            Some((Outcome::Passed, String::new()))
        );
        assert_eq!(
            Outcome::from_failure(Some(&Failure::warning("soft"))),
            Some((Outcome::Warning, "soft".to_string()))
        );
        assert_eq!(
            Outcome::from_failure(Some(&Failure::error("boom"))).map(|(o, _)| o),
            Some(Outcome::Failed)
        );
        assert_eq!(
            Outcome::from_failure(Some(&Failure::skipped("off"))).map(|(o, _)| o),
            Some(Outcome::Skipped)
        );
        assert_eq!(Outcome::from_failure(Some(&Failure::excluded("filtered"))), None);
    }
}
