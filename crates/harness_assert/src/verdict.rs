use std::fmt;

use harness_log::Failure;
use serde::Serialize;

/// Outcome of evaluating one assertion against captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    /// What was searched for and what was found.
    pub message: String,
    pub occurrences: usize,
}

impl Verdict {
    pub fn pass(message: impl Into<String>, occurrences: usize) -> Self {
        Self {
            passed: true,
            message: message.into(),
            occurrences,
        }
    }

    pub fn fail(message: impl Into<String>, occurrences: usize) -> Self {
        Self {
            passed: false,
            message: message.into(),
            occurrences,
        }
    }

    /// Combines per-range verdicts; passes only when every part passed.
    pub fn all(parts: Vec<Verdict>) -> Self {
        let passed = parts.iter().all(|part| part.passed);
        let occurrences = parts.iter().map(|part| part.occurrences).sum();
        let message = match parts.len() {
            1 => parts.into_iter().map(|part| part.message).collect(),
            _ => parts
                .iter()
                .enumerate()
                .map(|(idx, part)| format!("[{}] {}", idx + 1, part.message))
                .collect::<Vec<_>>()
                .join("; "),
        };
        Self {
            passed,
            message,
            occurrences,
        }
    }

    /// Prefixes the message with where the assertion looked.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }

    /// The failure to record on the enclosing unit, if this verdict failed.
    pub fn into_failure(self, as_warning: bool) -> Option<Failure> {
        if self.passed {
            return None;
        }
        Some(if as_warning {
            Failure::warning(self.message)
        } else {
            Failure::error(self.message)
        })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "passed" } else { "failed" };
        write!(f, "{status}: {}", self.message)
    }
}
