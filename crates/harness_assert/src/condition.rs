use harness_log::priority::{ERROR, INFO, WARNING};
use harness_log::{LoggerNode, LoggerRef, LoggerRegistry, Stream};
use serde::Deserialize;
use tracing::debug;

use crate::check::Check;
use crate::error::AssertError;
use crate::exact::ExactMatch;
use crate::search::{Matcher, OccurrenceSearch};
use crate::section::Section;
use crate::verdict::Verdict;

/// A check bound to a logger and one of its streams.
#[derive(Debug, Clone)]
pub struct OutputCondition {
    logger: LoggerRef,
    stream: Stream,
    check: Check,
    warning: bool,
}

impl OutputCondition {
    pub fn new(logger: LoggerRef, stream: Stream, check: impl Into<Check>) -> Self {
        Self {
            logger,
            stream,
            check: check.into(),
            warning: false,
        }
    }

    /// Report a failed verdict as a warning instead of an error.
    pub fn as_warning(mut self, warning: bool) -> Self {
        self.warning = warning;
        self
    }

    pub fn logger(&self) -> &LoggerRef {
        &self.logger
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn check(&self) -> &Check {
        &self.check
    }

    pub fn is_warning(&self) -> bool {
        self.warning
    }

    /// Runs the check against `node`'s buffer.
    pub fn evaluate_node(&self, node: &LoggerNode) -> Verdict {
        self.check
            .evaluate(node.buffer(), self.stream.priority())
            .context(format_args!("{} {}", node.full_name(), self.stream))
    }

    /// Resolves the logger from the current container and runs the check.
    /// An unresolvable logger is a failed verdict.
    pub fn evaluate(&self, registry: &LoggerRegistry) -> Verdict {
        let verdict = match registry.lookup(&self.logger) {
            Some(node) => self.evaluate_node(&node),
            None => Verdict::fail(format!("no logger `{}` in scope", self.logger), 0),
        };
        debug!(
            logger = %self.logger,
            stream = %self.stream,
            passed = verdict.passed,
            occurrences = verdict.occurrences,
            "{}",
            verdict.message
        );
        verdict
    }

    /// Evaluates, logs the verdict into `enclosing` and records a failed
    /// verdict as its failure.
    pub fn enforce(&self, registry: &LoggerRegistry, enclosing: &LoggerNode) -> Verdict {
        let verdict = self.evaluate(registry);
        let priority = match (verdict.passed, self.warning) {
            (true, _) => INFO,
            (false, true) => WARNING,
            (false, false) => ERROR,
        };
        enclosing.append_output(priority, &verdict.to_string());
        if let Some(failure) = verdict.clone().into_failure(self.warning) {
            enclosing.record_failure(failure);
        }
        verdict
    }
}

/// Logger address as written in configuration: a name or a non-zero ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LoggerSpec {
    Ordinal(i64),
    Name(String),
}

impl From<LoggerSpec> for LoggerRef {
    fn from(spec: LoggerSpec) -> Self {
        match spec {
            LoggerSpec::Ordinal(ordinal) if ordinal != 0 => LoggerRef::Ordinal(ordinal),
            LoggerSpec::Ordinal(ordinal) => LoggerRef::Name(ordinal.to_string()),
            LoggerSpec::Name(name) => match name.parse::<LoggerRef>() {
                Ok(logger) => logger,
                Err(never) => match never {},
            },
        }
    }
}

fn default_stream() -> String {
    Stream::Stdout.as_str().to_string()
}

fn one() -> usize {
    1
}

/// Deserializable form of an [`OutputCondition`].
///
/// ```toml
/// logger = "server"
/// stream = "stdout"
/// warning = false
///
/// [check]
/// regex = "^listening on"
/// min = 1
/// max = 1
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConditionSpec {
    pub logger: LoggerSpec,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default)]
    pub warning: bool,
    pub check: CheckSpec,
}

/// Exactly one of `exact`, `contains`, `regex` or `section` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckSpec {
    pub exact: Option<String>,
    pub contains: Option<String>,
    pub regex: Option<String>,
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub document: bool,
    pub strip_ansi: bool,
    pub section: Option<Box<SectionSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionSpec {
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub begin_after: usize,
    #[serde(default = "one")]
    pub repeat: usize,
    #[serde(default)]
    pub greedy: bool,
    pub check: CheckSpec,
}

impl CheckSpec {
    fn declared(&self) -> Vec<&'static str> {
        [
            ("exact", self.exact.is_some()),
            ("contains", self.contains.is_some()),
            ("regex", self.regex.is_some()),
            ("section", self.section.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    fn search_option(&self) -> Option<&'static str> {
        if self.min.is_some() {
            Some("min")
        } else if self.max.is_some() {
            Some("max")
        } else if self.document {
            Some("document")
        } else {
            None
        }
    }

    fn into_search(self, matcher: Matcher) -> Result<Check, AssertError> {
        let min = self
            .min
            .unwrap_or_else(|| self.max.map_or(1, |max| max.min(1)));
        let search = OccurrenceSearch::new(matcher)
            .bounds(min, self.max)?
            .document(self.document)
            .strip_ansi(self.strip_ansi);
        Ok(Check::Search(search))
    }
}

impl TryFrom<CheckSpec> for Check {
    type Error = AssertError;

    fn try_from(spec: CheckSpec) -> Result<Self, Self::Error> {
        let declared = spec.declared();
        if declared.len() > 1 {
            return Err(AssertError::ConflictingChecks {
                checks: declared.join(", "),
            });
        }
        match declared.first().copied() {
            Some("contains") | Some("regex") => {
                let matcher = match (&spec.contains, &spec.regex) {
                    (Some(needle), _) => Matcher::substring(needle.clone())?,
                    (_, Some(pattern)) => Matcher::regex(pattern)?,
                    (None, None) => return Err(AssertError::MissingCheck),
                };
                spec.into_search(matcher)
            }
            Some(_) => {
                if let Some(option) = spec.search_option() {
                    return Err(AssertError::SearchOptionWithoutSearch { option });
                }
                match (spec.exact, spec.section) {
                    (Some(expected), _) => Ok(Check::Exact(
                        ExactMatch::new(expected).strip_ansi(spec.strip_ansi),
                    )),
                    (None, Some(section)) => Section::try_from(*section).map(Check::from),
                    (None, None) => Err(AssertError::MissingCheck),
                }
            }
            None => Err(AssertError::MissingCheck),
        }
    }
}

impl TryFrom<SectionSpec> for Section {
    type Error = AssertError;

    fn try_from(spec: SectionSpec) -> Result<Self, Self::Error> {
        let mut builder = Section::builder()
            .skip(spec.begin_after)
            .repeat(spec.repeat)
            .greedy(spec.greedy);
        if let Some(begin) = spec.begin {
            builder = builder.begin(begin);
        }
        if let Some(end) = spec.end {
            builder = builder.end(end);
        }
        builder.build(Check::try_from(spec.check)?)
    }
}

impl TryFrom<OutputConditionSpec> for OutputCondition {
    type Error = AssertError;

    fn try_from(spec: OutputConditionSpec) -> Result<Self, Self::Error> {
        let stream: Stream = spec.stream.parse()?;
        let check = Check::try_from(spec.check)?;
        Ok(OutputCondition::new(spec.logger.into(), stream, check).as_warning(spec.warning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(raw: &str) -> Result<Check, AssertError> {
        let spec: CheckSpec = toml::from_str(raw).unwrap();
        Check::try_from(spec)
    }

    #[test]
    fn search_defaults_to_at_least_once() {
        let Check::Search(search) = check(r#"contains = "ready""#).unwrap() else {
            panic!("expected a search");
        };
        assert!(matches!(search.matcher(), Matcher::Substring(needle) if needle == "ready"));
    }

    #[test]
    fn conflicting_and_missing_checks_are_rejected() {
        let err = check("exact = \"a\"\nregex = \"b\"").unwrap_err();
        assert!(matches!(
            err,
            AssertError::ConflictingChecks { ref checks } if checks == "exact, regex"
        ));
        assert!(matches!(check(""), Err(AssertError::MissingCheck)));
        assert!(matches!(
            check("exact = \"a\"\nmin = 2"),
            Err(AssertError::SearchOptionWithoutSearch { option: "min" })
        ));
        assert!(matches!(
            check("contains = \"a\"\nmin = 3\nmax = 1"),
            Err(AssertError::Bounds { min: 3, max: 1 })
        ));
    }

    #[test]
    fn max_zero_implies_min_zero() {
        assert!(check("contains = \"panic\"\nmax = 0").is_ok());
    }

    #[test]
    fn logger_spec_accepts_ordinals_and_names() {
        assert_eq!(LoggerRef::from(LoggerSpec::Ordinal(-1)), LoggerRef::Ordinal(-1));
        assert_eq!(
            LoggerRef::from(LoggerSpec::Name("2".to_string())),
            LoggerRef::Ordinal(2)
        );
        assert_eq!(
            LoggerRef::from(LoggerSpec::Ordinal(0)),
            LoggerRef::Name("0".to_string())
        );
    }
}
