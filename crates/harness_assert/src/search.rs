use std::fmt;

use harness_log::{strip_ansi, Priority, PriorityLineBuffer, RenderOptions};
use regex::Regex;

use crate::error::AssertError;
use crate::verdict::Verdict;

/// What an occurrence search looks for.
#[derive(Debug, Clone)]
pub enum Matcher {
    Substring(String),
    Regex(Regex),
}

impl Matcher {
    pub fn substring(pattern: impl Into<String>) -> Result<Self, AssertError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(AssertError::EmptyPattern);
        }
        Ok(Matcher::Substring(pattern))
    }

    pub fn regex(pattern: &str) -> Result<Self, AssertError> {
        compile(pattern).map(Matcher::Regex)
    }

    /// Non-overlapping occurrences in `text`.
    fn count(&self, text: &str) -> usize {
        match self {
            Matcher::Substring(needle) => text.matches(needle.as_str()).count(),
            Matcher::Regex(pattern) => pattern.find_iter(text).count(),
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Substring(needle) => text.contains(needle.as_str()),
            Matcher::Regex(pattern) => pattern.is_match(text),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Substring(needle) => write!(f, "{needle:?}"),
            Matcher::Regex(pattern) => write!(f, "/{}/", pattern.as_str()),
        }
    }
}

pub(crate) fn compile(pattern: &str) -> Result<Regex, AssertError> {
    if pattern.is_empty() {
        return Err(AssertError::EmptyPattern);
    }
    Regex::new(pattern).map_err(|source| AssertError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Counts pattern occurrences in a stream and checks them against `[min, max]`.
///
/// Line mode applies the pattern to each line on its own, so `^` and `$`
/// anchor to line boundaries. Document mode joins the stream into one string
/// and tests for a single match, which allows patterns spanning lines.
#[derive(Debug, Clone)]
pub struct OccurrenceSearch {
    matcher: Matcher,
    min: usize,
    max: Option<usize>,
    document: bool,
    strip_ansi: bool,
}

impl OccurrenceSearch {
    /// At least one occurrence, line mode.
    pub fn new(matcher: Matcher) -> Self {
        Self {
            matcher,
            min: 1,
            max: None,
            document: false,
            strip_ansi: false,
        }
    }

    pub fn bounds(mut self, min: usize, max: Option<usize>) -> Result<Self, AssertError> {
        if let Some(max) = max {
            if min > max {
                return Err(AssertError::Bounds { min, max });
            }
        }
        self.min = min;
        self.max = max;
        Ok(self)
    }

    pub fn document(mut self, document: bool) -> Self {
        self.document = document;
        self
    }

    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn evaluate(&self, buffer: &PriorityLineBuffer, stream: Priority) -> Verdict {
        let count = if self.document {
            let text = buffer.render(&RenderOptions {
                strip_ansi: self.strip_ansi,
                ..RenderOptions::plain(stream, stream)
            });
            usize::from(self.matcher.is_match(&text))
        } else {
            buffer
                .snapshot(stream, stream)
                .map(|line| {
                    if self.strip_ansi {
                        self.matcher.count(&strip_ansi(line.text()))
                    } else {
                        self.matcher.count(line.text())
                    }
                })
                .sum()
        };

        let within = count >= self.min && self.max.map_or(true, |max| count <= max);
        let message = format!(
            "{} {} {count} time(s), expected {}",
            self.matcher,
            if self.document { "matched" } else { "found" },
            self.describe_bounds()
        );
        if within {
            Verdict::pass(message, count)
        } else {
            Verdict::fail(message, count)
        }
    }

    fn describe_bounds(&self) -> String {
        match self.max {
            Some(max) if max == self.min => format!("exactly {max}"),
            Some(max) => format!("{} to {max}", self.min),
            None => format!("at least {}", self.min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_log::priority::{STDERR, STDOUT};

    fn buffer(lines: &[&str]) -> PriorityLineBuffer {
        let buffer = PriorityLineBuffer::new();
        for line in lines {
            buffer.append(STDOUT, line);
        }
        buffer
    }

    #[test]
    fn counts_across_lines_within_bounds() {
        let output = buffer(&["abc", "xabcx", "abc"]);
        let search = OccurrenceSearch::new(Matcher::substring("abc").unwrap());

        let verdict = search.clone().bounds(2, Some(3)).unwrap().evaluate(&output, STDOUT);
        assert!(verdict.passed, "{verdict}");
        assert_eq!(verdict.occurrences, 3);

        let verdict = search.bounds(4, None).unwrap().evaluate(&output, STDOUT);
        assert!(!verdict.passed);
        assert_eq!(verdict.occurrences, 3);
    }

    #[test]
    fn occurrences_do_not_overlap() {
        let output = buffer(&["aaaa"]);
        let search = OccurrenceSearch::new(Matcher::substring("aa").unwrap());
        assert_eq!(search.evaluate(&output, STDOUT).occurrences, 2);
    }

    #[test]
    fn anchors_apply_per_line() {
        let output = buffer(&["abc", "xabcx", "abc"]);
        let search = OccurrenceSearch::new(Matcher::regex("^abc$").unwrap())
            .bounds(2, Some(2))
            .unwrap();
        assert!(search.evaluate(&output, STDOUT).passed);
    }

    #[test]
    fn document_mode_matches_across_lines_once() {
        let output = buffer(&["begin", "middle", "end"]);
        let search =
            OccurrenceSearch::new(Matcher::regex("(?s)begin.*end").unwrap()).document(true);
        let verdict = search.evaluate(&output, STDOUT);
        assert!(verdict.passed, "{verdict}");
        assert_eq!(verdict.occurrences, 1);

        let lines_only = OccurrenceSearch::new(Matcher::regex("(?s)begin.*end").unwrap());
        assert!(!lines_only.evaluate(&output, STDOUT).passed);
    }

    #[test]
    fn zero_minimum_accepts_absence() {
        let output = buffer(&["noise"]);
        let search = OccurrenceSearch::new(Matcher::substring("panic").unwrap())
            .bounds(0, Some(0))
            .unwrap();
        assert!(search.evaluate(&output, STDOUT).passed);
        assert!(search.evaluate(&output, STDERR).passed);
    }

    #[test]
    fn malformed_configuration_is_rejected() {
        assert!(matches!(Matcher::substring(""), Err(AssertError::EmptyPattern)));
        assert!(matches!(
            Matcher::regex("("),
            Err(AssertError::InvalidRegex { .. })
        ));
        let search = OccurrenceSearch::new(Matcher::substring("a").unwrap());
        assert!(matches!(
            search.bounds(3, Some(2)),
            Err(AssertError::Bounds { min: 3, max: 2 })
        ));
    }
}
