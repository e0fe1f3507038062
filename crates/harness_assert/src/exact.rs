use harness_log::{strip_ansi, Priority, PriorityLineBuffer};

use crate::verdict::Verdict;

/// Passes when the stream holds exactly one line equal to `expected`, or
/// when both are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactMatch {
    expected: String,
    strip_ansi: bool,
}

impl ExactMatch {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            strip_ansi: false,
        }
    }

    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn evaluate(&self, buffer: &PriorityLineBuffer, stream: Priority) -> Verdict {
        let lines: Vec<String> = buffer
            .snapshot(stream, stream)
            .map(|line| {
                if self.strip_ansi {
                    strip_ansi(line.text()).into_owned()
                } else {
                    line.text().to_string()
                }
            })
            .collect();

        match lines.as_slice() {
            [] if self.expected.is_empty() => Verdict::pass("no output, as expected", 0),
            [] => Verdict::fail(format!("expected {:?}, found no output", self.expected), 0),
            [only] if *only == self.expected => {
                Verdict::pass(format!("found exactly {:?}", self.expected), 1)
            }
            [only] => Verdict::fail(
                format!("expected {:?}, found {only:?}", self.expected),
                0,
            ),
            many => Verdict::fail(
                format!(
                    "expected exactly one line {:?}, found {} lines",
                    self.expected,
                    many.len()
                ),
                0,
            ),
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
    fn single_matching_line_passes() {
        let verdict = ExactMatch::new("hello").evaluate(&buffer(&["hello"]), STDOUT);
        assert!(verdict.passed, "{verdict}");
        assert_eq!(verdict.occurrences, 1);
    }

    #[test]
    fn two_lines_never_match() {
        let verdict = ExactMatch::new("hello").evaluate(&buffer(&["hello", "hello"]), STDOUT);
        assert!(!verdict.passed);
        assert!(verdict.message.contains("found 2 lines"));
    }

    #[test]
    fn empty_expectation_matches_empty_stream() {
        let output = buffer(&["on stdout"]);
        assert!(ExactMatch::new("").evaluate(&output, STDERR).passed);
        assert!(!ExactMatch::new("").evaluate(&output, STDOUT).passed);
        assert!(!ExactMatch::new("x").evaluate(&output, STDERR).passed);
    }

    #[test]
    fn ansi_codes_are_stripped_on_request() {
        let output = buffer(&["\u{1b}[31mred\u{1b}[0m"]);
        assert!(!ExactMatch::new("red").evaluate(&output, STDOUT).passed);
        assert!(ExactMatch::new("red")
            .strip_ansi(true)
            .evaluate(&output, STDOUT)
            .passed);
    }
}
