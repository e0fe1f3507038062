use harness_log::{LogLine, Priority, PriorityLineBuffer};
use regex::Regex;
use tracing::debug;

use crate::check::Check;
use crate::error::AssertError;
use crate::search::compile;
use crate::verdict::Verdict;

/// Marker and count settings for a [`Section`], validated by [`SectionBuilder::build`].
#[derive(Debug, Clone)]
pub struct SectionBuilder {
    begin: Option<String>,
    end: Option<String>,
    skip: usize,
    repeat: usize,
    greedy: bool,
}

impl Default for SectionBuilder {
    fn default() -> Self {
        Self {
            begin: None,
            end: None,
            skip: 0,
            repeat: 1,
            greedy: false,
        }
    }
}

impl SectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regex for the first line of a range.
    pub fn begin(mut self, pattern: impl Into<String>) -> Self {
        self.begin = Some(pattern.into());
        self
    }

    /// Regex for the last line of a range.
    pub fn end(mut self, pattern: impl Into<String>) -> Self {
        self.end = Some(pattern.into());
        self
    }

    /// Number of begin/end pairs to discard before the first extracted range.
    pub fn skip(mut self, pairs: usize) -> Self {
        self.skip = pairs;
        self
    }

    /// Number of ranges to extract and check.
    pub fn repeat(mut self, ranges: usize) -> Self {
        self.repeat = ranges;
        self
    }

    /// Match the end marker on its last occurrence instead of its first.
    pub fn greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    pub fn build(self, check: Check) -> Result<Section, AssertError> {
        if self.repeat == 0 {
            return Err(AssertError::ZeroRepeat);
        }
        if self.repeat > 1 && (self.begin.is_none() || self.end.is_none()) {
            return Err(AssertError::RepeatWithoutMarkers {
                repeat: self.repeat,
            });
        }
        if self.skip > 0 && self.end.is_none() {
            return Err(AssertError::SkipWithoutEnd { skip: self.skip });
        }
        if self.greedy {
            if self.end.is_none() {
                return Err(AssertError::GreedyWithoutEnd);
            }
            if self.skip + self.repeat > 1 {
                return Err(AssertError::GreedyWithRepeat {
                    skip: self.skip,
                    repeat: self.repeat,
                });
            }
        }
        Ok(Section {
            begin: self.begin.as_deref().map(compile).transpose()?,
            end: self.end.as_deref().map(compile).transpose()?,
            skip: self.skip,
            repeat: self.repeat,
            greedy: self.greedy,
            check,
        })
    }
}

/// Extracts line ranges between begin and end markers and runs a nested
/// check against each of them. Markers are part of the range.
#[derive(Debug, Clone)]
pub struct Section {
    begin: Option<Regex>,
    end: Option<Regex>,
    skip: usize,
    repeat: usize,
    greedy: bool,
    check: Check,
}

impl Section {
    pub fn builder() -> SectionBuilder {
        SectionBuilder::new()
    }

    pub fn check(&self) -> &Check {
        &self.check
    }

    /// Ranges of `lines` selected by the markers, or a description of the
    /// marker that could not be found.
    pub fn extract(&self, lines: &[LogLine]) -> Result<Vec<Vec<LogLine>>, String> {
        let mut ranges = Vec::with_capacity(self.repeat);
        let mut cursor = 0;
        for pair in 0..self.skip + self.repeat {
            let start = match &self.begin {
                Some(begin) => find_from(lines, cursor, begin).ok_or_else(|| {
                    format!(
                        "begin marker /{}/ found only {pair} of {} time(s)",
                        begin.as_str(),
                        self.skip + self.repeat
                    )
                })?,
                None => cursor,
            };
            let end = match &self.end {
                Some(end) => {
                    let from = if self.begin.is_some() { start + 1 } else { start };
                    let found = if self.greedy {
                        rfind_from(lines, from, end)
                    } else {
                        find_from(lines, from, end)
                    };
                    found.ok_or_else(|| {
                        format!(
                            "end marker /{}/ not found after line {}",
                            end.as_str(),
                            start + 1
                        )
                    })?
                }
                None => lines.len().saturating_sub(1),
            };
            cursor = end + 1;
            if pair >= self.skip {
                ranges.push(lines.get(start..=end).map(<[LogLine]>::to_vec).unwrap_or_default());
            }
        }
        Ok(ranges)
    }

    pub fn evaluate(&self, buffer: &PriorityLineBuffer, stream: Priority) -> Verdict {
        let lines: Vec<LogLine> = buffer.snapshot(stream, stream).collect();
        let ranges = match self.extract(&lines) {
            Ok(ranges) => ranges,
            Err(missing) => return Verdict::fail(missing, 0),
        };
        debug!(ranges = ranges.len(), lines = lines.len(), "section extracted");
        let verdicts = ranges
            .into_iter()
            .map(|range| {
                self.check
                    .evaluate(&PriorityLineBuffer::from_lines(range), stream)
            })
            .collect();
        Verdict::all(verdicts)
    }
}

fn find_from(lines: &[LogLine], from: usize, pattern: &Regex) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, line)| pattern.is_match(line.text()))
        .map(|(idx, _)| idx)
}

fn rfind_from(lines: &[LogLine], from: usize, pattern: &Regex) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(from)
        .rev()
        .find(|(_, line)| pattern.is_match(line.text()))
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exact::ExactMatch;
    use harness_log::priority::STDOUT;

    fn lines(texts: &[&str]) -> Vec<LogLine> {
        texts.iter().map(|text| LogLine::new(STDOUT, *text)).collect()
    }

    fn texts(range: &[LogLine]) -> Vec<&str> {
        range.iter().map(LogLine::text).collect()
    }

    fn any() -> Check {
        Check::Exact(ExactMatch::new(""))
    }

    const SAMPLE: [&str; 5] = ["start A", "mid", "end B", "start C", "end D"];

    #[test]
    fn extracts_first_pair_inclusive() {
        let section = Section::builder().begin("start").end("end").build(any()).unwrap();
        let ranges = section.extract(&lines(&SAMPLE)).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(texts(&ranges[0]), vec!["start A", "mid", "end B"]);
    }

    #[test]
    fn skips_leading_pairs() {
        let section = Section::builder()
            .begin("start")
            .end("end")
            .skip(1)
            .build(any())
            .unwrap();
        let ranges = section.extract(&lines(&SAMPLE)).unwrap();
        assert_eq!(texts(&ranges[0]), vec!["start C", "end D"]);
    }

    #[test]
    fn repeats_over_consecutive_pairs() {
        let section = Section::builder()
            .begin("start")
            .end("end")
            .repeat(2)
            .build(any())
            .unwrap();
        let ranges = section.extract(&lines(&SAMPLE)).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(texts(&ranges[1]), vec!["start C", "end D"]);

        let too_many = Section::builder()
            .begin("start")
            .end("end")
            .repeat(3)
            .build(any())
            .unwrap();
        let missing = too_many.extract(&lines(&SAMPLE)).unwrap_err();
        assert!(missing.contains("found only 2 of 3"), "{missing}");
    }

    #[test]
    fn greedy_end_takes_last_marker() {
        let section = Section::builder()
            .begin("start")
            .end("end")
            .greedy(true)
            .build(any())
            .unwrap();
        let ranges = section.extract(&lines(&SAMPLE)).unwrap();
        assert_eq!(texts(&ranges[0]), SAMPLE.to_vec());
    }

    #[test]
    fn open_markers_run_to_the_edges() {
        let to_end = Section::builder().begin("start C").build(any()).unwrap();
        assert_eq!(
            texts(&to_end.extract(&lines(&SAMPLE)).unwrap()[0]),
            vec!["start C", "end D"]
        );

        let from_start = Section::builder().end("mid").build(any()).unwrap();
        assert_eq!(
            texts(&from_start.extract(&lines(&SAMPLE)).unwrap()[0]),
            vec!["start A", "mid"]
        );
    }

    #[test]
    fn end_marker_on_begin_line_is_ignored() {
        let section = Section::builder().begin("x").end("x").build(any()).unwrap();
        let ranges = section.extract(&lines(&["x one", "y", "x two"])).unwrap();
        assert_eq!(texts(&ranges[0]), vec!["x one", "y", "x two"]);
    }

    #[test]
    fn missing_end_marker_fails_the_verdict() {
        let buffer = PriorityLineBuffer::from_lines(lines(&["start A", "mid"]));
        let section = Section::builder().begin("start").end("end").build(any()).unwrap();
        let verdict = section.evaluate(&buffer, STDOUT);
        assert!(!verdict.passed);
        assert!(verdict.message.contains("end marker"), "{verdict}");
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        assert!(matches!(
            Section::builder().repeat(0).build(any()),
            Err(AssertError::ZeroRepeat)
        ));
        assert!(matches!(
            Section::builder().begin("a").repeat(2).build(any()),
            Err(AssertError::RepeatWithoutMarkers { repeat: 2 })
        ));
        assert!(matches!(
            Section::builder().begin("start").skip(1).build(any()),
            Err(AssertError::SkipWithoutEnd { skip: 1 })
        ));
        assert!(matches!(
            Section::builder().begin("a").greedy(true).build(any()),
            Err(AssertError::GreedyWithoutEnd)
        ));
        assert!(matches!(
            Section::builder()
                .begin("a")
                .end("b")
                .skip(1)
                .greedy(true)
                .build(any()),
            Err(AssertError::GreedyWithRepeat { skip: 1, repeat: 1 })
        ));
        assert!(matches!(
            Section::builder().begin("(").build(any()),
            Err(AssertError::InvalidRegex { .. })
        ));
    }
}
