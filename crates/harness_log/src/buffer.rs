use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use regex::Regex;
use serde::Serialize;

/// Caller-assigned severity/channel tag of a captured line.
pub type Priority = i32;

/// One captured line of output. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    priority: Priority,
    text: Arc<str>,
}

impl LogLine {
    pub fn new(priority: Priority, text: impl Into<Arc<str>>) -> Self {
        Self {
            priority,
            text: text.into(),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Consecutive lines of equal priority joined with `\n`, as handed to result sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRun {
    pub priority: Priority,
    pub text: String,
}

/// Formatting knobs for [`PriorityLineBuffer::render`].
#[derive(Debug, Clone)]
pub struct RenderOptions<'a> {
    pub separator: &'a str,
    /// Written before every line; `None` writes `"<priority>: "`.
    pub prefix: Option<&'a str>,
    pub min: Priority,
    pub max: Priority,
    pub strip_ansi: bool,
}

impl Default for RenderOptions<'_> {
    fn default() -> Self {
        Self {
            separator: "\n",
            prefix: None,
            min: Priority::MIN,
            max: Priority::MAX,
            strip_ansi: false,
        }
    }
}

impl<'a> RenderOptions<'a> {
    /// Plain text of one priority band: no prefix, newline separated.
    pub fn plain(min: Priority, max: Priority) -> Self {
        Self {
            prefix: Some(""),
            min,
            max,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Lines {
    lines: Vec<LogLine>,
    min: Priority,
    max: Priority,
}

impl Lines {
    fn empty() -> Self {
        Self {
            lines: Vec::new(),
            min: Priority::MAX,
            max: Priority::MIN,
        }
    }

    fn push(&mut self, priority: Priority, text: &str) {
        self.min = self.min.min(priority);
        self.max = self.max.max(priority);
        self.lines.push(LogLine::new(priority, text));
    }
}

/// Append-only, thread-safe store of priority-tagged lines.
///
/// Readers never observe a partially appended call: every operation takes the
/// buffer lock once, and iteration works on a copy taken under that lock.
#[derive(Debug)]
pub struct PriorityLineBuffer {
    inner: Mutex<Lines>,
}

impl Default for PriorityLineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PriorityLineBuffer {
    fn clone(&self) -> Self {
        let guard = self.lock();
        Self {
            inner: Mutex::new(Lines {
                lines: guard.lines.clone(),
                min: guard.min,
                max: guard.max,
            }),
        }
    }
}

impl PriorityLineBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lines::empty()),
        }
    }

    /// Builds a buffer holding exactly `lines`, in order.
    pub fn from_lines(lines: impl IntoIterator<Item = LogLine>) -> Self {
        let mut inner = Lines::empty();
        for line in lines {
            inner.min = inner.min.min(line.priority);
            inner.max = inner.max.max(line.priority);
            inner.lines.push(line);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lines> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one line per line break in `text`. Leading and trailing breaks
    /// are dropped; `\r\n` counts as a single break.
    pub fn append(&self, priority: Priority, text: &str) {
        let parts = split_lines(text);
        if parts.is_empty() {
            return;
        }
        let mut guard = self.lock();
        for part in parts {
            guard.push(priority, part);
        }
    }

    /// Appends each line of `text` at `new_priority` unless an identical line
    /// already exists at `check_priority` (or at `new_priority`, so repeated
    /// merges stay idempotent). Returns the number of lines appended.
    pub fn merge_if_absent(
        &self,
        check_priority: Priority,
        new_priority: Priority,
        text: &str,
    ) -> usize {
        let parts = split_lines(text);
        if parts.is_empty() {
            return 0;
        }
        let mut guard = self.lock();
        let mut appended = 0;
        for part in parts {
            let present = guard.lines.iter().rev().any(|line| {
                (line.priority == check_priority || line.priority == new_priority)
                    && line.text() == part
            });
            if !present {
                guard.push(new_priority, part);
                appended += 1;
            }
        }
        appended
    }

    pub fn render(&self, options: &RenderOptions<'_>) -> String {
        let snapshot = self.snapshot(options.min, options.max);
        let mut out = String::new();
        for (idx, line) in snapshot.enumerate() {
            if idx > 0 {
                out.push_str(options.separator);
            }
            match options.prefix {
                Some(prefix) => out.push_str(prefix),
                None => {
                    out.push_str(&line.priority.to_string());
                    out.push_str(": ");
                }
            }
            if options.strip_ansi {
                out.push_str(&strip_ansi(line.text()));
            } else {
                out.push_str(line.text());
            }
        }
        out
    }

    /// Copies the current contents and yields the lines within `[min, max]`.
    /// Appends made after this call are not observed.
    pub fn snapshot(&self, min: Priority, max: Priority) -> Snapshot {
        let lines = self.lock().lines.clone();
        Snapshot {
            lines: lines.into_iter(),
            min,
            max,
        }
    }

    pub fn to_string_array(&self, min: Priority, max: Priority) -> Vec<String> {
        self.snapshot(min, max)
            .map(|line| line.text().to_string())
            .collect()
    }

    /// Coalesces consecutive lines of equal priority.
    pub fn runs(&self) -> Vec<OutputRun> {
        let guard = self.lock();
        let mut runs: Vec<OutputRun> = Vec::new();
        for line in &guard.lines {
            match runs.last_mut() {
                Some(run) if run.priority == line.priority => {
                    run.text.push('\n');
                    run.text.push_str(line.text());
                }
                _ => runs.push(OutputRun {
                    priority: line.priority,
                    text: line.text().to_string(),
                }),
            }
        }
        runs
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    /// Lowest priority ever appended; `Priority::MAX` when nothing was.
    pub fn min_priority(&self) -> Priority {
        self.lock().min
    }

    /// Highest priority ever appended; `Priority::MIN` when nothing was.
    pub fn max_priority(&self) -> Priority {
        self.lock().max
    }

    /// Drops every line. The observed priority range is kept.
    pub fn clear(&self) {
        self.lock().lines.clear();
    }
}

/// Point-in-time view produced by [`PriorityLineBuffer::snapshot`].
#[derive(Debug)]
pub struct Snapshot {
    lines: std::vec::IntoIter<LogLine>,
    min: Priority,
    max: Priority,
}

impl Iterator for Snapshot {
    type Item = LogLine;

    fn next(&mut self) -> Option<Self::Item> {
        let (min, max) = (self.min, self.max);
        self.lines
            .by_ref()
            .find(|line| line.priority >= min && line.priority <= max)
    }
}

fn is_separator(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{c}')
}

fn split_lines(text: &str) -> Vec<&str> {
    let trimmed = text.trim_matches(is_separator);
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut rest = trimmed;
    while let Some(idx) = rest.find(is_separator) {
        parts.push(&rest[..idx]);
        let width = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[idx + width..];
    }
    parts.push(rest);
    parts
}

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\x1b\[[0-9]*m").ok())
        .as_ref()
}

/// Removes `ESC [ <digits> m` colour sequences. Text without them is
/// returned borrowed.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    match ansi_pattern() {
        Some(pattern) => pattern.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}
