#![forbid(unsafe_code)]
//! Assertions over output captured by `harness_log`.
//!
//! Every evaluator reads one stream (a single priority) of a logger's
//! buffer and returns a [`Verdict`]:
//! - [`ExactMatch`]: the stream is exactly one expected line, or empty.
//! - [`OccurrenceSearch`]: a substring or regex occurs between `min` and
//!   `max` times, per line or across the whole stream.
//! - [`Section`]: line ranges between begin/end markers, each checked with a
//!   nested [`Check`].
//!
//! Malformed configuration is reported as [`AssertError`] when a check is
//! built; a failing assertion is a verdict, never an error.
//!
//! ```rust
//! use harness_assert::{Check, Matcher, OccurrenceSearch, Section};
//! use harness_log::{priority::STDOUT, PriorityLineBuffer};
//!
//! let output = PriorityLineBuffer::new();
//! output.append(STDOUT, "start A\nmid\nend B\nstart C\nend D");
//!
//! let inner = OccurrenceSearch::new(Matcher::substring("mid")?).bounds(1, Some(1))?;
//! let section = Section::builder().begin("start").end("end").build(inner.into())?;
//! assert!(Check::from(section).evaluate(&output, STDOUT).passed);
//! # Ok::<(), harness_assert::AssertError>(())
//! ```

mod check;
mod condition;
mod error;
mod exact;
mod search;
mod section;
mod verdict;

pub use check::Check;
pub use condition::{CheckSpec, LoggerSpec, OutputCondition, OutputConditionSpec, SectionSpec};
pub use error::AssertError;
pub use exact::ExactMatch;
pub use search::{Matcher, OccurrenceSearch};
pub use section::{Section, SectionBuilder};
pub use verdict::Verdict;
