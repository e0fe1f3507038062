use harness_log::UnknownStream;
use thiserror::Error;

/// Malformed assertion configuration. Failing assertions are [`crate::Verdict`]s, not errors.
#[derive(Debug, Error)]
pub enum AssertError {
    #[error("search pattern must not be empty")]
    EmptyPattern,
    #[error("invalid regular expression `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("occurrence bounds are inverted: min {min} > max {max}")]
    Bounds { min: usize, max: usize },
    #[error("repeat count must be at least 1")]
    ZeroRepeat,
    #[error("repeat count {repeat} requires both begin and end markers")]
    RepeatWithoutMarkers { repeat: usize },
    #[error("begin_after {skip} requires an end marker")]
    SkipWithoutEnd { skip: usize },
    #[error("greedy section requires an end marker")]
    GreedyWithoutEnd,
    #[error("greedy section cannot skip or repeat (begin_after {skip}, repeat {repeat})")]
    GreedyWithRepeat { skip: usize, repeat: usize },
    #[error(transparent)]
    UnknownStream(#[from] UnknownStream),
    #[error("condition declares more than one check: {checks}")]
    ConflictingChecks { checks: String },
    #[error("condition declares no check (expected one of exact, contains, regex, section)")]
    MissingCheck,
    #[error("`{option}` only applies to occurrence searches")]
    SearchOptionWithoutSearch { option: &'static str },
}
