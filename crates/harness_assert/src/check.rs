use harness_log::{Priority, PriorityLineBuffer};

use crate::exact::ExactMatch;
use crate::search::OccurrenceSearch;
use crate::section::Section;
use crate::verdict::Verdict;

/// One evaluator over a single stream of a buffer.
#[derive(Debug, Clone)]
pub enum Check {
    Exact(ExactMatch),
    Search(OccurrenceSearch),
    Section(Box<Section>),
}

impl Check {
    pub fn evaluate(&self, buffer: &PriorityLineBuffer, stream: Priority) -> Verdict {
        match self {
            Check::Exact(exact) => exact.evaluate(buffer, stream),
            Check::Search(search) => search.evaluate(buffer, stream),
            Check::Section(section) => section.evaluate(buffer, stream),
        }
    }
}

impl From<ExactMatch> for Check {
    fn from(exact: ExactMatch) -> Self {
        Check::Exact(exact)
    }
}

impl From<OccurrenceSearch> for Check {
    fn from(search: OccurrenceSearch) -> Self {
        Check::Search(search)
    }
}

impl From<Section> for Check {
    fn from(section: Section) -> Self {
        Check::Section(Box::new(section))
    }
}
