mod indexed;
mod matcher;

pub use indexed::{CandidateCache, IndexedMatcher};
pub use matcher::{NaiveMatcher, RuleMatch, RuleMatcher};
