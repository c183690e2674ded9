//! Match engine: dictionary lookups for new source text.

mod engine;
mod lines;
mod newline;

pub use engine::{
    BatchSummary, Candidate, LineOutcome, MatchMode, MatchOptions, MatchResult, MatchStatus,
    Matcher, UnmatchedPolicy,
};
pub use lines::{Line, count_line_breaks, split_lines};
pub use newline::{NewlineMismatch, NewlineReport, adapt_line_count, newline_report};
