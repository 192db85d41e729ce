//! Collapsing duplicate transitions into one row per analyte.

mod transitions;

pub use transitions::{summarize_transitions, SummaryMethod};
