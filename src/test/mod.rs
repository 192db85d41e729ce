//! Statistical hypothesis testing for differential lipid abundance.

pub mod moderated;

pub use moderated::{differential_test, test_moderated, ModeratedResult, ModeratedResultSingle};
