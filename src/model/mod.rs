//! Statistical models for two-group differential testing.

pub mod ebayes;
pub mod lm;
pub mod special;

pub use ebayes::{fit_f_dist, squeeze_var, SqueezedVar, VariancePrior};
pub use lm::{model_groups, LmFit, LmFitSingle, MIN_GROUP_SIZE};
