//! Branch configuration and execution.
//!
//! A pipeline is a set of independent branches (typically one per ion
//! mode). Each branch loads its own export and runs the full analysis, so
//! branches share nothing and run in parallel.

mod runner;

pub use runner::{
    run_and_write, run_branch, run_pipeline, BranchConfig, BranchReport, OplsDaSettings,
    PcaSettings, PipelineConfig, QcSettings, Stage, Thresholds,
};
