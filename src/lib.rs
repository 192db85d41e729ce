//! Composable Lipidomics Library
//!
//! This library provides modular primitives for the analysis of untargeted
//! lipidomics exports: wide intensity tables with one row per molecule and
//! one column per sample.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (Experiment, SampleAnnotation, Results)
//! - **qc**: Quality-control profiling (total intensity, CV)
//! - **summarize**: Collapsing duplicate transitions
//! - **normalize**: Normalization methods (PQN, internal standards)
//! - **mva**: Multivariate analysis (PCA, OPLS-DA)
//! - **model**: Per-feature linear models and empirical Bayes variance moderation
//! - **test**: Moderated t-tests
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **enrich**: Lipid set enrichment
//! - **pipeline**: Branch configuration and execution
//!
//! # Example
//!
//! ```no_run
//! use composable_lipidomics::prelude::*;
//!
//! // Load and annotate
//! let annotation = SampleAnnotation::from_csv("samples.csv").unwrap();
//! let exp = Experiment::from_csv("positive_mode.csv", "Area")
//!     .unwrap()
//!     .annotate(&annotation);
//!
//! // Normalize, then test KO against WT
//! let options = NormalizeOptions::new("Area").exclude(ExcludeFilter::Group("Blank".into()));
//! let exp = normalize(&exp, &NormalizationMethod::Pqn, &options).unwrap();
//! let results = differential_test(&exp, "Area", &Contrast::new("KO", "WT")).unwrap();
//!
//! for r in results.significant(0.05, 1.0) {
//!     println!("{}\t{:.2}\t{:.2e}", r.feature_id, r.log_fc, r.adj_p_value);
//! }
//! ```

pub mod correct;
pub mod data;
pub mod enrich;
pub mod error;
pub mod model;
pub mod mva;
pub mod normalize;
pub mod pipeline;
pub mod qc;
pub mod summarize;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::{correct_bh, BhCorrected};
    pub use crate::data::{
        parse_molecule_name, Contrast, DeResult, DeResultSet, DeSummary, Experiment, FeatureInfo,
        Provenance, SampleAnnotation, SampleInfo,
    };
    pub use crate::enrich::{
        enrich, EnrichmentConfig, EnrichmentResult, EnrichmentResultSet, LipidSet, LipidSets,
        RankBy, SetKind,
    };
    pub use crate::error::{LipidError, Result};
    pub use crate::model::{model_groups, squeeze_var, LmFit, SqueezedVar, VariancePrior};
    pub use crate::mva::{opls_da, pca, MvaMethod, MvaResult, OplsDaConfig, PcaConfig};
    pub use crate::normalize::{
        normalize, ExcludeFilter, InternalStandard, IstdSelector, LogBase, NormalizationMethod,
        NormalizationRecord, NormalizeOptions, Normalizer, Pqn,
    };
    pub use crate::pipeline::{
        run_branch, run_pipeline, BranchConfig, BranchReport, PipelineConfig, Stage,
    };
    pub use crate::qc::{
        profile_cv, profile_total_intensity, CvProfile, SampleSelection, TotalIntensityProfile,
    };
    pub use crate::summarize::{summarize_transitions, SummaryMethod};
    pub use crate::test::{differential_test, test_moderated, ModeratedResult};
}
