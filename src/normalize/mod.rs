//! Normalization of lipid intensities.
//!
//! Two strategies are provided behind the [`Normalizer`] trait:
//!
//! - **PQN**: Probabilistic quotient normalization against a median reference profile
//! - **ISTD**: Division by spiked internal standards, optionally class-matched
//!
//! Either may be followed by a log transform. The normalized matrix replaces
//! the chosen measure in a new [`Experiment`] snapshot, and a
//! [`NormalizationRecord`] is appended to its provenance.

pub mod istd;
pub mod pqn;

pub use istd::{InternalStandard, IstdSelector};
pub use pqn::{pqn_quotients, Pqn};

use std::collections::BTreeMap;

use crate::data::{Experiment, Provenance, SampleInfo};
use crate::error::{LipidError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Base of the optional log transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBase {
    /// Natural logarithm.
    #[default]
    Natural,
    /// Base-2 logarithm.
    Log2,
}

impl LogBase {
    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            LogBase::Natural => x.ln(),
            LogBase::Log2 => x.log2(),
        }
    }
}

/// Samples left out when building a reference profile.
///
/// Excluded samples are still normalized; they only do not contribute
/// to the reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcludeFilter {
    /// Use every sample.
    #[default]
    None,
    /// Exclude samples carrying this group label (e.g. blanks).
    Group(String),
    /// Exclude the listed sample IDs.
    Samples(Vec<String>),
}

impl ExcludeFilter {
    pub fn excludes(&self, sample: &SampleInfo) -> bool {
        match self {
            ExcludeFilter::None => false,
            ExcludeFilter::Group(label) => sample.in_group(label),
            ExcludeFilter::Samples(ids) => ids.iter().any(|id| id == &sample.sample_id),
        }
    }
}

/// Options shared by every normalization strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    /// Measure to normalize.
    pub measure: String,
    /// Samples kept out of the reference.
    pub exclude: ExcludeFilter,
    /// Log-transform after scaling.
    pub log_transform: bool,
    pub log_base: LogBase,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            measure: "Area".to_string(),
            exclude: ExcludeFilter::None,
            log_transform: true,
            log_base: LogBase::Natural,
        }
    }
}

impl NormalizeOptions {
    pub fn new(measure: &str) -> Self {
        Self {
            measure: measure.to_string(),
            ..Default::default()
        }
    }

    pub fn exclude(mut self, filter: ExcludeFilter) -> Self {
        self.exclude = filter;
        self
    }

    /// Skip the log transform.
    pub fn linear(mut self) -> Self {
        self.log_transform = false;
        self
    }

    pub fn log_base(mut self, base: LogBase) -> Self {
        self.log_transform = true;
        self.log_base = base;
        self
    }
}

/// Description of a normalization, stored in experiment provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationRecord {
    /// Strategy name (`pqn` or `istd`).
    pub method: String,
    /// Measure that was normalized.
    pub measure: String,
    /// Samples kept out of the reference.
    pub excluded_samples: Vec<String>,
    pub log_transform: bool,
    pub log_base: LogBase,
    /// Per-sample scaling factor: the PQN quotient, or the mean of all
    /// internal standards.
    pub factors: Vec<f64>,
    /// Per-sample factors of class-matched standards, keyed by lipid class.
    /// Lipids of these classes were scaled by these instead of `factors`.
    #[serde(default)]
    pub class_factors: BTreeMap<String, Vec<f64>>,
}

/// A normalization strategy.
pub trait Normalizer: Send + Sync {
    /// Short name recorded in provenance.
    fn name(&self) -> &'static str;

    /// Normalize one measure, returning a new experiment snapshot.
    fn normalize(&self, exp: &Experiment, options: &NormalizeOptions) -> Result<Experiment>;
}

/// Configurable normalization method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum NormalizationMethod {
    /// Probabilistic quotient normalization.
    Pqn,
    /// Internal standard normalization.
    Istd {
        #[serde(default)]
        selector: IstdSelector,
        #[serde(default = "default_match_class")]
        match_class: bool,
    },
}

fn default_match_class() -> bool {
    true
}

impl Default for NormalizationMethod {
    fn default() -> Self {
        NormalizationMethod::Pqn
    }
}

impl NormalizationMethod {
    /// Build the strategy this method names.
    pub fn build(&self) -> Result<Box<dyn Normalizer>> {
        Ok(match self {
            NormalizationMethod::Pqn => Box::new(Pqn),
            NormalizationMethod::Istd {
                selector,
                match_class,
            } => Box::new(InternalStandard::new(selector.clone())?.match_class(*match_class)),
        })
    }
}

/// Normalize with the configured method.
pub fn normalize(
    exp: &Experiment,
    method: &NormalizationMethod,
    options: &NormalizeOptions,
) -> Result<Experiment> {
    method.build()?.normalize(exp, options)
}

/// Sample IDs the filter excludes, in experiment order.
pub(crate) fn excluded_ids(exp: &Experiment, filter: &ExcludeFilter) -> Vec<String> {
    exp.samples()
        .iter()
        .filter(|s| filter.excludes(s))
        .map(|s| s.sample_id.clone())
        .collect()
}

/// Log-transform a matrix in place.
///
/// Missing values stay missing; non-positive values are rejected.
pub(crate) fn log_transform(exp: &Experiment, data: &mut DMatrix<f64>, base: LogBase) -> Result<()> {
    for i in 0..data.nrows() {
        for j in 0..data.ncols() {
            let v = data[(i, j)];
            if v.is_nan() {
                continue;
            }
            if v <= 0.0 || !v.is_finite() {
                return Err(LipidError::InvalidValue {
                    stage: "log transform".to_string(),
                    feature: exp.features()[i].molecule.clone(),
                    sample: exp.samples()[j].sample_id.clone(),
                    value: v,
                });
            }
            data[(i, j)] = base.apply(v);
        }
    }
    Ok(())
}

/// Finish a normalization: optional log transform, then a new snapshot with provenance.
pub(crate) fn finish(
    exp: &Experiment,
    mut data: DMatrix<f64>,
    method: &str,
    options: &NormalizeOptions,
    factors: Vec<f64>,
    class_factors: BTreeMap<String, Vec<f64>>,
) -> Result<Experiment> {
    if options.log_transform {
        log_transform(exp, &mut data, options.log_base)?;
    }
    let record = NormalizationRecord {
        method: method.to_string(),
        measure: options.measure.clone(),
        excluded_samples: excluded_ids(exp, &options.exclude),
        log_transform: options.log_transform,
        log_base: options.log_base,
        factors,
        class_factors,
    };
    exp.with_measure(&options.measure, data, Provenance::Normalized(record))
}
