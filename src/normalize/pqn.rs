//! Probabilistic quotient normalization (PQN).
//!
//! Corrects sample-wise dilution differences. A reference profile is built
//! as the per-feature median over the reference samples; each sample's
//! dilution factor is the median of its feature-wise quotients against that
//! reference:
//!
//! ```text
//! ref_i      = median_j(x_ij)            over non-excluded samples j
//! quotient_j = median_i(x_ij / ref_i)    over features with usable ref_i
//! x'_ij      = x_ij / quotient_j
//! ```
//!
//! # References
//!
//! Dieterle et al. (2006) "Probabilistic quotient normalization as robust
//! method to account for dilution of complex biological mixtures"
//! Analytical Chemistry 78:4281-4290

use super::{finish, NormalizeOptions, Normalizer};
use crate::data::Experiment;
use crate::error::{LipidError, Result};
use crate::qc::median;
use log::{debug, info};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// PQN strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pqn;

impl Normalizer for Pqn {
    fn name(&self) -> &'static str {
        "pqn"
    }

    fn normalize(&self, exp: &Experiment, options: &NormalizeOptions) -> Result<Experiment> {
        let data = exp.measure(&options.measure)?;
        let quotients = pqn_quotients(exp, &options.measure, options)?;

        let mut normalized = data.clone();
        for (j, q) in quotients.iter().enumerate() {
            normalized.column_mut(j).iter_mut().for_each(|v| *v /= q);
        }

        info!(
            "PQN normalized '{}' ({} samples, {} excluded from reference)",
            options.measure,
            exp.n_samples(),
            super::excluded_ids(exp, &options.exclude).len()
        );
        finish(exp, normalized, self.name(), options, quotients, BTreeMap::new())
    }
}

/// Reference profile: per-feature median over the reference samples.
fn reference_profile(data: &DMatrix<f64>, columns: &[usize]) -> Vec<f64> {
    (0..data.nrows())
        .map(|i| {
            let values: Vec<f64> = columns.iter().map(|&j| data[(i, j)]).collect();
            median(&values)
        })
        .collect()
}

/// Compute the PQN dilution quotient of every sample.
///
/// Fails with `Numerical` when every sample is excluded from the reference,
/// no feature has a usable reference value, or a sample has no usable
/// quotient.
pub fn pqn_quotients(exp: &Experiment, measure: &str, options: &NormalizeOptions) -> Result<Vec<f64>> {
    let data = exp.measure(measure)?;
    let reference_cols: Vec<usize> = exp
        .samples()
        .iter()
        .enumerate()
        .filter(|(_, s)| !options.exclude.excludes(s))
        .map(|(j, _)| j)
        .collect();

    if reference_cols.is_empty() {
        return Err(LipidError::Numerical(
            "PQN reference is empty: every sample is excluded".to_string(),
        ));
    }

    let reference = reference_profile(data, &reference_cols);
    let usable: Vec<usize> = reference
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_finite() && **r != 0.0)
        .map(|(i, _)| i)
        .collect();
    if usable.is_empty() {
        return Err(LipidError::Numerical(
            "PQN reference has no finite non-zero feature".to_string(),
        ));
    }
    debug!(
        "PQN reference from {} samples, {} of {} features usable",
        reference_cols.len(),
        usable.len(),
        reference.len()
    );

    exp.samples()
        .iter()
        .enumerate()
        .map(|(j, sample)| {
            let ratios: Vec<f64> = usable.iter().map(|&i| data[(i, j)] / reference[i]).collect();
            let q = median(&ratios);
            if q.is_finite() && q > 0.0 {
                Ok(q)
            } else {
                Err(LipidError::Numerical(format!(
                    "PQN quotient for sample '{}' is {}",
                    sample.sample_id, q
                )))
            }
        })
        .collect()
}
