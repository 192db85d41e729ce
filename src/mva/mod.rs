//! Multivariate analysis: PCA and OPLS-DA.
//!
//! Both methods work on the samples × features view of one measure, with
//! features containing any missing value dropped beforehand.

pub mod oplsda;
pub mod pca;

pub use oplsda::{opls_da, OplsDaConfig};
pub use pca::{pca, PcaConfig};

use crate::data::{Contrast, Experiment};
use crate::error::{LipidError, Result};
use log::warn;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which multivariate method produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MvaMethod {
    Pca,
    OplsDa,
}

/// Scores and loadings of a multivariate model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MvaResult {
    pub method: MvaMethod,
    /// Samples in score-row order.
    pub sample_ids: Vec<String>,
    /// Group label per sample.
    pub groups: Vec<Option<String>>,
    /// Features in loading-row order (after dropping incomplete features).
    pub feature_ids: Vec<String>,
    /// Samples × components.
    #[serde(skip)]
    pub scores: DMatrix<f64>,
    /// Features × components.
    #[serde(skip)]
    pub loadings: DMatrix<f64>,
    /// Component labels (`PC1`, … or `p1`, `o1`, …).
    pub component_names: Vec<String>,
    /// Fraction of total X variance explained per component (R2X).
    pub explained_variance: Vec<f64>,
    /// Number of predictive components (leading columns).
    pub n_predictive: usize,
    /// Groups discriminated (OPLS-DA only).
    pub contrast: Option<Contrast>,
    /// Fraction of response variance explained (OPLS-DA only).
    pub r2y: Option<f64>,
    /// Variable importance in projection per feature (OPLS-DA only).
    pub vip: Option<Vec<f64>>,
}

impl MvaResult {
    pub fn n_components(&self) -> usize {
        self.component_names.len()
    }

    /// Score column for a component.
    pub fn component_scores(&self, component: usize) -> Option<Vec<f64>> {
        (component < self.scores.ncols()).then(|| self.scores.column(component).iter().copied().collect())
    }

    /// Write `sample_id, group, <components…>` rows.
    pub fn scores_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["sample_id".to_string(), "group".to_string()];
        header.extend(self.component_names.iter().cloned());
        writer.write_record(&header)?;
        for (i, id) in self.sample_ids.iter().enumerate() {
            let mut row = vec![id.clone(), self.groups[i].clone().unwrap_or_default()];
            row.extend(self.scores.row(i).iter().map(|v| format!("{:.6}", v)));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write `feature_id, <components…>[, VIP]` rows.
    pub fn loadings_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["feature_id".to_string()];
        header.extend(self.component_names.iter().cloned());
        if self.vip.is_some() {
            header.push("VIP".to_string());
        }
        writer.write_record(&header)?;
        for (i, id) in self.feature_ids.iter().enumerate() {
            let mut row = vec![id.clone()];
            row.extend(self.loadings.row(i).iter().map(|v| format!("{:.6}", v)));
            if let Some(vip) = &self.vip {
                row.push(format!("{:.6}", vip[i]));
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Samples × features matrix of complete features, centred and optionally
/// scaled to unit variance.
pub(crate) struct Prepared {
    pub x: DMatrix<f64>,
    pub feature_ids: Vec<String>,
}

/// Build the centred (optionally scaled) samples × features matrix for the
/// given sample columns.
///
/// Features with any non-finite value, or zero variance, are dropped.
pub(crate) fn prepare(exp: &Experiment, measure: &str, columns: &[usize], scale: bool) -> Result<Prepared> {
    let data = exp.measure(measure)?;
    let n = columns.len();
    if n < 2 {
        return Err(LipidError::InvalidParameter(format!(
            "multivariate analysis needs at least 2 samples, got {}",
            n
        )));
    }

    let mut kept: Vec<(usize, f64, f64)> = Vec::new();
    let mut incomplete = Vec::new();
    for i in 0..exp.n_features() {
        let values: Vec<f64> = columns.iter().map(|&j| data[(i, j)]).collect();
        if values.iter().any(|v| !v.is_finite()) {
            incomplete.push(exp.features()[i].molecule.as_str());
            continue;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt();
        if sd > 0.0 {
            kept.push((i, mean, sd));
        }
    }

    if !incomplete.is_empty() {
        warn!(
            "Dropped {} feature(s) with missing values from multivariate analysis: {:?}",
            incomplete.len(),
            incomplete
        );
    }
    if kept.is_empty() {
        return Err(LipidError::InvalidParameter(
            "no complete, non-constant feature for multivariate analysis".to_string(),
        ));
    }

    let x = DMatrix::from_fn(n, kept.len(), |r, c| {
        let (i, mean, sd) = kept[c];
        let centred = data[(i, columns[r])] - mean;
        if scale {
            centred / sd
        } else {
            centred
        }
    });
    let feature_ids = kept
        .iter()
        .map(|&(i, _, _)| exp.features()[i].molecule.clone())
        .collect();
    Ok(Prepared { x, feature_ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureInfo, SampleInfo};
    use approx::assert_relative_eq;

    #[test]
    fn test_prepare_drops_incomplete_and_constant() {
        let data = DMatrix::from_row_slice(
            3,
            3,
            &[
                1.0, 2.0, 3.0, //
                f64::NAN, 1.0, 1.0, //
                5.0, 5.0, 5.0,
            ],
        );
        let features = ["PC 34:1", "PE 36:2", "TG 52:2"]
            .iter()
            .map(|m| FeatureInfo::from_molecule(m))
            .collect();
        let samples = ["S1", "S2", "S3"].iter().map(|s| SampleInfo::new(s)).collect();
        let exp = Experiment::new("Area", data, features, samples).unwrap();

        let prepared = prepare(&exp, "Area", &[0, 1, 2], true).unwrap();
        assert_eq!(prepared.feature_ids, vec!["PC 34:1"]);
        assert_relative_eq!(prepared.x[(0, 0)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(prepared.x[(2, 0)], 1.0, epsilon = 1e-12);

        assert!(prepare(&exp, "Area", &[0], true).is_err());
    }
}
