//! Principal component analysis via SVD.

use super::{prepare, MvaMethod, MvaResult};
use crate::data::Experiment;
use crate::error::{LipidError, Result};
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// PCA settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    /// Measure to analyse.
    pub measure: String,
    /// Components to keep (capped by the data rank).
    pub n_components: usize,
    /// Scale features to unit variance after centring.
    pub scale: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            measure: "Area".to_string(),
            n_components: 2,
            scale: true,
        }
    }
}

/// PCA of all samples.
///
/// The centred (optionally unit-variance) samples × features matrix is
/// decomposed as X = U S Vᵀ; scores are U S and loadings V. Components are
/// ordered by explained variance, and each is signed so that its largest
/// loading is positive.
pub fn pca(exp: &Experiment, config: &PcaConfig) -> Result<MvaResult> {
    let columns: Vec<usize> = (0..exp.n_samples()).collect();
    let prepared = prepare(exp, &config.measure, &columns, config.scale)?;
    let x = &prepared.x;
    let (n, p) = x.shape();

    let svd = x.clone().svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| LipidError::Numerical("SVD did not return U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| LipidError::Numerical("SVD did not return V^T".to_string()))?;
    let s = svd.singular_values;

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

    let total: f64 = s.iter().map(|v| v * v).sum();
    let k = config.n_components.min(n - 1).min(p).max(1);

    let mut scores = DMatrix::zeros(n, k);
    let mut loadings = DMatrix::zeros(p, k);
    let mut explained = Vec::with_capacity(k);
    for (c, &idx) in order.iter().take(k).enumerate() {
        let loading = v_t.row(idx).transpose();
        let pivot = loading
            .iter()
            .copied()
            .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        for r in 0..p {
            loadings[(r, c)] = sign * loading[r];
        }
        for r in 0..n {
            scores[(r, c)] = sign * u[(r, idx)] * s[idx];
        }
        explained.push(if total > 0.0 { s[idx] * s[idx] / total } else { 0.0 });
    }

    info!(
        "PCA on {} samples x {} features: R2X {:?}",
        n,
        p,
        explained.iter().map(|v| format!("{:.3}", v)).collect::<Vec<_>>()
    );

    Ok(MvaResult {
        method: MvaMethod::Pca,
        sample_ids: exp.sample_ids(),
        groups: exp.samples().iter().map(|s| s.group.clone()).collect(),
        feature_ids: prepared.feature_ids,
        scores,
        loadings,
        component_names: (1..=k).map(|c| format!("PC{}", c)).collect(),
        explained_variance: explained,
        n_predictive: k,
        contrast: None,
        r2y: None,
        vip: None,
    })
}
