//! Orthogonal partial least squares discriminant analysis (OPLS-DA).
//!
//! Two labelled groups are coded as a single response (1 for group A, 0 for
//! group B, centred). Variation in X orthogonal to the response is removed
//! component by component before the single predictive component is
//! extracted, so that the predictive scores carry only group-related
//! variation.
//!
//! # References
//!
//! Trygg & Wold (2002) "Orthogonal projections to latent structures
//! (O-PLS)" Journal of Chemometrics 16:119-128

use super::{prepare, MvaMethod, MvaResult};
use crate::data::{Contrast, Experiment};
use crate::error::{LipidError, Result};
use crate::model::MIN_GROUP_SIZE;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Below this norm a weight vector is treated as zero.
const TOLERANCE: f64 = 1e-10;

/// OPLS-DA settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OplsDaConfig {
    /// Measure to analyse.
    pub measure: String,
    /// First group (coded 1).
    pub group_a: String,
    /// Second group (coded 0).
    pub group_b: String,
    /// Orthogonal components to remove.
    pub n_orthogonal: usize,
    /// Scale features to unit variance after centring.
    pub scale: bool,
}

impl Default for OplsDaConfig {
    fn default() -> Self {
        Self {
            measure: "Area".to_string(),
            group_a: String::new(),
            group_b: String::new(),
            n_orthogonal: 1,
            scale: true,
        }
    }
}

impl OplsDaConfig {
    pub fn new(measure: &str, contrast: &Contrast) -> Self {
        Self {
            measure: measure.to_string(),
            group_a: contrast.group_a.clone(),
            group_b: contrast.group_b.clone(),
            ..Default::default()
        }
    }

    pub fn contrast(&self) -> Contrast {
        Contrast::new(&self.group_a, &self.group_b)
    }
}

/// One extracted component: scores, loadings and its sum of squares.
struct Component {
    t: DVector<f64>,
    p: DVector<f64>,
}

impl Component {
    fn from_weight(x: &DMatrix<f64>, w: &DVector<f64>) -> Self {
        let t = x * w;
        let tt = t.dot(&t).max(f64::MIN_POSITIVE);
        let p = x.transpose() * &t / tt;
        Self { t, p }
    }

    /// Sum of squares of the rank-one reconstruction t pᵀ.
    fn ss(&self) -> f64 {
        self.t.dot(&self.t) * self.p.dot(&self.p)
    }
}

/// Fit OPLS-DA on the samples of two groups.
///
/// Samples outside the two groups, including unannotated samples, are
/// ignored. Each group needs at least two samples, otherwise fails with
/// `InsufficientGroups`, and a contrast of a group with itself fails with
/// `InvalidParameter`. Fewer orthogonal components than requested are
/// extracted when no orthogonal variation remains.
pub fn opls_da(exp: &Experiment, config: &OplsDaConfig) -> Result<MvaResult> {
    let contrast = config.contrast();
    if contrast.group_a == contrast.group_b {
        return Err(LipidError::InvalidParameter(format!(
            "contrast compares group '{}' with itself",
            contrast.group_a
        )));
    }
    let idx_a = exp.group_indices(&contrast.group_a);
    let idx_b = exp.group_indices(&contrast.group_b);
    for (group, idx) in [(&contrast.group_a, &idx_a), (&contrast.group_b, &idx_b)] {
        if idx.len() < MIN_GROUP_SIZE {
            return Err(LipidError::InsufficientGroups {
                group: group.clone(),
                found: idx.len(),
                required: MIN_GROUP_SIZE,
            });
        }
    }

    let columns: Vec<usize> = idx_a.iter().chain(&idx_b).copied().collect();
    let prepared = prepare(exp, &config.measure, &columns, config.scale)?;
    let mut x = prepared.x.clone();
    let n = columns.len();
    let ss_x = x.norm_squared();

    let y_mean = idx_a.len() as f64 / n as f64;
    let y = DVector::from_fn(n, |r, _| if r < idx_a.len() { 1.0 - y_mean } else { -y_mean });
    let ss_y = y.dot(&y);

    // Predictive weight: direction of X covariance with y
    let mut w = x.transpose() * &y;
    let w_norm = w.norm();
    if w_norm < TOLERANCE {
        return Err(LipidError::Numerical(
            "no covariance between features and group labels".to_string(),
        ));
    }
    w /= w_norm;

    let mut orthogonal: Vec<Component> = Vec::new();
    for _ in 0..config.n_orthogonal {
        let predictive = Component::from_weight(&x, &w);
        let mut w_o = &predictive.p - w.scale(w.dot(&predictive.p));
        let norm = w_o.norm();
        if norm < TOLERANCE {
            warn!(
                "OPLS-DA: no orthogonal variation left after {} component(s)",
                orthogonal.len()
            );
            break;
        }
        w_o /= norm;
        let component = Component::from_weight(&x, &w_o);
        x -= &component.t * component.p.transpose();
        orthogonal.push(component);
    }

    let predictive = Component::from_weight(&x, &w);
    let tt = predictive.t.dot(&predictive.t);
    let c = if tt > 0.0 { y.dot(&predictive.t) / tt } else { 0.0 };
    let residual_y = &y - predictive.t.scale(c);
    let r2y = 1.0 - residual_y.dot(&residual_y) / ss_y;

    let n_comp = 1 + orthogonal.len();
    let p = prepared.feature_ids.len();
    let mut scores = DMatrix::zeros(n, n_comp);
    let mut loadings = DMatrix::zeros(p, n_comp);
    let mut explained = Vec::with_capacity(n_comp);
    for (col, comp) in std::iter::once(&predictive).chain(&orthogonal).enumerate() {
        scores.set_column(col, &comp.t);
        loadings.set_column(col, &comp.p);
        explained.push(comp.ss() / ss_x);
    }

    // Single predictive component: VIP_j = sqrt(p) |w_j| with |w| = 1
    let vip: Vec<f64> = w.iter().map(|wj| (p as f64).sqrt() * wj.abs()).collect();

    let mut component_names = vec!["p1".to_string()];
    component_names.extend((1..=orthogonal.len()).map(|i| format!("o{}", i)));

    info!(
        "OPLS-DA {} on {} samples x {} features: R2X(p1) {:.3}, R2Y {:.3}",
        contrast, n, p, explained[0], r2y
    );

    let samples = exp.samples();
    Ok(MvaResult {
        method: MvaMethod::OplsDa,
        sample_ids: columns.iter().map(|&j| samples[j].sample_id.clone()).collect(),
        groups: columns.iter().map(|&j| samples[j].group.clone()).collect(),
        feature_ids: prepared.feature_ids,
        scores,
        loadings,
        component_names,
        explained_variance: explained,
        n_predictive: 1,
        contrast: Some(contrast),
        r2y: Some(r2y),
        vip: Some(vip),
    })
}
