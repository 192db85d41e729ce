//! Two-group linear model fitting via OLS.
//!
//! Each feature is regressed on an intercept and an indicator for group A,
//! using only samples labelled A or B that have a finite value:
//!
//! ```text
//! y = β₀ + β₁·[sample in A] + ε
//! ```
//!
//! β₁ is then mean(A) − mean(B), the log fold change when intensities are
//! log-transformed.

use crate::data::{Contrast, Experiment};
use crate::error::{LipidError, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Minimum samples per group for a residual variance to exist.
pub const MIN_GROUP_SIZE: usize = 2;

/// Results from fitting the linear model to a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmFitSingle {
    /// Feature identifier.
    pub feature_id: String,
    /// Group A minus group B.
    pub coefficient: f64,
    /// Unscaled standard deviation of the coefficient, sqrt(1/nA + 1/nB).
    pub stdev_unscaled: f64,
    /// Residual variance (s²).
    pub sigma2: f64,
    /// Mean over the samples used.
    pub ave_expr: f64,
    /// Residual degrees of freedom.
    pub df_residual: usize,
    /// Finite values used in group A.
    pub n_a: usize,
    /// Finite values used in group B.
    pub n_b: usize,
    /// Whether the feature had enough values to fit.
    pub converged: bool,
}

impl LmFitSingle {
    fn failed(feature_id: &str, n_a: usize, n_b: usize, ave_expr: f64) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            coefficient: f64::NAN,
            stdev_unscaled: f64::NAN,
            sigma2: f64::NAN,
            ave_expr,
            df_residual: 0,
            n_a,
            n_b,
            converged: false,
        }
    }

    /// Ordinary t-statistic, without variance moderation.
    pub fn t_statistic(&self) -> Option<f64> {
        let se = self.stdev_unscaled * self.sigma2.sqrt();
        if se > 0.0 && se.is_finite() {
            Some(self.coefficient / se)
        } else {
            None
        }
    }
}

/// Results from fitting the linear model to all features.
#[derive(Debug, Clone)]
pub struct LmFit {
    /// Individual fits, one per feature in experiment order.
    pub fits: Vec<LmFitSingle>,
    /// The contrast the coefficient represents.
    pub contrast: Contrast,
    /// Measure that was fitted.
    pub measure: String,
    /// Samples in group A.
    pub n_a: usize,
    /// Samples in group B.
    pub n_b: usize,
}

impl LmFit {
    /// Get the fit for a specific feature by ID.
    pub fn get_feature(&self, feature_id: &str) -> Option<&LmFitSingle> {
        self.fits.iter().find(|f| f.feature_id == feature_id)
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.fits.len()
    }

    /// Count how many fits converged.
    pub fn n_converged(&self) -> usize {
        self.fits.iter().filter(|f| f.converged).count()
    }

    /// Residual variances of all features (NaN where the fit failed).
    pub fn sigma2(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.sigma2).collect()
    }

    /// Residual degrees of freedom of all features.
    pub fn df_residual(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.df_residual as f64).collect()
    }
}

/// Fit the two-group model to every feature of a measure.
///
/// Samples outside groups A and B, including unannotated samples, are
/// ignored. Each group needs at least two samples; otherwise fails with
/// `InsufficientGroups`. A contrast of a group with itself fails with
/// `InvalidParameter`. Features left with fewer than two finite values in
/// either group are reported as not converged.
pub fn model_groups(exp: &Experiment, measure: &str, contrast: &Contrast) -> Result<LmFit> {
    if contrast.group_a == contrast.group_b {
        return Err(LipidError::InvalidParameter(format!(
            "contrast compares group '{}' with itself",
            contrast.group_a
        )));
    }
    let data = exp.measure(measure)?;
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

    debug!(
        "Fitting {} features, {} = {} samples, {} = {} samples",
        exp.n_features(),
        contrast.group_a,
        idx_a.len(),
        contrast.group_b,
        idx_b.len()
    );

    let fits: Vec<LmFitSingle> = exp
        .features()
        .par_iter()
        .enumerate()
        .map(|(i, f)| {
            let a: Vec<f64> = idx_a.iter().map(|&j| data[(i, j)]).filter(|v| v.is_finite()).collect();
            let b: Vec<f64> = idx_b.iter().map(|&j| data[(i, j)]).filter(|v| v.is_finite()).collect();
            fit_single_feature(&f.molecule, &a, &b)
        })
        .collect();

    Ok(LmFit {
        fits,
        contrast: contrast.clone(),
        measure: measure.to_string(),
        n_a: idx_a.len(),
        n_b: idx_b.len(),
    })
}

/// Fit one feature by OLS on the indicator design.
fn fit_single_feature(feature_id: &str, a: &[f64], b: &[f64]) -> LmFitSingle {
    let (n_a, n_b) = (a.len(), b.len());
    let n = n_a + n_b;
    let ave_expr = if n > 0 {
        a.iter().chain(b).sum::<f64>() / n as f64
    } else {
        f64::NAN
    };
    if n_a < MIN_GROUP_SIZE || n_b < MIN_GROUP_SIZE {
        return LmFitSingle::failed(feature_id, n_a, n_b, ave_expr);
    }

    // Design: intercept + indicator for group A
    let x = DMatrix::from_fn(n, 2, |r, c| if c == 0 || r < n_a { 1.0 } else { 0.0 });
    let y = DVector::from_iterator(n, a.iter().chain(b).copied());

    let xtx = x.transpose() * &x;
    let xtx_inv = match xtx.try_inverse() {
        Some(inv) => inv,
        None => return LmFitSingle::failed(feature_id, n_a, n_b, ave_expr),
    };

    // beta = (X'X)^-1 X'y
    let beta = &xtx_inv * (x.transpose() * &y);
    let residuals = &y - &x * &beta;
    let df_residual = n - 2;
    let sigma2 = residuals.norm_squared() / df_residual as f64;

    LmFitSingle {
        feature_id: feature_id.to_string(),
        coefficient: beta[1],
        stdev_unscaled: xtx_inv[(1, 1)].sqrt(),
        sigma2,
        ave_expr,
        df_residual,
        n_a,
        n_b,
        converged: true,
    }
}
