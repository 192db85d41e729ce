//! Empirical Bayes moderation of residual variances.
//!
//! Residual variances are assumed to follow a scaled inverse chi-square
//! prior, s² ~ s0² · d0 / χ²(d0). The hyperparameters are estimated from
//! all features jointly by matching the moments of log s², and each
//! feature's variance is shrunk towards s0²:
//!
//! ```text
//! s²_post = (d·s² + d0·s0²) / (d + d0)
//! ```
//!
//! With few features or little spread between them the prior df becomes
//! infinite and every posterior variance equals s0².
//!
//! # References
//!
//! Smyth (2004) "Linear models and empirical Bayes methods for assessing
//! differential expression in microarray experiments" SAGMB 3:1

use super::lm::LmFit;
use super::special::{trigamma, trigamma_inverse};
use crate::error::{LipidError, Result};
use crate::qc::median;
use log::debug;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::digamma;

/// Estimated prior for the residual variances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariancePrior {
    /// Prior degrees of freedom d0 (may be infinite).
    pub df_prior: f64,
    /// Prior variance s0².
    pub s2_prior: f64,
}

/// Posterior variances together with the prior they were shrunk towards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezedVar {
    pub prior: VariancePrior,
    /// One posterior variance per feature (NaN where the fit failed).
    pub s2_post: Vec<f64>,
    /// Sum of residual df over features with a usable variance.
    pub df_pooled: f64,
}

/// Fit a scaled F-distribution to sample variances by moments of log s².
///
/// Only features with finite variance and positive df contribute. Fails
/// with `Numerical` when no feature does. A single usable feature gives a
/// prior with zero df.
pub fn fit_f_dist(s2: &[f64], df: &[f64]) -> Result<VariancePrior> {
    let (x, d): (Vec<f64>, Vec<f64>) = s2
        .iter()
        .zip(df)
        .filter(|(v, d)| v.is_finite() && d.is_finite() && **d > 1e-15)
        .map(|(v, d)| (*v, *d))
        .unzip();

    let n = x.len();
    if n == 0 {
        return Err(LipidError::Numerical(
            "no feature has a usable residual variance".to_string(),
        ));
    }
    if n == 1 {
        return Ok(VariancePrior {
            df_prior: 0.0,
            s2_prior: x[0],
        });
    }

    // Floor exact zeros relative to the median
    let x: Vec<f64> = x.iter().map(|v| v.max(0.0)).collect();
    let mut m = median(&x);
    if m == 0.0 {
        debug!("More than half of residual variances are exactly zero");
        m = 1.0;
    }
    let floor = 1e-5 * m;

    let e: Vec<f64> = x
        .iter()
        .zip(&d)
        .map(|(v, d)| v.max(floor).ln() - digamma(d / 2.0) + (d / 2.0).ln())
        .collect();
    let emean = e.iter().sum::<f64>() / n as f64;
    let evar_raw = e.iter().map(|v| (v - emean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let evar = evar_raw - d.iter().map(|d| trigamma(d / 2.0)).sum::<f64>() / n as f64;

    if evar > 0.0 {
        let df_prior = 2.0 * trigamma_inverse(evar);
        let s2_prior = (emean + digamma(df_prior / 2.0) - (df_prior / 2.0).ln()).exp();
        Ok(VariancePrior { df_prior, s2_prior })
    } else {
        Ok(VariancePrior {
            df_prior: f64::INFINITY,
            s2_prior: emean.exp(),
        })
    }
}

/// Shrink every feature's residual variance towards the common prior.
pub fn squeeze_var(fit: &LmFit) -> Result<SqueezedVar> {
    let s2 = fit.sigma2();
    let df = fit.df_residual();
    let prior = fit_f_dist(&s2, &df)?;

    debug!(
        "Variance prior: d0 = {:.3}, s0^2 = {:.4e}",
        prior.df_prior, prior.s2_prior
    );

    let s2_post = s2
        .iter()
        .zip(&df)
        .map(|(&v, &d)| {
            if !v.is_finite() {
                f64::NAN
            } else if prior.df_prior.is_infinite() || d == 0.0 {
                prior.s2_prior
            } else {
                (d * v + prior.df_prior * prior.s2_prior) / (d + prior.df_prior)
            }
        })
        .collect();

    let df_pooled = s2
        .iter()
        .zip(&df)
        .filter(|(v, _)| v.is_finite())
        .map(|(_, d)| d)
        .sum();

    Ok(SqueezedVar {
        prior,
        s2_post,
        df_pooled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identical_variances_give_infinite_df() {
        let s2 = vec![0.5; 20];
        let df = vec![4.0; 20];
        let prior = fit_f_dist(&s2, &df).unwrap();
        assert!(prior.df_prior.is_infinite());
        // exp(mean(log s2 - digamma(2) + log 2))
        let expected = (0.5f64.ln() - digamma(2.0) + 2.0f64.ln()).exp();
        assert_relative_eq!(prior.s2_prior, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_all_zero_variances_floored() {
        let s2 = vec![0.0; 4];
        let df = vec![2.0; 4];
        let prior = fit_f_dist(&s2, &df).unwrap();
        assert!(prior.df_prior.is_infinite());
        assert!(prior.s2_prior > 0.0 && prior.s2_prior.is_finite());
    }

    #[test]
    fn test_spread_variances_give_finite_df() {
        // Variances spread far more than chi-square sampling allows at df = 10
        let s2: Vec<f64> = (0..50).map(|i| 0.1 * (1.0 + (i % 10) as f64).powi(2)).collect();
        let df = vec![10.0; 50];
        let prior = fit_f_dist(&s2, &df).unwrap();
        assert!(prior.df_prior.is_finite());
        assert!(prior.df_prior > 0.0);
        assert!(prior.s2_prior > 0.0);
    }

    #[test]
    fn test_single_feature() {
        let prior = fit_f_dist(&[2.0, f64::NAN], &[3.0, 3.0]).unwrap();
        assert_eq!(prior.df_prior, 0.0);
        assert_eq!(prior.s2_prior, 2.0);
    }

    #[test]
    fn test_no_usable_feature() {
        assert!(fit_f_dist(&[f64::NAN], &[2.0]).is_err());
        assert!(fit_f_dist(&[1.0], &[0.0]).is_err());
    }
}
