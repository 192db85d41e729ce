//! Moderated t-test on a two-group fit.

use crate::correct::correct_bh;
use crate::data::{Contrast, DeResult, DeResultSet, Experiment};
use crate::error::Result;
use crate::model::{model_groups, squeeze_var, LmFit, SqueezedVar};
use log::info;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Moderated test result for a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedResultSingle {
    /// Feature identifier.
    pub feature_id: String,
    /// Estimated coefficient (group A − group B).
    pub log_fc: f64,
    /// Moderated t-statistic.
    pub t: f64,
    /// Residual plus prior degrees of freedom, capped at the pooled df.
    pub df_total: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Moderated test results for all features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedResult {
    pub results: Vec<ModeratedResultSingle>,
    pub df_prior: f64,
    pub s2_prior: f64,
}

impl ModeratedResult {
    /// Get p-values for all features.
    pub fn p_values(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.p_value).collect()
    }

    /// Get feature IDs.
    pub fn feature_ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.feature_id.clone()).collect()
    }
}

/// Two-sided p-value for `t` on `df` degrees of freedom.
///
/// Infinite df uses the standard normal.
fn two_sided_p(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return if t.is_nan() { f64::NAN } else { 0.0 };
    }
    let upper = if df.is_infinite() {
        match Normal::new(0.0, 1.0) {
            Ok(dist) => dist.sf(t.abs()),
            Err(_) => return f64::NAN,
        }
    } else if df > 0.0 {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => dist.sf(t.abs()),
            Err(_) => return f64::NAN,
        }
    } else {
        return f64::NAN;
    };
    (2.0 * upper).clamp(0.0, 1.0)
}

/// Moderated t-test using posterior variances.
///
/// t = coefficient / (unscaled SD · posterior SD), compared against Student
/// t with d + d0 degrees of freedom. The total df never exceeds the residual
/// df pooled over all features.
pub fn test_moderated(fit: &LmFit, squeezed: &SqueezedVar) -> ModeratedResult {
    let df_prior = squeezed.prior.df_prior;
    let results = fit
        .fits
        .iter()
        .zip(&squeezed.s2_post)
        .map(|(f, &s2_post)| {
            if !f.converged || !s2_post.is_finite() {
                return ModeratedResultSingle {
                    feature_id: f.feature_id.clone(),
                    log_fc: f.coefficient,
                    t: f64::NAN,
                    df_total: f64::NAN,
                    p_value: f64::NAN,
                };
            }
            let df_total = (f.df_residual as f64 + df_prior).min(squeezed.df_pooled);
            let se = f.stdev_unscaled * s2_post.sqrt();
            let t = f.coefficient / se;
            ModeratedResultSingle {
                feature_id: f.feature_id.clone(),
                log_fc: f.coefficient,
                t,
                df_total,
                p_value: two_sided_p(t, df_total),
            }
        })
        .collect();

    ModeratedResult {
        results,
        df_prior,
        s2_prior: squeezed.prior.s2_prior,
    }
}

/// Full differential test of one contrast: fit, moderate, test and adjust.
///
/// Only samples labelled with either contrast group take part; each group
/// needs at least two samples.
pub fn differential_test(exp: &Experiment, measure: &str, contrast: &Contrast) -> Result<DeResultSet> {
    let fit = model_groups(exp, measure, contrast)?;
    let squeezed = squeeze_var(&fit)?;
    let moderated = test_moderated(&fit, &squeezed);
    let bh = correct_bh(&moderated.p_values(), &moderated.feature_ids());

    let results: Vec<DeResult> = exp
        .features()
        .iter()
        .zip(&fit.fits)
        .zip(&moderated.results)
        .zip(&bh.q_values)
        .map(|(((feature, lm), m), &q)| DeResult {
            feature_id: feature.molecule.clone(),
            class: feature.class.clone(),
            total_chain_length: feature.total_chain_length,
            total_unsaturation: feature.total_unsaturation,
            contrast: contrast.name(),
            log_fc: m.log_fc,
            ave_expr: lm.ave_expr,
            t: m.t,
            df: m.df_total,
            p_value: m.p_value,
            adj_p_value: q,
        })
        .collect();

    let set = DeResultSet {
        contrast: contrast.clone(),
        measure: measure.to_string(),
        df_prior: moderated.df_prior,
        s2_prior: moderated.s2_prior,
        results,
    };
    info!(
        "Differential test {}: {} features, {} with adj.P < 0.05",
        contrast,
        set.len(),
        set.significant(0.05, 0.0).len()
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureInfo, SampleInfo};
    use crate::error::LipidError;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn create_experiment() -> Experiment {
        // 6 features x 6 samples (3 KO, 3 WT); PC 34:1 shifted by +2 in KO
        let values = [
            7.1, 7.0, 6.9, 5.0, 5.1, 4.9, //
            3.0, 3.2, 2.9, 3.1, 2.8, 3.0, //
            4.0, 4.1, 3.8, 3.9, 4.2, 4.0, //
            5.5, 5.4, 5.6, 5.5, 5.3, 5.7, //
            2.0, 2.3, 2.1, 2.2, 1.9, 2.1, //
            6.0, 6.2, 6.1, 5.9, 6.0, 6.3,
        ];
        let data = DMatrix::from_row_slice(6, 6, &values);
        let features = ["PC 34:1", "PC 36:2", "PE 36:2", "PE 38:4", "TG 52:2", "TG 54:3"]
            .iter()
            .map(|m| FeatureInfo::from_molecule(m))
            .collect();
        let samples = ["K1", "K2", "K3", "W1", "W2", "W3"]
            .iter()
            .enumerate()
            .map(|(j, s)| SampleInfo::new(s).with_group(if j < 3 { "KO" } else { "WT" }))
            .collect();
        Experiment::new("Area", data, features, samples).unwrap()
    }

    #[test]
    fn test_two_sided_p() {
        assert_relative_eq!(two_sided_p(0.0, 5.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(two_sided_p(1.959_963_984_540_054, f64::INFINITY), 0.05, epsilon = 1e-6);
        assert_eq!(two_sided_p(f64::INFINITY, 4.0), 0.0);
        assert!(two_sided_p(f64::NAN, 4.0).is_nan());
    }

    #[test]
    fn test_two_sided_p_keeps_tail_order() {
        let strong = two_sided_p(146.4, 20.0);
        let weaker = two_sided_p(48.8, 20.0);
        assert!(strong > 0.0);
        assert!(strong < weaker);

        let strong = two_sided_p(12.0, f64::INFINITY);
        let weaker = two_sided_p(9.0, f64::INFINITY);
        assert!(strong > 0.0);
        assert!(strong < weaker);
    }

    #[test]
    fn test_shifted_feature_is_top() {
        let exp = create_experiment();
        let de = differential_test(&exp, "Area", &Contrast::new("KO", "WT")).unwrap();

        assert_eq!(de.len(), 6);
        let top = de.sorted_by_pvalue()[0];
        assert_eq!(top.feature_id, "PC 34:1");
        assert_relative_eq!(top.log_fc, 2.0, epsilon = 1e-10);
        assert!(top.adj_p_value < 0.01);
        assert_eq!(top.contrast, "KO - WT");
        assert_eq!(top.class, "PC");
        assert_eq!(top.total_chain_length, Some(34));
        for r in de.iter() {
            assert!(r.adj_p_value >= r.p_value);
            assert!(r.df <= 24.0);
        }
    }

    #[test]
    fn test_contrast_swap() {
        let exp = create_experiment();
        let ab = differential_test(&exp, "Area", &Contrast::new("KO", "WT")).unwrap();
        let ba = differential_test(&exp, "Area", &Contrast::new("WT", "KO")).unwrap();
        for (x, y) in ab.iter().zip(ba.iter()) {
            assert_relative_eq!(x.log_fc, -y.log_fc, epsilon = 1e-10);
            assert_relative_eq!(x.t, -y.t, epsilon = 1e-8);
            assert_relative_eq!(x.p_value, y.p_value, epsilon = 1e-10);
            assert_relative_eq!(x.adj_p_value, y.adj_p_value, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_insufficient_group() {
        let exp = create_experiment();
        let sub = exp.subset_samples(&[0, 3, 4, 5]).unwrap();
        let err = differential_test(&sub, "Area", &Contrast::new("KO", "WT")).unwrap_err();
        assert!(matches!(err, LipidError::InsufficientGroups { found: 1, .. }));
    }
}
