//! Per-feature coefficient of variation across replicate samples.

use super::mean_sd;
use crate::data::{Experiment, SampleInfo};
use crate::error::{LipidError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which samples a CV is computed across.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSelection {
    /// Every sample, grouped or not.
    #[default]
    All,
    /// Pooled QC injections only.
    Qc,
    /// Samples carrying one group label.
    Group(String),
}

impl SampleSelection {
    fn includes(&self, sample: &SampleInfo) -> bool {
        match self {
            SampleSelection::All => true,
            SampleSelection::Qc => sample.is_qc,
            SampleSelection::Group(label) => sample.in_group(label),
        }
    }
}

/// CV statistics for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCv {
    pub feature_id: String,
    pub class: String,
    pub mean: f64,
    pub std_dev: f64,
    /// Standard deviation / mean; NaN with fewer than two finite values.
    pub cv: f64,
    /// Number of finite values used.
    pub n: usize,
}

/// CV profile over all features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvProfile {
    pub measure: String,
    pub selection: SampleSelection,
    /// Number of samples selected.
    pub n_samples: usize,
    pub features: Vec<FeatureCv>,
}

impl CvProfile {
    /// Features whose CV exceeds `threshold` (e.g. 0.2 for 20%).
    pub fn unstable(&self, threshold: f64) -> Vec<&FeatureCv> {
        self.features
            .iter()
            .filter(|f| f.cv.is_finite() && f.cv > threshold)
            .collect()
    }

    /// Median CV over features with a finite CV.
    pub fn median_cv(&self) -> f64 {
        let cvs: Vec<f64> = self.features.iter().map(|f| f.cv).collect();
        super::median(&cvs)
    }

    /// Write `feature_id, class, mean, sd, cv, n` rows.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["feature_id", "class", "mean", "sd", "cv", "n"])?;
        for f in &self.features {
            writer.write_record([
                f.feature_id.clone(),
                f.class.clone(),
                format!("{:.6}", f.mean),
                format!("{:.6}", f.std_dev),
                format!("{:.6}", f.cv),
                f.n.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Compute per-feature CV (sample SD / mean) over the selected samples.
///
/// Fails with `InvalidParameter` when the selection matches no sample.
pub fn profile_cv(exp: &Experiment, measure: &str, selection: &SampleSelection) -> Result<CvProfile> {
    let data = exp.measure(measure)?;
    let columns: Vec<usize> = exp
        .samples()
        .iter()
        .enumerate()
        .filter(|(_, s)| selection.includes(s))
        .map(|(j, _)| j)
        .collect();

    if columns.is_empty() {
        return Err(LipidError::InvalidParameter(format!(
            "no samples match CV selection {:?}",
            selection
        )));
    }

    let features = exp
        .features()
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let values: Vec<f64> = columns.iter().map(|&j| data[(i, j)]).collect();
            let (mean, std_dev, n) = mean_sd(&values);
            let cv = if n >= 2 && mean != 0.0 {
                std_dev / mean
            } else {
                f64::NAN
            };
            FeatureCv {
                feature_id: f.molecule.clone(),
                class: f.class.clone(),
                mean,
                std_dev,
                cv,
                n,
            }
        })
        .collect();

    Ok(CvProfile {
        measure: measure.to_string(),
        selection: selection.clone(),
        n_samples: columns.len(),
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureInfo;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn create_experiment() -> Experiment {
        // 2 features x 4 samples; S4 is a QC
        let data = DMatrix::from_row_slice(
            2,
            4,
            &[
                10.0, 10.0, 10.0, 10.0, //
                5.0, 15.0, f64::NAN, 10.0,
            ],
        );
        let features = vec![
            FeatureInfo::from_molecule("PC 34:1"),
            FeatureInfo::from_molecule("PE 36:2"),
        ];
        let samples = vec![
            SampleInfo::new("S1").with_group("WT"),
            SampleInfo::new("S2").with_group("WT"),
            SampleInfo::new("S3"),
            SampleInfo::new("S4").with_group("QC"),
        ];
        Experiment::new("Area", data, features, samples).unwrap()
    }

    #[test]
    fn test_cv_all() {
        let exp = create_experiment();
        let profile = profile_cv(&exp, "Area", &SampleSelection::All).unwrap();
        assert_eq!(profile.n_samples, 4);
        assert_relative_eq!(profile.features[0].cv, 0.0);
        // 5, 15, 10 -> mean 10, sd 5
        assert_eq!(profile.features[1].n, 3);
        assert_relative_eq!(profile.features[1].cv, 0.5, epsilon = 1e-12);
        assert_eq!(profile.unstable(0.2).len(), 1);
    }

    #[test]
    fn test_cv_group() {
        let exp = create_experiment();
        let profile = profile_cv(&exp, "Area", &SampleSelection::Group("WT".into())).unwrap();
        assert_eq!(profile.n_samples, 2);
        // 5, 15 -> mean 10, sd 7.07
        assert_relative_eq!(profile.features[1].cv, 50.0f64.sqrt() / 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cv_single_sample_is_nan() {
        let exp = create_experiment();
        let profile = profile_cv(&exp, "Area", &SampleSelection::Qc).unwrap();
        assert_eq!(profile.n_samples, 1);
        assert!(profile.features[0].cv.is_nan());
        assert!(profile.unstable(0.0).is_empty());
    }

    #[test]
    fn test_cv_empty_selection() {
        let exp = create_experiment();
        let result = profile_cv(&exp, "Area", &SampleSelection::Group("KO".into()));
        assert!(result.is_err());
    }
}
