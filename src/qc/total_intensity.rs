//! Total intensity per sample.

use super::{mean_sd, median};
use crate::data::Experiment;
use crate::error::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-sample total intensity of one measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalIntensityProfile {
    /// Measure that was summed.
    pub measure: String,
    /// Whether totals were log-transformed (natural log).
    pub log: bool,
    /// Sample identifiers, in experiment order.
    pub sample_ids: Vec<String>,
    /// Group label per sample (`None` when unannotated).
    pub groups: Vec<Option<String>>,
    /// Total per sample (sum over non-missing features).
    pub totals: Vec<f64>,
    /// Mean of totals.
    pub mean: f64,
    /// Median of totals.
    pub median: f64,
    /// Standard deviation of totals.
    pub std_dev: f64,
    /// Coefficient of variation of totals.
    pub cv: f64,
    /// Indices of samples more than two standard deviations from the mean.
    pub outliers: Vec<usize>,
}

impl TotalIntensityProfile {
    /// Sample IDs flagged as deviating. Advisory only.
    pub fn outlier_ids(&self) -> Vec<&str> {
        self.outliers.iter().map(|&i| self.sample_ids[i].as_str()).collect()
    }

    /// Write `sample_id, group, total, outlier` rows.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["sample_id", "group", "total", "outlier"])?;
        for (i, id) in self.sample_ids.iter().enumerate() {
            writer.write_record([
                id.clone(),
                self.groups[i].clone().unwrap_or_default(),
                format!("{:.6}", self.totals[i]),
                self.outliers.contains(&i).to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Display for TotalIntensityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total Intensity Profile ({}{})", self.measure, if self.log { ", log" } else { "" })?;
        writeln!(f, "  Samples: {}", self.sample_ids.len())?;
        writeln!(f, "  Mean:    {:.3}", self.mean)?;
        writeln!(f, "  Median:  {:.3}", self.median)?;
        writeln!(f, "  Std Dev: {:.3}", self.std_dev)?;
        writeln!(f, "  CV:      {:.3}", self.cv)?;
        writeln!(f, "  Flagged: {:?}", self.outlier_ids())?;
        Ok(())
    }
}

/// Sum each sample's intensities across features.
///
/// Missing values are skipped. With `log`, totals are natural-log transformed
/// (a non-positive total becomes NaN). Samples deviating by more than two
/// standard deviations are flagged but never removed. All samples are
/// included whether or not they carry a group label.
pub fn profile_total_intensity(
    exp: &Experiment,
    measure: &str,
    log: bool,
) -> Result<TotalIntensityProfile> {
    let data = exp.measure(measure)?;

    let totals: Vec<f64> = (0..exp.n_samples())
        .map(|j| {
            let total: f64 = data.column(j).iter().filter(|v| v.is_finite()).sum();
            if log {
                if total > 0.0 {
                    total.ln()
                } else {
                    f64::NAN
                }
            } else {
                total
            }
        })
        .collect();

    let (mean, std_dev, _) = mean_sd(&totals);
    let median = median(&totals);
    let cv = if mean != 0.0 { std_dev / mean } else { f64::NAN };

    let outliers: Vec<usize> = if std_dev.is_finite() && std_dev > 0.0 {
        totals
            .iter()
            .enumerate()
            .filter(|(_, t)| ((*t - mean) / std_dev).abs() > 2.0)
            .map(|(i, _)| i)
            .collect()
    } else {
        Vec::new()
    };

    let sample_ids = exp.sample_ids();
    if !outliers.is_empty() {
        let ids: Vec<&str> = outliers.iter().map(|&i| sample_ids[i].as_str()).collect();
        warn!("Total intensity deviates by >2 SD for samples {:?}", ids);
    }

    Ok(TotalIntensityProfile {
        measure: measure.to_string(),
        log,
        groups: exp.samples().iter().map(|s| s.group.clone()).collect(),
        sample_ids,
        totals,
        mean,
        median,
        std_dev,
        cv,
        outliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureInfo, SampleInfo};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn create_experiment(n_samples: usize, values: &[f64]) -> Experiment {
        let n_features = values.len() / n_samples;
        let data = DMatrix::from_row_slice(n_features, n_samples, values);
        let features = (0..n_features)
            .map(|i| FeatureInfo::from_molecule(&format!("PC {}:1", 30 + i)))
            .collect();
        let samples = (0..n_samples)
            .map(|j| SampleInfo::new(&format!("S{}", j + 1)))
            .collect();
        Experiment::new("Area", data, features, samples).unwrap()
    }

    #[test]
    fn test_totals() {
        let exp = create_experiment(3, &[1.0, 2.0, 3.0, 10.0, f64::NAN, 30.0]);
        let profile = profile_total_intensity(&exp, "Area", false).unwrap();
        assert_eq!(profile.totals, vec![11.0, 2.0, 33.0]);
        assert_relative_eq!(profile.median, 11.0);
    }

    #[test]
    fn test_log_totals() {
        let exp = create_experiment(2, &[1.0, 0.0, 1.0, 0.0]);
        let profile = profile_total_intensity(&exp, "Area", true).unwrap();
        assert_relative_eq!(profile.totals[0], 2.0f64.ln());
        assert!(profile.totals[1].is_nan());
    }

    #[test]
    fn test_outlier_flagged_not_removed() {
        let mut values = vec![100.0; 10];
        values[9] = 10_000.0;
        let exp = create_experiment(10, &values);
        let profile = profile_total_intensity(&exp, "Area", false).unwrap();
        assert_eq!(profile.outliers, vec![9]);
        assert_eq!(profile.outlier_ids(), vec!["S10"]);
        assert_eq!(profile.totals.len(), 10);
    }

    #[test]
    fn test_ungrouped_samples_included() {
        let exp = create_experiment(2, &[1.0, 2.0]);
        let profile = profile_total_intensity(&exp, "Area", false).unwrap();
        assert_eq!(profile.groups, vec![None, None]);
        assert_eq!(profile.totals.len(), 2);
    }
}
