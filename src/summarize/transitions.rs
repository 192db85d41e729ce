//! Transition summarization.
//!
//! Targeted and semi-targeted exports often report several transitions (or
//! adducts) for the same molecule. Downstream statistics expect one row per
//! analyte, so duplicate rows sharing a molecule name are collapsed per
//! sample with the chosen aggregate.

use crate::data::{Experiment, FeatureInfo, Provenance};
use crate::error::Result;
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// How duplicate rows are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMethod {
    /// Mean of the non-missing values.
    #[default]
    Average,
    /// Largest non-missing value.
    Max,
}

impl SummaryMethod {
    fn aggregate(&self, values: &[f64]) -> f64 {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return f64::NAN;
        }
        match self {
            SummaryMethod::Average => finite.iter().sum::<f64>() / finite.len() as f64,
            SummaryMethod::Max => finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Collapse rows that share a molecule name.
///
/// Output rows follow the order in which each molecule first appears; the
/// first occurrence supplies the feature metadata, with retention time
/// averaged over the duplicates. Every measure is summarized the same way.
pub fn summarize_transitions(exp: &Experiment, method: SummaryMethod) -> Result<Experiment> {
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, f) in exp.features().iter().enumerate() {
        let entry = members.entry(f.molecule.as_str()).or_default();
        if entry.is_empty() {
            order.push(f.molecule.clone());
        }
        entry.push(i);
    }

    let groups: Vec<&Vec<usize>> = order
        .iter()
        .filter_map(|m| members.get(m.as_str()))
        .collect();

    let features: Vec<FeatureInfo> = groups
        .iter()
        .map(|rows| {
            let mut feature = exp.features()[rows[0]].clone();
            let rts: Vec<f64> = rows
                .iter()
                .filter_map(|&i| exp.features()[i].retention_time)
                .collect();
            if !rts.is_empty() {
                feature.retention_time = Some(rts.iter().sum::<f64>() / rts.len() as f64);
            }
            feature.is_istd = rows.iter().any(|&i| exp.features()[i].is_istd);
            feature
        })
        .collect();

    let n_samples = exp.n_samples();
    let measures: BTreeMap<String, DMatrix<f64>> = exp
        .measures()
        .iter()
        .map(|(name, data)| {
            let collapsed = DMatrix::from_fn(groups.len(), n_samples, |g, j| {
                let values: Vec<f64> = groups[g].iter().map(|&i| data[(i, j)]).collect();
                method.aggregate(&values)
            });
            (name.clone(), collapsed)
        })
        .collect();

    info!(
        "Summarized transitions ({:?}): {} -> {} features",
        method,
        exp.n_features(),
        features.len()
    );

    let mut provenance = exp.provenance().to_vec();
    provenance.push(Provenance::Summarized {
        method,
        features_before: exp.n_features(),
        features_after: features.len(),
    });

    Experiment::from_parts(measures, features, exp.samples().to_vec(), provenance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleInfo;
    use approx::assert_relative_eq;

    fn create_experiment(rows: &[(&str, [f64; 3])]) -> Experiment {
        let features = rows.iter().map(|(m, _)| FeatureInfo::from_molecule(m)).collect();
        let values: Vec<f64> = rows.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        let data = DMatrix::from_row_slice(rows.len(), 3, &values);
        let samples = ["S1", "S2", "S3"].iter().map(|s| SampleInfo::new(s)).collect();
        Experiment::new("Area", data, features, samples).unwrap()
    }

    #[test]
    fn test_average_duplicates() {
        let exp = create_experiment(&[
            ("PC 34:1", [10.0, 20.0, 30.0]),
            ("PE 36:2", [1.0, 2.0, 3.0]),
            ("PC 34:1", [30.0, 40.0, 50.0]),
        ]);
        let out = summarize_transitions(&exp, SummaryMethod::Average).unwrap();

        assert_eq!(out.n_features(), 2);
        assert_eq!(out.feature_ids(), vec!["PC 34:1", "PE 36:2"]);
        let area = out.measure("Area").unwrap();
        assert_relative_eq!(area[(0, 0)], 20.0);
        assert_relative_eq!(area[(0, 2)], 40.0);
        assert_relative_eq!(area[(1, 1)], 2.0);
    }

    #[test]
    fn test_identical_duplicates_are_noop() {
        let values = [12.345, 678.9, 0.001];
        let single = create_experiment(&[("PC 34:1", values)]);
        let doubled = create_experiment(&[("PC 34:1", values), ("PC 34:1", values)]);

        let out = summarize_transitions(&doubled, SummaryMethod::Average).unwrap();
        let a = out.measure("Area").unwrap();
        let b = single.measure("Area").unwrap();
        for j in 0..3 {
            assert_eq!(a[(0, j)], b[(0, j)]);
        }
    }

    #[test]
    fn test_max() {
        let exp = create_experiment(&[("PC 34:1", [10.0, 50.0, 30.0]), ("PC 34:1", [20.0, 40.0, f64::NAN])]);
        let out = summarize_transitions(&exp, SummaryMethod::Max).unwrap();
        let area = out.measure("Area").unwrap();
        assert_eq!(area[(0, 0)], 20.0);
        assert_eq!(area[(0, 1)], 50.0);
        assert_eq!(area[(0, 2)], 30.0);
    }

    #[test]
    fn test_missing_values_skipped() {
        let exp = create_experiment(&[
            ("PC 34:1", [f64::NAN, 10.0, f64::NAN]),
            ("PC 34:1", [4.0, 20.0, f64::NAN]),
        ]);
        let out = summarize_transitions(&exp, SummaryMethod::Average).unwrap();
        let area = out.measure("Area").unwrap();
        assert_eq!(area[(0, 0)], 4.0);
        assert_eq!(area[(0, 1)], 15.0);
        assert!(area[(0, 2)].is_nan());
    }

    #[test]
    fn test_order_of_duplicates_irrelevant() {
        let a = create_experiment(&[("PC 34:1", [1.0, 2.0, 3.0]), ("PC 34:1", [3.0, 4.0, 5.0])]);
        let b = create_experiment(&[("PC 34:1", [3.0, 4.0, 5.0]), ("PC 34:1", [1.0, 2.0, 3.0])]);
        let ma = summarize_transitions(&a, SummaryMethod::Average).unwrap();
        let mb = summarize_transitions(&b, SummaryMethod::Average).unwrap();
        for j in 0..3 {
            assert_relative_eq!(
                ma.measure("Area").unwrap()[(0, j)],
                mb.measure("Area").unwrap()[(0, j)]
            );
        }
    }

    #[test]
    fn test_provenance_recorded() {
        let exp = create_experiment(&[("PC 34:1", [1.0, 2.0, 3.0]), ("PC 34:1", [3.0, 4.0, 5.0])]);
        let out = summarize_transitions(&exp, SummaryMethod::Average).unwrap();
        assert_eq!(
            out.provenance().last(),
            Some(&Provenance::Summarized {
                method: SummaryMethod::Average,
                features_before: 2,
                features_after: 1,
            })
        );
    }
}
