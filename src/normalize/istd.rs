//! Internal standard (ISTD) normalization.
//!
//! Each lipid intensity is divided by the intensity of spiked internal
//! standards measured in the same sample. With class matching, a lipid is
//! scaled by the standards of its own class when any exist, and by the mean
//! of all standards otherwise. Standard rows themselves are kept unscaled.

use super::{finish, NormalizeOptions, Normalizer};
use crate::data::{Experiment, FeatureInfo};
use crate::error::{LipidError, Result};
use log::{debug, info};
use nalgebra::DMatrix;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// How internal standards are recognised among the features.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IstdSelector {
    /// Features flagged as standards at load time (`ISTD` column or name tag).
    #[default]
    Flagged,
    /// Molecule names matching a regular expression.
    Pattern(String),
    /// An explicit list of molecule names.
    Molecules(Vec<String>),
}

/// ISTD strategy.
#[derive(Debug, Clone)]
pub struct InternalStandard {
    selector: IstdSelector,
    pattern: Option<Regex>,
    match_class: bool,
}

impl InternalStandard {
    /// Create the strategy, compiling a pattern selector up front.
    pub fn new(selector: IstdSelector) -> Result<Self> {
        let pattern = match &selector {
            IstdSelector::Pattern(p) => Some(Regex::new(p).map_err(|e| {
                LipidError::InvalidParameter(format!("invalid ISTD pattern '{}': {}", p, e))
            })?),
            _ => None,
        };
        Ok(Self {
            selector,
            pattern,
            match_class: true,
        })
    }

    /// Whether lipids are scaled by standards of their own class.
    pub fn match_class(mut self, enabled: bool) -> Self {
        self.match_class = enabled;
        self
    }

    fn is_standard(&self, feature: &FeatureInfo) -> bool {
        match &self.selector {
            IstdSelector::Flagged => feature.is_istd,
            IstdSelector::Pattern(_) => self
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(&feature.molecule)),
            IstdSelector::Molecules(names) => names.iter().any(|n| n == &feature.molecule),
        }
    }

    /// Row indices of the selected standards.
    pub fn standards(&self, exp: &Experiment) -> Vec<usize> {
        exp.features()
            .iter()
            .enumerate()
            .filter(|(_, f)| self.is_standard(f))
            .map(|(i, _)| i)
            .collect()
    }
}

fn mean(data: &DMatrix<f64>, rows: &[usize], j: usize) -> f64 {
    rows.iter().map(|&i| data[(i, j)]).sum::<f64>() / rows.len() as f64
}

impl Normalizer for InternalStandard {
    fn name(&self) -> &'static str {
        "istd"
    }

    fn normalize(&self, exp: &Experiment, options: &NormalizeOptions) -> Result<Experiment> {
        let data = exp.measure(&options.measure)?;
        let standards = self.standards(exp);
        if standards.is_empty() {
            return Err(LipidError::MissingStandard(format!(
                "no feature matches ISTD selector {:?}",
                self.selector
            )));
        }

        for &i in &standards {
            for j in 0..exp.n_samples() {
                let v = data[(i, j)];
                if !v.is_finite() || v <= 0.0 {
                    return Err(LipidError::InvalidValue {
                        stage: "ISTD normalization".to_string(),
                        feature: exp.features()[i].molecule.clone(),
                        sample: exp.samples()[j].sample_id.clone(),
                        value: v,
                    });
                }
            }
        }

        let mut by_class: HashMap<&str, Vec<usize>> = HashMap::new();
        for &i in &standards {
            by_class
                .entry(exp.features()[i].class.as_str())
                .or_default()
                .push(i);
        }
        debug!(
            "{} internal standard(s) covering classes {:?}",
            standards.len(),
            by_class.keys().collect::<Vec<_>>()
        );

        let overall: Vec<f64> = (0..exp.n_samples()).map(|j| mean(data, &standards, j)).collect();

        let class_factors: BTreeMap<String, Vec<f64>> = if self.match_class {
            by_class
                .iter()
                .map(|(class, rows)| {
                    let factors = (0..exp.n_samples()).map(|j| mean(data, rows, j)).collect();
                    (class.to_string(), factors)
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut normalized = data.clone();
        for (i, feature) in exp.features().iter().enumerate() {
            if standards.contains(&i) {
                continue;
            }
            let factors = class_factors
                .get(feature.class.as_str())
                .unwrap_or(&overall);
            for j in 0..exp.n_samples() {
                normalized[(i, j)] /= factors[j];
            }
        }

        info!(
            "ISTD normalized '{}' with {} standard(s){}",
            options.measure,
            standards.len(),
            if self.match_class { ", class-matched" } else { "" }
        );
        finish(exp, normalized, self.name(), options, overall, class_factors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleInfo;
    use approx::assert_relative_eq;

    fn create_experiment() -> Experiment {
        let data = DMatrix::from_row_slice(
            4,
            2,
            &[
                100.0, 300.0, // PC 34:1
                40.0, 80.0, // PE 36:2
                10.0, 20.0, // PC ISTD
                30.0, 60.0, // PE ISTD (flagged via name tag)
            ],
        );
        let features = vec![
            FeatureInfo::from_molecule("PC 34:1"),
            FeatureInfo::from_molecule("PE 36:2"),
            FeatureInfo::from_molecule("PC 15:0-18:1").with_istd(true),
            FeatureInfo::from_molecule("PE 15:0-18:1(d7)"),
        ];
        let samples = vec![SampleInfo::new("S1"), SampleInfo::new("S2")];
        Experiment::new("Area", data, features, samples).unwrap()
    }

    #[test]
    fn test_class_matched() {
        let exp = create_experiment();
        let istd = InternalStandard::new(IstdSelector::Flagged).unwrap();
        assert_eq!(istd.standards(&exp), vec![2, 3]);

        let out = istd.normalize(&exp, &NormalizeOptions::new("Area").linear()).unwrap();
        let area = out.measure("Area").unwrap();
        assert_relative_eq!(area[(0, 0)], 10.0);
        assert_relative_eq!(area[(0, 1)], 15.0);
        assert_relative_eq!(area[(1, 0)], 40.0 / 30.0);
        // Standards kept raw
        assert_relative_eq!(area[(2, 1)], 20.0);
        assert_eq!(out.n_features(), 4);
    }

    #[test]
    fn test_class_matched_factors_recorded() {
        let exp = create_experiment();
        let istd = InternalStandard::new(IstdSelector::Flagged).unwrap();
        let out = istd.normalize(&exp, &NormalizeOptions::new("Area").linear()).unwrap();
        let record = out.normalization().unwrap();
        assert_eq!(record.factors, vec![20.0, 40.0]);
        assert_eq!(record.class_factors.len(), 2);
        assert_eq!(record.class_factors["PC"], vec![10.0, 20.0]);
        assert_eq!(record.class_factors["PE"], vec![30.0, 60.0]);

        // Factors reported for PC are the ones PC 34:1 was scaled by
        let area = out.measure("Area").unwrap();
        assert_relative_eq!(area[(0, 1)], 300.0 / record.class_factors["PC"][1]);

        let unmatched = InternalStandard::new(IstdSelector::Flagged).unwrap().match_class(false);
        let out = unmatched.normalize(&exp, &NormalizeOptions::new("Area").linear()).unwrap();
        assert!(out.normalization().unwrap().class_factors.is_empty());
    }

    #[test]
    fn test_unmatched_class_uses_all_standards() {
        let exp = create_experiment();
        let istd = InternalStandard::new(IstdSelector::Molecules(vec!["PC 15:0-18:1".into()]))
            .unwrap();
        let out = istd.normalize(&exp, &NormalizeOptions::new("Area").linear()).unwrap();
        let area = out.measure("Area").unwrap();
        // PE has no PE standard selected: falls back to the PC standard
        assert_relative_eq!(area[(1, 0)], 4.0);
        assert_relative_eq!(area[(1, 1)], 4.0);
        // The unselected standard is treated as an ordinary lipid
        assert_relative_eq!(area[(3, 0)], 3.0);
    }

    #[test]
    fn test_without_class_matching() {
        let exp = create_experiment();
        let istd = InternalStandard::new(IstdSelector::Flagged).unwrap().match_class(false);
        let out = istd.normalize(&exp, &NormalizeOptions::new("Area").linear()).unwrap();
        let area = out.measure("Area").unwrap();
        assert_relative_eq!(area[(0, 0)], 100.0 / 20.0);
        assert_eq!(out.normalization().unwrap().factors, vec![20.0, 40.0]);
    }

    #[test]
    fn test_pattern_selector() {
        let exp = create_experiment();
        let istd = InternalStandard::new(IstdSelector::Pattern(r"15:0-18:1".into())).unwrap();
        assert_eq!(istd.standards(&exp), vec![2, 3]);
        assert!(InternalStandard::new(IstdSelector::Pattern("(".into())).is_err());
    }

    #[test]
    fn test_missing_standard() {
        let exp = create_experiment();
        let istd = InternalStandard::new(IstdSelector::Molecules(vec!["LPC 17:0".into()])).unwrap();
        let err = istd.normalize(&exp, &NormalizeOptions::new("Area")).unwrap_err();
        assert!(matches!(err, LipidError::MissingStandard(_)));
    }

    #[test]
    fn test_zero_standard_rejected() {
        let exp = create_experiment();
        let mut data = exp.measure("Area").unwrap().clone();
        data[(2, 1)] = 0.0;
        let exp = Experiment::new("Area", data, exp.features().to_vec(), exp.samples().to_vec())
            .unwrap();
        let istd = InternalStandard::new(IstdSelector::Flagged).unwrap();
        match istd.normalize(&exp, &NormalizeOptions::new("Area")).unwrap_err() {
            LipidError::InvalidValue { feature, sample, .. } => {
                assert_eq!(feature, "PC 15:0-18:1");
                assert_eq!(sample, "S2");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
