//! The central experiment container: intensity matrices plus feature and sample metadata.

use super::{delimiter_for, parse_intensity, FeatureInfo, SampleAnnotation, SampleInfo};
use crate::error::{LipidError, Result};
use crate::normalize::NormalizationRecord;
use crate::summarize::SummaryMethod;
use log::{debug, info, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A record of how an experiment snapshot was derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Provenance {
    /// Loaded from an export file.
    Loaded { source: String, measure: String },
    /// An additional measure was loaded.
    MeasureAdded { source: String, measure: String },
    /// Sample annotation joined.
    Annotated { matched: usize, unmatched: Vec<String> },
    /// Duplicate transitions collapsed.
    Summarized {
        method: SummaryMethod,
        features_before: usize,
        features_after: usize,
    },
    /// Intensities rescaled.
    Normalized(NormalizationRecord),
}

/// Intensity matrices (features × samples) with their feature and sample metadata.
///
/// Experiments are snapshots: annotation, summarization and normalization
/// return a new `Experiment` and append to its provenance.
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Named measures (e.g. `Area`, `Height`), each features × samples.
    measures: BTreeMap<String, DMatrix<f64>>,
    /// One entry per matrix row.
    features: Vec<FeatureInfo>,
    /// One entry per matrix column.
    samples: Vec<SampleInfo>,
    /// Derivation history, oldest first.
    provenance: Vec<Provenance>,
}

/// Identifying (non-sample) columns of a wide export.
#[derive(Debug, Default)]
struct IdColumns {
    molecule: Option<usize>,
    class: Option<usize>,
    adduct: Option<usize>,
    retention_time: Option<usize>,
    istd: Option<usize>,
}

impl IdColumns {
    fn classify(headers: &[String]) -> Self {
        let mut cols = IdColumns::default();
        for (i, h) in headers.iter().enumerate() {
            let norm = h.to_ascii_lowercase().replace([' ', '_', '.'], "");
            match norm.as_str() {
                "molecule" | "moleculename" | "lipid" => cols.molecule = Some(i),
                "class" | "lipidclass" | "moleculelistname" => cols.class = Some(i),
                "adduct" | "precursoradduct" => cols.adduct = Some(i),
                "rt" | "retentiontime" => cols.retention_time = Some(i),
                "istd" | "isistd" => cols.istd = Some(i),
                _ => {}
            }
        }
        cols
    }

    fn contains(&self, idx: usize) -> bool {
        [
            self.molecule,
            self.class,
            self.adduct,
            self.retention_time,
            self.istd,
        ]
        .contains(&Some(idx))
    }
}

impl Experiment {
    /// Create an experiment from a single measure.
    pub fn new(
        measure: &str,
        data: DMatrix<f64>,
        features: Vec<FeatureInfo>,
        samples: Vec<SampleInfo>,
    ) -> Result<Self> {
        let mut measures = BTreeMap::new();
        measures.insert(measure.to_string(), data);
        Self::from_parts(measures, features, samples, Vec::new())
    }

    /// Create an experiment from all of its parts, validating dimensions.
    pub fn from_parts(
        measures: BTreeMap<String, DMatrix<f64>>,
        features: Vec<FeatureInfo>,
        samples: Vec<SampleInfo>,
        provenance: Vec<Provenance>,
    ) -> Result<Self> {
        if features.is_empty() || samples.is_empty() {
            return Err(LipidError::EmptyDataset(format!(
                "experiment has {} features and {} samples",
                features.len(),
                samples.len()
            )));
        }
        for data in measures.values() {
            if data.nrows() != features.len() {
                return Err(LipidError::DimensionMismatch {
                    expected: features.len(),
                    actual: data.nrows(),
                });
            }
            if data.ncols() != samples.len() {
                return Err(LipidError::DimensionMismatch {
                    expected: samples.len(),
                    actual: data.ncols(),
                });
            }
        }
        let mut seen = HashSet::new();
        for s in &samples {
            if !seen.insert(s.sample_id.as_str()) {
                return Err(LipidError::malformed(
                    "sample metadata",
                    format!("duplicate sample '{}'", s.sample_id),
                ));
            }
        }
        Ok(Self {
            measures,
            features,
            samples,
            provenance,
        })
    }

    /// Load a wide-format export: one row per feature, one column per sample.
    ///
    /// Identifying columns are recognised case-insensitively: `Molecule`
    /// (required), `Class`, `Adduct`, `RT`/`Retention Time` and `ISTD`. Every
    /// other column is a sample. Empty, `NA` and `#N/A` cells are stored as NaN.
    pub fn from_csv<P: AsRef<Path>>(path: P, measure: &str) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let (features, sample_ids, data) = read_wide_table(path)?;

        info!(
            "Loaded {} features x {} samples from {}",
            features.len(),
            sample_ids.len(),
            source
        );

        let samples = sample_ids.iter().map(|s| SampleInfo::new(s)).collect();
        let mut exp = Self::new(measure, data, features, samples)?;
        exp.provenance.push(Provenance::Loaded {
            source,
            measure: measure.to_string(),
        });
        Ok(exp)
    }

    /// Load a further measure for the same molecules and samples.
    ///
    /// Molecules and sample columns must match the experiment exactly.
    pub fn add_measure_from_csv<P: AsRef<Path>>(&self, path: P, measure: &str) -> Result<Self> {
        let path = path.as_ref();
        let (features, sample_ids, data) = read_wide_table(path)?;

        if features.len() != self.n_features() {
            return Err(LipidError::DimensionMismatch {
                expected: self.n_features(),
                actual: features.len(),
            });
        }
        for (a, b) in features.iter().zip(&self.features) {
            if a.molecule != b.molecule {
                return Err(LipidError::malformed(
                    path.display().to_string(),
                    format!("molecule '{}' does not match '{}'", a.molecule, b.molecule),
                ));
            }
        }
        if sample_ids != self.sample_ids() {
            return Err(LipidError::malformed(
                path.display().to_string(),
                "sample columns differ from the loaded experiment",
            ));
        }

        let mut next = self.clone();
        next.measures.insert(measure.to_string(), data);
        next.provenance.push(Provenance::MeasureAdded {
            source: path.display().to_string(),
            measure: measure.to_string(),
        });
        Ok(next)
    }

    /// Join group labels onto samples by exact sample ID.
    ///
    /// Samples absent from the annotation keep a `None` group; they remain
    /// in the experiment and are excluded only by group-requiring analyses.
    pub fn annotate(&self, annotation: &SampleAnnotation) -> Self {
        let mut next = self.clone();
        let mut unmatched = Vec::new();
        let mut matched = 0;

        for sample in next.samples.iter_mut() {
            match annotation.get(&sample.sample_id) {
                Some(row) => {
                    sample.group = row.group.clone();
                    sample.batch = row.batch.clone();
                    sample.is_qc = row.is_qc;
                    sample.extra = row.extra.clone();
                    matched += 1;
                }
                None => {
                    sample.group = None;
                    unmatched.push(sample.sample_id.clone());
                }
            }
        }

        if !unmatched.is_empty() {
            warn!(
                "{} sample(s) missing from annotation, left ungrouped: {:?}",
                unmatched.len(),
                unmatched
            );
        }
        let known: HashSet<&str> = self.samples.iter().map(|s| s.sample_id.as_str()).collect();
        let extra = annotation
            .sample_ids()
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .count();
        if extra > 0 {
            debug!("{} annotation row(s) have no matching sample", extra);
        }

        next.provenance.push(Provenance::Annotated { matched, unmatched });
        next
    }

    /// Get a measure matrix.
    pub fn measure(&self, name: &str) -> Result<&DMatrix<f64>> {
        self.measures
            .get(name)
            .ok_or_else(|| LipidError::MissingMeasure(name.to_string()))
    }

    /// Names of all loaded measures.
    pub fn measure_names(&self) -> Vec<&str> {
        self.measures.keys().map(String::as_str).collect()
    }

    /// All measures.
    pub fn measures(&self) -> &BTreeMap<String, DMatrix<f64>> {
        &self.measures
    }

    /// Number of features (rows).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn features(&self) -> &[FeatureInfo] {
        &self.features
    }

    #[inline]
    pub fn samples(&self) -> &[SampleInfo] {
        &self.samples
    }

    /// Molecule names in row order.
    pub fn feature_ids(&self) -> Vec<String> {
        self.features.iter().map(|f| f.molecule.clone()).collect()
    }

    /// Sample identifiers in column order.
    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.sample_id.clone()).collect()
    }

    /// Column indices of samples carrying a group label.
    pub fn group_indices(&self, label: &str) -> Vec<usize> {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.in_group(label))
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of samples with any group label.
    pub fn grouped_sample_count(&self) -> usize {
        self.samples.iter().filter(|s| s.group.is_some()).count()
    }

    /// Unique group labels, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .samples
            .iter()
            .filter_map(|s| s.group.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        groups
    }

    /// Derivation history.
    pub fn provenance(&self) -> &[Provenance] {
        &self.provenance
    }

    /// The most recent normalization applied, if any.
    pub fn normalization(&self) -> Option<&NormalizationRecord> {
        self.provenance.iter().rev().find_map(|p| match p {
            Provenance::Normalized(record) => Some(record),
            _ => None,
        })
    }

    /// Derive a snapshot with one measure replaced and a provenance entry appended.
    pub fn with_measure(&self, name: &str, data: DMatrix<f64>, step: Provenance) -> Result<Self> {
        if data.shape() != (self.n_features(), self.n_samples()) {
            return Err(LipidError::DimensionMismatch {
                expected: self.n_features() * self.n_samples(),
                actual: data.nrows() * data.ncols(),
            });
        }
        let mut next = self.clone();
        next.measures.insert(name.to_string(), data);
        next.provenance.push(step);
        Ok(next)
    }

    /// Subset to the given sample columns (in the given order).
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        for &j in indices {
            if j >= self.n_samples() {
                return Err(LipidError::InvalidParameter(format!(
                    "Sample index {} out of bounds",
                    j
                )));
            }
        }
        let measures = self
            .measures
            .iter()
            .map(|(name, m)| (name.clone(), m.select_columns(indices)))
            .collect();
        let samples = indices.iter().map(|&j| self.samples[j].clone()).collect();
        Self::from_parts(measures, self.features.clone(), samples, self.provenance.clone())
    }

    /// Subset to the given feature rows (in the given order).
    pub fn subset_features(&self, indices: &[usize]) -> Result<Self> {
        for &i in indices {
            if i >= self.n_features() {
                return Err(LipidError::InvalidParameter(format!(
                    "Feature index {} out of bounds",
                    i
                )));
            }
        }
        let measures = self
            .measures
            .iter()
            .map(|(name, m)| (name.clone(), m.select_rows(indices)))
            .collect();
        let features = indices.iter().map(|&i| self.features[i].clone()).collect();
        Self::from_parts(measures, features, self.samples.clone(), self.provenance.clone())
    }

    /// Write one measure as a wide table with identifying columns first.
    ///
    /// Missing values are written as `NA`.
    pub fn write_measure<P: AsRef<Path>>(&self, path: P, measure: &str) -> Result<()> {
        let path = path.as_ref();
        let data = self.measure(measure)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter_for(path))
            .from_path(path)?;

        let mut header = vec![
            "Molecule".to_string(),
            "Class".to_string(),
            "Adduct".to_string(),
            "RT".to_string(),
            "ISTD".to_string(),
        ];
        header.extend(self.sample_ids());
        writer.write_record(&header)?;

        for (i, f) in self.features.iter().enumerate() {
            let mut row = vec![
                f.molecule.clone(),
                f.class.clone(),
                f.adduct.clone().unwrap_or_default(),
                f.retention_time.map(|rt| rt.to_string()).unwrap_or_default(),
                f.is_istd.to_string(),
            ];
            row.extend((0..self.n_samples()).map(|j| format_value(data[(i, j)])));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub(crate) fn format_value(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        "NA".to_string()
    }
}

fn read_wide_table(path: &Path) -> Result<(Vec<FeatureInfo>, Vec<String>, DMatrix<f64>)> {
    let source = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let cols = IdColumns::classify(&headers);
    let molecule_col = cols.molecule.ok_or_else(|| {
        LipidError::malformed(
            source.clone(),
            format!("required identifying column 'Molecule' not found in {:?}", headers),
        )
    })?;

    let sample_cols: Vec<usize> = (0..headers.len()).filter(|&i| !cols.contains(i)).collect();
    let sample_ids: Vec<String> = sample_cols.iter().map(|&i| headers[i].clone()).collect();
    if sample_ids.is_empty() {
        return Err(LipidError::EmptyDataset(format!(
            "{} has no sample columns",
            source
        )));
    }

    let mut features = Vec::new();
    let mut values: Vec<f64> = Vec::new();

    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = row_idx + 2;
        let molecule = record.get(molecule_col).unwrap_or_default().trim();
        if molecule.is_empty() {
            return Err(LipidError::malformed(
                format!("{} line {}", source, line),
                "empty Molecule field",
            ));
        }

        let retention_time = match cols.retention_time.and_then(|c| record.get(c)) {
            Some(raw) => match parse_intensity(raw) {
                Some(v) if v.is_finite() => Some(v),
                Some(_) => None,
                None => {
                    return Err(LipidError::malformed(
                        format!("{} line {}", source, line),
                        format!("retention time '{}' is not numeric", raw),
                    ))
                }
            },
            None => None,
        };
        let is_istd = cols
            .istd
            .and_then(|c| record.get(c))
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "t"))
            .unwrap_or(false);

        let mut feature = FeatureInfo::from_molecule(molecule)
            .with_adduct(cols.adduct.and_then(|c| record.get(c)).map(str::to_string))
            .with_retention_time(retention_time)
            .with_istd(is_istd);
        if let Some(class) = cols.class.and_then(|c| record.get(c)) {
            feature = feature.with_class(class);
        }
        features.push(feature);

        for (&col, sample) in sample_cols.iter().zip(&sample_ids) {
            let raw = record.get(col).unwrap_or_default();
            let value = parse_intensity(raw).ok_or_else(|| {
                LipidError::malformed(
                    format!("{} line {}", source, line),
                    format!(
                        "value '{}' for molecule '{}' in sample '{}' is not numeric",
                        raw, molecule, sample
                    ),
                )
            })?;
            values.push(value);
        }
    }

    if features.is_empty() {
        return Err(LipidError::EmptyDataset(format!(
            "{} contains no feature rows",
            source
        )));
    }

    let data = DMatrix::from_row_slice(features.len(), sample_ids.len(), &values);
    Ok((features, sample_ids, data))
}
