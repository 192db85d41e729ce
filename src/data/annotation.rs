//! Sample annotation: group labels and secondary grouping joined onto samples.

use crate::error::{LipidError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Per-sample metadata carried by an [`Experiment`](super::Experiment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    /// Sample identifier (column name in the intensity export).
    pub sample_id: String,
    /// Group label. `None` when the sample was not annotated.
    pub group: Option<String>,
    /// Optional batch / secondary grouping.
    pub batch: Option<String>,
    /// Pooled QC injection.
    pub is_qc: bool,
    /// Additional annotation columns passed through unchanged.
    pub extra: BTreeMap<String, String>,
}

impl SampleInfo {
    /// An unannotated sample.
    pub fn new(sample_id: &str) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            group: None,
            batch: None,
            is_qc: false,
            extra: BTreeMap::new(),
        }
    }

    /// Builder-style group assignment.
    pub fn with_group(mut self, group: &str) -> Self {
        self.is_qc = self.is_qc || group.eq_ignore_ascii_case("qc");
        self.group = Some(group.to_string());
        self
    }

    /// Whether the sample carries the given group label.
    pub fn in_group(&self, label: &str) -> bool {
        self.group.as_deref() == Some(label)
    }
}

/// One row of an annotation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub group: Option<String>,
    pub batch: Option<String>,
    pub is_qc: bool,
    pub extra: BTreeMap<String, String>,
}

/// Mapping from sample identifier to group label and secondary grouping.
#[derive(Debug, Clone, Default)]
pub struct SampleAnnotation {
    /// Sample IDs in file order.
    sample_ids: Vec<String>,
    /// Rows keyed by sample ID.
    rows: HashMap<String, AnnotationRow>,
    /// Names of the pass-through columns.
    extra_columns: Vec<String>,
}

fn is_missing(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("na") || v.eq_ignore_ascii_case("nan")
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "t"
    )
}

impl SampleAnnotation {
    /// Create an empty annotation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a sample's group label.
    pub fn insert(&mut self, sample_id: &str, group: &str) {
        if !self.rows.contains_key(sample_id) {
            self.sample_ids.push(sample_id.to_string());
        }
        self.rows.insert(
            sample_id.to_string(),
            AnnotationRow {
                group: Some(group.to_string()),
                batch: None,
                is_qc: group.eq_ignore_ascii_case("qc"),
                extra: BTreeMap::new(),
            },
        );
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, sample_id: &str, group: &str) -> Self {
        self.insert(sample_id, group);
        self
    }

    /// Load an annotation table.
    ///
    /// Expected format: a header containing `SampleID` and `Group` (matched
    /// case-insensitively). `Batch` and `QC` columns are recognised; every
    /// other column is passed through to [`SampleInfo::extra`].
    /// Files ending in `.tsv`/`.txt` are tab-delimited, everything else is CSV.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(super::delimiter_for(path))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let find = |names: &[&str]| {
            headers.iter().position(|h| {
                let norm = h.to_ascii_lowercase().replace([' ', '_'], "");
                names.iter().any(|n| norm == *n)
            })
        };

        let id_col = find(&["sampleid", "sample"]).ok_or_else(|| {
            LipidError::UnmatchedSample(format!(
                "annotation file {} has no 'SampleID' column (found: {:?})",
                path.display(),
                headers
            ))
        })?;
        let group_col = find(&["group"]).ok_or_else(|| {
            LipidError::UnmatchedSample(format!(
                "annotation file {} has no 'Group' column (found: {:?})",
                path.display(),
                headers
            ))
        })?;
        let batch_col = find(&["batch"]);
        let qc_col = find(&["qc", "isqc"]);

        let extra_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_col && *i != group_col && Some(*i) != batch_col && Some(*i) != qc_col)
            .map(|(i, h)| (i, h.clone()))
            .collect();

        let mut annotation = Self {
            sample_ids: Vec::new(),
            rows: HashMap::new(),
            extra_columns: extra_columns.iter().map(|(_, h)| h.clone()).collect(),
        };

        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let sample_id = record.get(id_col).unwrap_or_default().trim();
            if sample_id.is_empty() {
                continue;
            }
            let group = record
                .get(group_col)
                .filter(|g| !is_missing(g))
                .map(|g| g.trim().to_string());
            let batch = batch_col
                .and_then(|c| record.get(c))
                .filter(|b| !is_missing(b))
                .map(|b| b.trim().to_string());
            let qc_flag = qc_col.and_then(|c| record.get(c)).map(is_truthy).unwrap_or(false);
            let is_qc = qc_flag
                || group
                    .as_deref()
                    .map(|g| g.eq_ignore_ascii_case("qc"))
                    .unwrap_or(false);
            let extra: BTreeMap<String, String> = extra_columns
                .iter()
                .filter_map(|(c, name)| record.get(*c).map(|v| (name.clone(), v.to_string())))
                .collect();

            if annotation.rows.contains_key(sample_id) {
                return Err(LipidError::malformed(
                    format!("{} row {}", path.display(), row_idx + 2),
                    format!("duplicate sample '{}'", sample_id),
                ));
            }
            annotation.sample_ids.push(sample_id.to_string());
            annotation.rows.insert(
                sample_id.to_string(),
                AnnotationRow {
                    group,
                    batch,
                    is_qc,
                    extra,
                },
            );
        }

        Ok(annotation)
    }

    /// Sample IDs in file order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Pass-through column names.
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    /// Number of annotated samples.
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    /// Look up a sample's annotation row.
    pub fn get(&self, sample_id: &str) -> Option<&AnnotationRow> {
        self.rows.get(sample_id)
    }

    /// Unique group labels, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .rows
            .values()
            .filter_map(|r| r.group.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        groups
    }
}
