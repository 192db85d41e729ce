//! Data structures for lipidomics experiments.

mod annotation;
mod experiment;
mod feature;
mod result;

pub use annotation::{AnnotationRow, SampleAnnotation, SampleInfo};
pub use experiment::{Experiment, Provenance};
pub use feature::{parse_molecule_name, FeatureInfo, ParsedMolecule};
pub use result::{Contrast, DeResult, DeResultSet, DeSummary};

use std::path::Path;

/// Field delimiter implied by a file extension: tab for `.tsv`/`.txt`, comma otherwise.
pub(crate) fn delimiter_for(path: &Path) -> u8 {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("txt") | Some("tab") => b'\t',
        _ => b',',
    }
}

/// Parse an intensity cell. Empty and NA-like cells are missing (NaN).
pub(crate) fn parse_intensity(raw: &str) -> Option<f64> {
    let v = raw.trim();
    if v.is_empty()
        || v.eq_ignore_ascii_case("na")
        || v.eq_ignore_ascii_case("nan")
        || v.eq_ignore_ascii_case("#n/a")
        || v.eq_ignore_ascii_case("n/a")
    {
        return Some(f64::NAN);
    }
    v.parse::<f64>().ok()
}
