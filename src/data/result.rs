//! Result types for differential testing.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A two-group contrast: effect sizes are `group_a − group_b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contrast {
    /// Numerator group (e.g. the knockout).
    pub group_a: String,
    /// Reference group (e.g. wild type).
    pub group_b: String,
}

impl Contrast {
    pub fn new(group_a: &str, group_b: &str) -> Self {
        Self {
            group_a: group_a.to_string(),
            group_b: group_b.to_string(),
        }
    }

    /// The same comparison in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            group_a: self.group_b.clone(),
            group_b: self.group_a.clone(),
        }
    }

    /// Display name, e.g. `KO - WT`.
    pub fn name(&self) -> String {
        format!("{} - {}", self.group_a, self.group_b)
    }
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Moderated test result for a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeResult {
    /// Molecule name.
    pub feature_id: String,
    /// Lipid class.
    pub class: String,
    /// Total chain length, when parseable from the name.
    pub total_chain_length: Option<u32>,
    /// Total double bonds, when parseable from the name.
    pub total_unsaturation: Option<u32>,
    /// Contrast label (`A - B`).
    pub contrast: String,
    /// Difference of group means on the analysed scale.
    pub log_fc: f64,
    /// Mean over samples in either group.
    pub ave_expr: f64,
    /// Moderated t-statistic.
    pub t: f64,
    /// Degrees of freedom used for the p-value (residual + prior).
    pub df: f64,
    /// Raw two-sided p-value.
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value.
    pub adj_p_value: f64,
}

impl DeResult {
    /// Whether the result passes an adjusted-p and |logFC| threshold.
    pub fn passes(&self, p_cutoff: f64, logfc_cutoff: f64) -> bool {
        self.adj_p_value < p_cutoff && self.log_fc.abs() > logfc_cutoff
    }
}

/// All per-feature results for one contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeResultSet {
    /// Contrast tested.
    pub contrast: Contrast,
    /// Measure that was tested.
    pub measure: String,
    /// Prior degrees of freedom from variance moderation.
    pub df_prior: f64,
    /// Prior variance from variance moderation.
    pub s2_prior: f64,
    /// One row per feature, in experiment row order.
    pub results: Vec<DeResult>,
}

impl DeResultSet {
    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &DeResult> {
        self.results.iter()
    }

    /// Get result for a specific feature.
    pub fn get_feature(&self, feature_id: &str) -> Option<&DeResult> {
        self.results.iter().find(|r| r.feature_id == feature_id)
    }

    /// Results sorted by raw p-value (ascending, NaN last).
    pub fn sorted_by_pvalue(&self) -> Vec<&DeResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        sorted
    }

    /// Results sorted by |logFC| (descending).
    pub fn sorted_by_effect(&self) -> Vec<&DeResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| b.log_fc.abs().total_cmp(&a.log_fc.abs()));
        sorted
    }

    /// Threshold view: adjusted p below `p_cutoff` and |logFC| above `logfc_cutoff`.
    pub fn significant(&self, p_cutoff: f64, logfc_cutoff: f64) -> Vec<&DeResult> {
        self.results
            .iter()
            .filter(|r| r.passes(p_cutoff, logfc_cutoff))
            .collect()
    }

    /// Significant and higher in `group_a`.
    pub fn up(&self, p_cutoff: f64, logfc_cutoff: f64) -> Vec<&DeResult> {
        self.significant(p_cutoff, logfc_cutoff)
            .into_iter()
            .filter(|r| r.log_fc > 0.0)
            .collect()
    }

    /// Significant and lower in `group_a`.
    pub fn down(&self, p_cutoff: f64, logfc_cutoff: f64) -> Vec<&DeResult> {
        self.significant(p_cutoff, logfc_cutoff)
            .into_iter()
            .filter(|r| r.log_fc < 0.0)
            .collect()
    }

    /// Count significant results at the usual adjusted-p thresholds.
    pub fn summary(&self) -> DeSummary {
        let count = |alpha: f64| self.results.iter().filter(|r| r.adj_p_value < alpha).count();
        DeSummary {
            contrast: self.contrast.name(),
            total: self.len(),
            significant_001: count(0.001),
            significant_01: count(0.01),
            significant_05: count(0.05),
            significant_10: count(0.10),
        }
    }

    /// Write results as a table (comma- or tab-delimited by extension).
    ///
    /// Columns: `feature_id, class, total_cl, total_cs, contrast, logFC,
    /// AveExpr, t, df, P.Value, adj.P.Val`.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(super::delimiter_for(path))
            .from_path(path)?;
        writer.write_record([
            "feature_id",
            "class",
            "total_cl",
            "total_cs",
            "contrast",
            "logFC",
            "AveExpr",
            "t",
            "df",
            "P.Value",
            "adj.P.Val",
        ])?;
        for r in &self.results {
            writer.write_record([
                r.feature_id.clone(),
                r.class.clone(),
                r.total_chain_length.map(|v| v.to_string()).unwrap_or_default(),
                r.total_unsaturation.map(|v| v.to_string()).unwrap_or_default(),
                r.contrast.clone(),
                format!("{:.6}", r.log_fc),
                format!("{:.6}", r.ave_expr),
                format!("{:.4}", r.t),
                format!("{:.2}", r.df),
                format!("{:.3e}", r.p_value),
                format!("{:.3e}", r.adj_p_value),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Summary counts for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeSummary {
    pub contrast: String,
    pub total: usize,
    pub significant_001: usize,
    pub significant_01: usize,
    pub significant_05: usize,
    pub significant_10: usize,
}

impl std::fmt::Display for DeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Contrast: {}", self.contrast)?;
        writeln!(f, "Total features tested: {}", self.total)?;
        writeln!(f, "Significant at adj.P < 0.001: {}", self.significant_001)?;
        writeln!(f, "Significant at adj.P < 0.01:  {}", self.significant_01)?;
        writeln!(f, "Significant at adj.P < 0.05:  {}", self.significant_05)?;
        writeln!(f, "Significant at adj.P < 0.10:  {}", self.significant_10)?;
        Ok(())
    }
}
