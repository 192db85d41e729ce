//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Identifiers in original order.
    pub ids: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (NaN where the raw p-value is NaN).
    pub q_values: Vec<f64>,
    /// Number of non-missing p-values.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get q-value for a specific identifier.
    pub fn get_qvalue(&self, id: &str) -> Option<f64> {
        let idx = self.ids.iter().position(|f| f == id)?;
        self.q_values.get(idx).copied()
    }

    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().filter(|&&q| q < alpha).count()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// For the i-th smallest of n p-values the adjusted value is
/// q[i] = min(p[i] · n / i, q[i+1]), capped at 1. Missing (NaN) p-values
/// do not count towards n and stay NaN.
pub fn correct_bh(p_values: &[f64], ids: &[String]) -> BhCorrected {
    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let n = indices.len();
    let mut q_values = vec![f64::NAN; p_values.len()];

    if n > 0 {
        indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

        let n_f64 = n as f64;
        let mut running = 1.0f64;
        // Start from the largest p-value and work backwards
        for (rank0, &orig) in indices.iter().enumerate().rev() {
            let adjusted = p_values[orig] * n_f64 / (rank0 + 1) as f64;
            running = running.min(adjusted).min(1.0);
            // p · n / i can round one ulp below p when i == n
            q_values[orig] = running.max(p_values[orig]);
        }
    }

    BhCorrected {
        ids: ids.to_vec(),
        p_values: p_values.to_vec(),
        q_values,
        n_tests: n,
    }
}
