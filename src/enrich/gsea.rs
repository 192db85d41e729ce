//! Rank-based lipid set enrichment (GSEA-style running sum).
//!
//! Features are ranked by their differential statistic. For each set a
//! weighted running sum walks down the ranking, stepping up at set members
//! (by |metric|^weight) and down at non-members; the enrichment score (ES)
//! is its maximum deviation from zero. Significance comes from the ES of
//! random feature sets of the same size.
//!
//! # References
//!
//! Subramanian et al. (2005) "Gene set enrichment analysis" PNAS 102:15545

use super::sets::{LipidSets, SetKind};
use crate::correct::correct_bh;
use crate::data::DeResultSet;
use crate::error::{LipidError, Result};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Statistic used to rank features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    /// Log fold change.
    #[default]
    LogFc,
    /// Moderated t-statistic.
    T,
}

/// Enrichment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub rank_by: RankBy,
    /// Partitions to test.
    pub kinds: Vec<SetKind>,
    /// Smallest set tested.
    pub min_size: usize,
    /// Random sets per tested set.
    pub n_permutations: usize,
    /// Seed for random set draws.
    pub seed: u64,
    /// Exponent on |metric| for member steps (0 = unweighted).
    pub weight: f64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            rank_by: RankBy::LogFc,
            kinds: vec![SetKind::Class, SetKind::Unsaturation],
            min_size: 2,
            n_permutations: 1000,
            seed: 42,
            weight: 1.0,
        }
    }
}

/// Enrichment of one set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub set: String,
    pub kind: SetKind,
    /// Members present in the ranking.
    pub size: usize,
    pub enrichment_score: f64,
    /// ES divided by the mean null ES of the same sign.
    pub normalized_score: f64,
    pub p_value: f64,
    pub adj_p_value: f64,
    /// Members ranked at or before the running-sum peak.
    pub leading_edge: Vec<String>,
}

/// Enrichment of all sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResultSet {
    pub rank_by: RankBy,
    pub n_permutations: usize,
    pub results: Vec<EnrichmentResult>,
}

impl EnrichmentResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get_set(&self, name: &str) -> Option<&EnrichmentResult> {
        self.results.iter().find(|r| r.set == name)
    }

    /// Threshold view: adjusted p below `alpha`.
    pub fn significant(&self, alpha: f64) -> Vec<&EnrichmentResult> {
        self.results.iter().filter(|r| r.adj_p_value < alpha).collect()
    }

    /// Results sorted by raw p-value (ascending).
    pub fn sorted_by_pvalue(&self) -> Vec<&EnrichmentResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        sorted
    }

    /// Write one row per set; leading edge members are `;`-separated.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record([
            "set", "kind", "size", "ES", "NES", "P.Value", "adj.P.Val", "leading_edge",
        ])?;
        for r in &self.results {
            writer.write_record([
                r.set.clone(),
                r.kind.to_string(),
                r.size.to_string(),
                format!("{:.6}", r.enrichment_score),
                format!("{:.6}", r.normalized_score),
                format!("{:.6e}", r.p_value),
                format!("{:.6e}", r.adj_p_value),
                r.leading_edge.join(";"),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Xorshift64 generator for reproducible random set draws.
struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        // xorshift never leaves the zero state
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Partial Fisher-Yates: the first `k` entries become a uniform sample.
    fn sample(&mut self, slice: &mut [usize], k: usize) {
        let n = slice.len();
        for i in 0..k.min(n) {
            let j = i + (self.next_u64() as usize) % (n - i);
            slice.swap(i, j);
        }
    }
}

/// Running-sum ES over a ranked metric; returns `(es, peak_index)`.
fn running_es(metric: &[f64], hits: &[bool], weight: f64) -> (f64, usize) {
    let n = metric.len();
    let n_hits = hits.iter().filter(|&&h| h).count();
    let n_miss = n - n_hits;
    if n_hits == 0 || n_miss == 0 {
        return (0.0, 0);
    }

    let step = |i: usize| -> f64 {
        if weight == 0.0 {
            1.0
        } else {
            metric[i].abs().powf(weight)
        }
    };
    let mut n_r: f64 = (0..n).filter(|&i| hits[i]).map(step).sum();
    let unweighted = n_r <= 0.0;
    if unweighted {
        n_r = n_hits as f64;
    }
    let miss_step = 1.0 / n_miss as f64;

    let mut running = 0.0f64;
    let mut es = 0.0f64;
    let mut peak = 0;
    for i in 0..n {
        if hits[i] {
            running += if unweighted { 1.0 } else { step(i) } / n_r;
        } else {
            running -= miss_step;
        }
        if running.abs() > es.abs() {
            es = running;
            peak = i;
        }
    }
    (es, peak)
}

/// Test every set for enrichment at either end of the ranking.
///
/// Features with a non-finite ranking statistic are left out. A set
/// containing every ranked feature has ES 0 and p-value 1. P-values are
/// BH-adjusted across sets.
pub fn enrich(de: &DeResultSet, sets: &LipidSets, config: &EnrichmentConfig) -> Result<EnrichmentResultSet> {
    if config.n_permutations == 0 {
        return Err(LipidError::InvalidParameter(
            "enrichment needs at least one permutation".to_string(),
        ));
    }

    let mut ranked: Vec<(&str, f64)> = de
        .iter()
        .map(|r| {
            let metric = match config.rank_by {
                RankBy::LogFc => r.log_fc,
                RankBy::T => r.t,
            };
            (r.feature_id.as_str(), metric)
        })
        .filter(|(_, m)| m.is_finite())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let n = ranked.len();
    // Rows sharing a molecule name all map to the same set member
    let mut position: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, (id, _)) in ranked.iter().enumerate() {
        position.entry(*id).or_default().push(i);
    }
    let metric: Vec<f64> = ranked.iter().map(|(_, m)| *m).collect();

    debug!("Ranking {} features by {:?} for {} sets", n, config.rank_by, sets.len());

    let tested: Vec<(usize, Vec<usize>)> = sets
        .iter()
        .enumerate()
        .filter_map(|(s, set)| {
            let mut members: Vec<usize> = set
                .members
                .iter()
                .filter_map(|m| position.get(m.as_str()))
                .flatten()
                .copied()
                .collect();
            members.sort_unstable();
            members.dedup();
            (members.len() >= config.min_size.max(1)).then_some((s, members))
        })
        .collect();

    let mut results: Vec<EnrichmentResult> = tested
        .par_iter()
        .map(|(s, members)| {
            let set = &sets.sets[*s];
            let size = members.len();
            if size == n {
                return EnrichmentResult {
                    set: set.name.clone(),
                    kind: set.kind,
                    size,
                    enrichment_score: 0.0,
                    normalized_score: 0.0,
                    p_value: 1.0,
                    adj_p_value: 1.0,
                    leading_edge: Vec::new(),
                };
            }

            let mut hits = vec![false; n];
            for &i in members {
                hits[i] = true;
            }
            let (es, peak) = running_es(&metric, &hits, config.weight);

            let mut rng = SimpleRng::new(config.seed.wrapping_add(*s as u64));
            let mut pool: Vec<usize> = (0..n).collect();
            let mut null_hits = vec![false; n];
            let null: Vec<f64> = (0..config.n_permutations)
                .map(|_| {
                    rng.sample(&mut pool, size);
                    null_hits.iter_mut().for_each(|h| *h = false);
                    for &i in &pool[..size] {
                        null_hits[i] = true;
                    }
                    running_es(&metric, &null_hits, config.weight).0
                })
                .collect();

            let (p_value, normalized_score) = if es == 0.0 {
                (1.0, 0.0)
            } else {
                let same_sign: Vec<f64> = null.iter().copied().filter(|v| v.signum() == es.signum() && *v != 0.0).collect();
                let extreme = same_sign.iter().filter(|v| v.abs() >= es.abs()).count();
                let p = (extreme + 1) as f64 / (same_sign.len() + 1) as f64;
                let mean_abs = if same_sign.is_empty() {
                    f64::NAN
                } else {
                    same_sign.iter().map(|v| v.abs()).sum::<f64>() / same_sign.len() as f64
                };
                (p.min(1.0), es / mean_abs)
            };

            let leading_edge = members
                .iter()
                .filter(|&&i| if es >= 0.0 { i <= peak } else { i >= peak })
                .map(|&i| ranked[i].0.to_string())
                .collect();

            EnrichmentResult {
                set: set.name.clone(),
                kind: set.kind,
                size,
                enrichment_score: es,
                normalized_score,
                p_value,
                adj_p_value: f64::NAN,
                leading_edge,
            }
        })
        .collect();

    let p_values: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    let names: Vec<String> = results.iter().map(|r| r.set.clone()).collect();
    let bh = correct_bh(&p_values, &names);
    for (r, q) in results.iter_mut().zip(bh.q_values.iter().copied()) {
        r.adj_p_value = q;
    }

    info!(
        "Enrichment: {} set(s) tested, {} with adj.P < 0.05",
        results.len(),
        bh.n_significant(0.05)
    );

    Ok(EnrichmentResultSet {
        rank_by: config.rank_by,
        n_permutations: config.n_permutations,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Contrast, DeResult};
    use crate::enrich::LipidSet;
    use approx::assert_relative_eq;

    fn de_set(rows: &[(&str, &str, f64)]) -> DeResultSet {
        DeResultSet {
            contrast: Contrast::new("KO", "WT"),
            measure: "Area".to_string(),
            df_prior: f64::INFINITY,
            s2_prior: 0.1,
            results: rows
                .iter()
                .map(|(id, class, lfc)| DeResult {
                    feature_id: id.to_string(),
                    class: class.to_string(),
                    total_chain_length: None,
                    total_unsaturation: None,
                    contrast: "KO - WT".to_string(),
                    log_fc: *lfc,
                    ave_expr: 0.0,
                    t: *lfc * 2.0,
                    df: 10.0,
                    p_value: 0.5,
                    adj_p_value: 0.5,
                })
                .collect(),
        }
    }

    fn create_de() -> DeResultSet {
        let mut rows = vec![
            ("PC 32:0", "PC", 3.0),
            ("PC 34:1", "PC", 2.8),
            ("PC 36:2", "PC", 2.5),
            ("PC 38:4", "PC", 2.2),
        ];
        let others = [
            "PE 34:1", "PE 36:2", "PE 38:4", "PE 40:6", "TG 50:1", "TG 52:2", "TG 54:3", "TG 56:4",
            "SM 34:1", "SM 36:1", "SM 42:2", "Cer 42:1",
        ];
        for (i, id) in others.iter().enumerate() {
            let class = id.split(' ').next().unwrap_or("X");
            rows.push((id, class, 0.3 - 0.1 * i as f64));
        }
        de_set(&rows)
    }

    #[test]
    fn test_running_es() {
        // Hits at the top of a flat ranking
        let metric = vec![1.0; 4];
        let (es, peak) = running_es(&metric, &[true, true, false, false], 1.0);
        assert_relative_eq!(es, 1.0);
        assert_eq!(peak, 1);
        // Hits at the bottom
        let (es, _) = running_es(&metric, &[false, false, true, true], 1.0);
        assert_relative_eq!(es, -1.0);
    }

    #[test]
    fn test_top_ranked_class_enriched() {
        let de = create_de();
        let sets = LipidSets::from_results(&de.results, &[SetKind::Class], 2);
        let config = EnrichmentConfig {
            n_permutations: 2000,
            ..Default::default()
        };
        let result = enrich(&de, &sets, &config).unwrap();

        let pc = result.get_set("Class_PC").unwrap();
        assert_eq!(pc.size, 4);
        assert_relative_eq!(pc.enrichment_score, 1.0, epsilon = 1e-12);
        assert!(pc.normalized_score > 1.0);
        assert!(pc.p_value < 0.01);
        assert_eq!(pc.leading_edge.len(), 4);
        assert!(pc.adj_p_value >= pc.p_value);
        for r in &result.results {
            assert!(r.adj_p_value >= r.p_value);
        }
    }

    #[test]
    fn test_full_set_not_enriched() {
        let de = create_de();
        let all: Vec<String> = de.iter().map(|r| r.feature_id.clone()).collect();
        let sets = LipidSets {
            sets: vec![LipidSet {
                name: "everything".to_string(),
                kind: SetKind::Custom,
                members: all,
            }],
        };
        let result = enrich(&de, &sets, &EnrichmentConfig::default()).unwrap();
        let r = &result.results[0];
        assert_eq!(r.enrichment_score, 0.0);
        assert_eq!(r.p_value, 1.0);
        assert_eq!(r.adj_p_value, 1.0);
    }

    #[test]
    fn test_full_set_with_duplicate_rows_not_enriched() {
        // Unsummarized exports repeat a molecule once per transition
        let de = de_set(&[
            ("PC 34:1", "PC", 2.0),
            ("PE 36:2", "PE", 1.0),
            ("PC 34:1", "PC", 0.5),
            ("TG 52:2", "TG", -0.5),
            ("SM 34:1", "SM", -1.5),
        ]);
        let mut members: Vec<String> = de.iter().map(|r| r.feature_id.clone()).collect();
        members.dedup();
        let sets = LipidSets {
            sets: vec![LipidSet {
                name: "everything".to_string(),
                kind: SetKind::Custom,
                members,
            }],
        };
        let result = enrich(&de, &sets, &EnrichmentConfig::default()).unwrap();
        let r = &result.results[0];
        assert_eq!(r.size, 5);
        assert_eq!(r.enrichment_score, 0.0);
        assert_eq!(r.p_value, 1.0);
    }

    #[test]
    fn test_duplicate_member_counts_every_row() {
        let de = de_set(&[
            ("PC 34:1", "PC", 2.0),
            ("PE 36:2", "PE", 1.0),
            ("PC 34:1", "PC", 0.5),
            ("TG 52:2", "TG", -0.5),
        ]);
        let sets = LipidSets {
            sets: vec![LipidSet {
                name: "pc".to_string(),
                kind: SetKind::Custom,
                members: vec!["PC 34:1".to_string()],
            }],
        };
        let config = EnrichmentConfig {
            min_size: 1,
            n_permutations: 50,
            ..Default::default()
        };
        let result = enrich(&de, &sets, &config).unwrap();
        assert_eq!(result.results[0].size, 2);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let de = create_de();
        let sets = LipidSets::from_results(&de.results, &[SetKind::Class], 2);
        let config = EnrichmentConfig {
            n_permutations: 200,
            ..Default::default()
        };
        let a = enrich(&de, &sets, &config).unwrap();
        let b = enrich(&de, &sets, &config).unwrap();
        for (x, y) in a.results.iter().zip(&b.results) {
            assert_eq!(x.p_value, y.p_value);
        }
    }

    #[test]
    fn test_zero_permutations_rejected() {
        let de = create_de();
        let sets = LipidSets::from_results(&de.results, &[SetKind::Class], 2);
        let config = EnrichmentConfig {
            n_permutations: 0,
            ..Default::default()
        };
        assert!(enrich(&de, &sets, &config).is_err());
    }
}
