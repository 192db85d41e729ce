//! Lipid set enrichment analysis.
//!
//! Features are grouped into sets by class, unsaturation or chain length
//! ([`LipidSets`]), and each set is tested for concentration at either end
//! of the differential ranking ([`enrich`]).

pub mod gsea;
pub mod sets;

pub use gsea::{enrich, EnrichmentConfig, EnrichmentResult, EnrichmentResultSet, RankBy};
pub use sets::{LipidSet, LipidSets, SetKind};
