//! Lipid sets: partitions of features by class, unsaturation or chain length.

use crate::data::DeResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grouping criterion that produced a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetKind {
    /// Lipid class, e.g. `Class_PC`.
    Class,
    /// Total double bonds, e.g. `total_cs_1`.
    Unsaturation,
    /// Total chain length, e.g. `total_cl_34`.
    ChainLength,
    /// User-supplied partition.
    Custom,
}

impl SetKind {
    /// Set name for a key of this kind.
    fn set_name(&self, key: &str) -> String {
        match self {
            SetKind::Class => format!("Class_{}", key),
            SetKind::Unsaturation => format!("total_cs_{}", key),
            SetKind::ChainLength => format!("total_cl_{}", key),
            SetKind::Custom => key.to_string(),
        }
    }

    /// Key of a result under this kind, if the feature has one.
    fn key(&self, result: &DeResult) -> Option<String> {
        match self {
            SetKind::Class => Some(result.class.clone()),
            SetKind::Unsaturation => result.total_unsaturation.map(|v| v.to_string()),
            SetKind::ChainLength => result.total_chain_length.map(|v| v.to_string()),
            SetKind::Custom => None,
        }
    }
}

impl std::fmt::Display for SetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetKind::Class => "class",
            SetKind::Unsaturation => "unsaturation",
            SetKind::ChainLength => "chain_length",
            SetKind::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// A named group of features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LipidSet {
    pub name: String,
    pub kind: SetKind,
    /// Feature IDs belonging to the set.
    pub members: Vec<String>,
}

impl LipidSet {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A collection of lipid sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LipidSets {
    pub sets: Vec<LipidSet>,
}

impl LipidSets {
    /// Partition tested features by each requested kind.
    ///
    /// Sets smaller than `min_size` are dropped. Features without a parsed
    /// chain length or unsaturation are left out of those partitions.
    pub fn from_results(results: &[DeResult], kinds: &[SetKind], min_size: usize) -> Self {
        let mut sets = Vec::new();
        for kind in kinds {
            let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for r in results {
                if let Some(key) = kind.key(r) {
                    groups.entry(key).or_default().push(r.feature_id.clone());
                }
            }
            let mut keyed: Vec<(String, Vec<String>)> = groups
                .into_iter()
                .filter(|(_, members)| members.len() >= min_size)
                .collect();
            // Numeric keys in numeric order
            keyed.sort_by(|(a, _), (b, _)| match (a.parse::<u32>(), b.parse::<u32>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.cmp(b),
            });
            sets.extend(keyed.into_iter().map(|(key, members)| LipidSet {
                name: kind.set_name(&key),
                kind: *kind,
                members,
            }));
        }
        Self { sets }
    }

    /// Sets from an arbitrary named partition.
    pub fn custom(partition: BTreeMap<String, Vec<String>>, min_size: usize) -> Self {
        let sets = partition
            .into_iter()
            .filter(|(_, members)| members.len() >= min_size)
            .map(|(name, members)| LipidSet {
                name,
                kind: SetKind::Custom,
                members,
            })
            .collect();
        Self { sets }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LipidSet> {
        self.sets.iter()
    }

    /// Get a set by name.
    pub fn get(&self, name: &str) -> Option<&LipidSet> {
        self.sets.iter().find(|s| s.name == name)
    }
}
