//! Feature (lipid molecule) annotation parsed from instrument exports.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Metadata for one row of the intensity matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    /// Molecule name as exported, e.g. `PC 34:1`. Used as the analyte identity.
    pub molecule: String,
    /// Lipid class, e.g. `PC`, `PE O`, `Cer`.
    pub class: String,
    /// Precursor adduct, e.g. `[M+H]1+`.
    pub adduct: Option<String>,
    /// Retention time in minutes.
    pub retention_time: Option<f64>,
    /// Sum of acyl chain lengths.
    pub total_chain_length: Option<u32>,
    /// Sum of chain double bonds.
    pub total_unsaturation: Option<u32>,
    /// Whether this feature is a spiked-in internal standard.
    pub is_istd: bool,
}

impl FeatureInfo {
    /// Build feature metadata from a molecule name alone.
    ///
    /// Class, chain length, unsaturation and the internal-standard flag are
    /// derived from the name.
    pub fn from_molecule(molecule: &str) -> Self {
        let parsed = parse_molecule_name(molecule);
        Self {
            molecule: molecule.to_string(),
            class: parsed.class,
            adduct: None,
            retention_time: None,
            total_chain_length: parsed.total_chain_length,
            total_unsaturation: parsed.total_unsaturation,
            is_istd: parsed.is_istd,
        }
    }

    /// Override the parsed class with an explicit one.
    pub fn with_class(mut self, class: &str) -> Self {
        let class = class.trim();
        if !class.is_empty() {
            self.class = class.to_string();
        }
        self
    }

    pub fn with_adduct(mut self, adduct: Option<String>) -> Self {
        self.adduct = adduct.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_retention_time(mut self, rt: Option<f64>) -> Self {
        self.retention_time = rt;
        self
    }

    /// Mark as internal standard (an explicit flag only ever adds to name detection).
    pub fn with_istd(mut self, is_istd: bool) -> Self {
        self.is_istd = self.is_istd || is_istd;
        self
    }
}

/// Structured view of a lipid molecule name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMolecule {
    pub class: String,
    pub total_chain_length: Option<u32>,
    pub total_unsaturation: Option<u32>,
    pub is_istd: bool,
}

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9]*(?:-[A-Za-z]+)?)(?:\s*\(?\s*([OP])-)?")
            .expect("class pattern is valid")
    })
}

fn chain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+):(\d+)").expect("chain pattern is valid"))
}

fn istd_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\(d\d+\)|\bistd\b|\(is\)").expect("istd pattern is valid"))
}

/// Parse class and chain composition from a molecule name.
///
/// Handles the common shorthand forms:
/// - `PC 34:1`, `PC(34:1)` → class `PC`, 34 carbons, 1 double bond
/// - `PE 18:0_20:4` → chains summed to 38:4
/// - `Cer d18:1/16:0` → 34:1
/// - `PC O-34:1` → class `PC O`
/// - `PC 15:0-18:1(d7)` → flagged as internal standard
pub fn parse_molecule_name(name: &str) -> ParsedMolecule {
    let is_istd = istd_regex().is_match(name);
    let stripped = istd_regex().replace_all(name, "");

    let class = match class_regex().captures(&stripped) {
        Some(caps) => {
            let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            match caps.get(2) {
                Some(link) => format!("{} {}", base, link.as_str()),
                None => base.to_string(),
            }
        }
        None => String::new(),
    };
    let class = if class.is_empty() {
        "Unknown".to_string()
    } else {
        class
    };

    let mut total_cl = 0u32;
    let mut total_cs = 0u32;
    let mut n_chains = 0usize;
    for caps in chain_regex().captures_iter(&stripped) {
        let cl = caps[1].parse::<u32>();
        let cs = caps[2].parse::<u32>();
        if let (Ok(cl), Ok(cs)) = (cl, cs) {
            total_cl += cl;
            total_cs += cs;
            n_chains += 1;
        }
    }

    let (total_chain_length, total_unsaturation) = if n_chains > 0 {
        (Some(total_cl), Some(total_cs))
    } else {
        (None, None)
    };

    ParsedMolecule {
        class,
        total_chain_length,
        total_unsaturation,
        is_istd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sum_composition() {
        let p = parse_molecule_name("PC 34:1");
        assert_eq!(p.class, "PC");
        assert_eq!(p.total_chain_length, Some(34));
        assert_eq!(p.total_unsaturation, Some(1));
        assert!(!p.is_istd);
    }

    #[test]
    fn test_parse_parenthesised() {
        let p = parse_molecule_name("PC(32:0)");
        assert_eq!(p.class, "PC");
        assert_eq!(p.total_chain_length, Some(32));
        assert_eq!(p.total_unsaturation, Some(0));
    }

    #[test]
    fn test_parse_chains_summed() {
        let p = parse_molecule_name("PE 18:0_20:4");
        assert_eq!(p.class, "PE");
        assert_eq!(p.total_chain_length, Some(38));
        assert_eq!(p.total_unsaturation, Some(4));

        let p = parse_molecule_name("Cer d18:1/16:0");
        assert_eq!(p.class, "Cer");
        assert_eq!(p.total_chain_length, Some(34));
        assert_eq!(p.total_unsaturation, Some(1));

        let p = parse_molecule_name("TG 16:0_18:1_18:2");
        assert_eq!(p.class, "TG");
        assert_eq!(p.total_chain_length, Some(52));
        assert_eq!(p.total_unsaturation, Some(3));
    }

    #[test]
    fn test_parse_ether() {
        let p = parse_molecule_name("PC O-34:1");
        assert_eq!(p.class, "PC O");
        assert_eq!(p.total_chain_length, Some(34));
    }

    #[test]
    fn test_parse_istd() {
        let p = parse_molecule_name("PC 15:0-18:1(d7)");
        assert!(p.is_istd);
        assert_eq!(p.class, "PC");
        assert_eq!(p.total_chain_length, Some(33));
        assert_eq!(p.total_unsaturation, Some(1));

        assert!(parse_molecule_name("LPC 18:1 ISTD").is_istd);
    }

    #[test]
    fn test_parse_no_chains() {
        let p = parse_molecule_name("Cholesterol");
        assert_eq!(p.class, "Cholesterol");
        assert_eq!(p.total_chain_length, None);
        assert_eq!(p.total_unsaturation, None);
    }

    #[test]
    fn test_explicit_class_overrides() {
        let f = FeatureInfo::from_molecule("PC 34:1").with_class("PC-custom");
        assert_eq!(f.class, "PC-custom");
        let f = FeatureInfo::from_molecule("PC 34:1").with_class("  ");
        assert_eq!(f.class, "PC");
    }
}
