//! Pipeline runner for configuring and executing per-branch analyses.

use crate::data::{Contrast, DeResultSet, Experiment, SampleAnnotation};
use crate::enrich::{enrich, EnrichmentConfig, EnrichmentResultSet, LipidSets};
use crate::error::{LipidError, Result};
use crate::mva::{opls_da, pca, MvaResult, OplsDaConfig, PcaConfig};
use crate::normalize::{normalize, ExcludeFilter, LogBase, NormalizationMethod, NormalizeOptions};
use crate::qc::{profile_cv, profile_total_intensity, CvProfile, SampleSelection, TotalIntensityProfile};
use crate::summarize::{summarize_transitions, SummaryMethod};
use crate::test::differential_test;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A stage of a branch analysis, named in stage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Annotate,
    Qc,
    Summarize,
    Normalize,
    Pca,
    OplsDa,
    Differential,
    Enrichment,
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Load => "load",
            Stage::Annotate => "annotate",
            Stage::Qc => "qc",
            Stage::Summarize => "summarize",
            Stage::Normalize => "normalize",
            Stage::Pca => "pca",
            Stage::OplsDa => "opls-da",
            Stage::Differential => "differential test",
            Stage::Enrichment => "enrichment",
            Stage::Export => "export",
        };
        write!(f, "{}", s)
    }
}

/// QC settings for a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcSettings {
    /// Natural-log the per-sample totals.
    pub log_totals: bool,
    /// Samples the per-feature CV is computed over.
    pub cv_samples: SampleSelection,
    /// CV above which a feature is reported unstable.
    pub cv_threshold: f64,
}

impl Default for QcSettings {
    fn default() -> Self {
        Self {
            log_totals: true,
            cv_samples: SampleSelection::All,
            cv_threshold: 0.2,
        }
    }
}

/// PCA settings for a branch; the measure is the branch measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaSettings {
    pub n_components: usize,
    pub scale: bool,
}

impl Default for PcaSettings {
    fn default() -> Self {
        let d = PcaConfig::default();
        Self {
            n_components: d.n_components,
            scale: d.scale,
        }
    }
}

/// OPLS-DA settings for a branch; groups come from the branch contrast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OplsDaSettings {
    pub n_orthogonal: usize,
    pub scale: bool,
}

impl Default for OplsDaSettings {
    fn default() -> Self {
        let d = OplsDaConfig::default();
        Self {
            n_orthogonal: d.n_orthogonal,
            scale: d.scale,
        }
    }
}

/// Cutoffs for the reported significance views.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Adjusted p-value cutoff.
    pub p_cutoff: f64,
    /// Absolute log fold change cutoff.
    pub logfc_cutoff: f64,
    /// Adjusted p-value cutoff for enrichment.
    pub enrichment_alpha: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p_cutoff: 0.05,
            logfc_cutoff: 1.0,
            enrichment_alpha: 0.05,
        }
    }
}

/// One independent analysis branch (e.g. one ion mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Branch name, used to prefix output tables.
    pub name: String,
    /// Wide-format intensity export.
    pub data: PathBuf,
    /// Sample annotation table.
    #[serde(default)]
    pub annotation: Option<PathBuf>,
    /// Measure name the data is loaded as and analysed under.
    #[serde(default = "default_measure")]
    pub measure: String,
    /// Collapse duplicate transitions before normalization.
    #[serde(default)]
    pub summarize: Option<SummaryMethod>,
    #[serde(default)]
    pub normalization: NormalizationMethod,
    /// Samples kept out of the normalization reference.
    #[serde(default)]
    pub exclude: ExcludeFilter,
    #[serde(default = "default_true")]
    pub log_transform: bool,
    #[serde(default)]
    pub log_base: LogBase,
    /// Groups compared by DE and OPLS-DA.
    pub contrast: Contrast,
    #[serde(default)]
    pub qc: QcSettings,
    #[serde(default)]
    pub pca: PcaSettings,
    /// OPLS-DA settings; `None` skips OPLS-DA.
    #[serde(default = "default_oplsda")]
    pub oplsda: Option<OplsDaSettings>,
    /// Enrichment settings; `None` skips enrichment.
    #[serde(default = "default_enrichment")]
    pub enrichment: Option<EnrichmentConfig>,
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_measure() -> String {
    "Area".to_string()
}

fn default_true() -> bool {
    true
}

fn default_oplsda() -> Option<OplsDaSettings> {
    Some(OplsDaSettings::default())
}

fn default_enrichment() -> Option<EnrichmentConfig> {
    Some(EnrichmentConfig::default())
}

impl BranchConfig {
    /// Create a branch with default settings.
    pub fn new(name: &str, data: impl Into<PathBuf>, contrast: Contrast) -> Self {
        Self {
            name: name.to_string(),
            data: data.into(),
            annotation: None,
            measure: default_measure(),
            summarize: None,
            normalization: NormalizationMethod::default(),
            exclude: ExcludeFilter::None,
            log_transform: true,
            log_base: LogBase::default(),
            contrast,
            qc: QcSettings::default(),
            pca: PcaSettings::default(),
            oplsda: default_oplsda(),
            enrichment: default_enrichment(),
            thresholds: Thresholds::default(),
        }
    }

    /// Set the sample annotation table.
    pub fn annotation(mut self, path: impl Into<PathBuf>) -> Self {
        self.annotation = Some(path.into());
        self
    }

    /// Collapse duplicate transitions.
    pub fn summarize(mut self, method: SummaryMethod) -> Self {
        self.summarize = Some(method);
        self
    }

    pub fn normalization(mut self, method: NormalizationMethod) -> Self {
        self.normalization = method;
        self
    }

    pub fn exclude(mut self, filter: ExcludeFilter) -> Self {
        self.exclude = filter;
        self
    }

    /// Skip OPLS-DA.
    pub fn without_oplsda(mut self) -> Self {
        self.oplsda = None;
        self
    }

    /// Set or skip enrichment.
    pub fn enrichment(mut self, config: Option<EnrichmentConfig>) -> Self {
        self.enrichment = config;
        self
    }

    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            measure: self.measure.clone(),
            exclude: self.exclude.clone(),
            log_transform: self.log_transform,
            log_base: self.log_base,
        }
    }

    fn resolve(&mut self, base: &Path) {
        if self.data.is_relative() {
            self.data = base.join(&self.data);
        }
        if let Some(a) = self.annotation.as_mut() {
            if a.is_relative() {
                *a = base.join(&*a);
            }
        }
    }
}

/// Pipeline configuration: independent branches run side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    pub branches: Vec<BranchConfig>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(LipidError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(LipidError::from)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(LipidError::from)
    }

    /// Load a `.json` or YAML file; relative data paths resolve against its directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut config = if is_json {
            Self::from_json(&text)?
        } else {
            Self::from_yaml(&text)?
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for branch in config.branches.iter_mut() {
            branch.resolve(base);
        }
        Ok(config)
    }

    /// Example with positive and negative ion mode branches.
    pub fn example() -> Self {
        let contrast = Contrast::new("KO", "WT");
        Self {
            name: "example-lipidomics".to_string(),
            description: Some(
                "PQN-normalized two-group comparison for both ion modes".to_string(),
            ),
            branches: vec![
                BranchConfig::new("positive", "positive_mode.csv", contrast.clone())
                    .annotation("samples.csv")
                    .summarize(SummaryMethod::Average)
                    .exclude(ExcludeFilter::Group("Blank".to_string())),
                BranchConfig::new("negative", "negative_mode.csv", contrast)
                    .annotation("samples.csv")
                    .summarize(SummaryMethod::Average)
                    .exclude(ExcludeFilter::Group("Blank".to_string())),
            ],
        }
    }
}

/// Everything one branch produced.
#[derive(Debug, Clone)]
pub struct BranchReport {
    pub name: String,
    pub measure: String,
    /// The normalized experiment.
    pub experiment: Experiment,
    pub total_intensity: TotalIntensityProfile,
    pub cv: CvProfile,
    pub pca: MvaResult,
    pub oplsda: Option<MvaResult>,
    pub de: DeResultSet,
    pub enrichment: Option<EnrichmentResultSet>,
    pub thresholds: Thresholds,
    pub cv_threshold: f64,
}

impl BranchReport {
    /// Write all result tables into `dir`, each prefixed with the branch name.
    ///
    /// Returns the paths written.
    pub fn write_tables<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let file = |name: &str| dir.join(format!("{}_{}", self.name, name));
        let mut written = Vec::new();

        let path = file("qc_total_intensity.csv");
        self.total_intensity.to_csv(&path)?;
        written.push(path);

        let path = file("qc_cv.csv");
        self.cv.to_csv(&path)?;
        written.push(path);

        let path = file(&format!("normalized_{}.csv", self.measure));
        self.experiment.write_measure(&path, &self.measure)?;
        written.push(path);

        let path = file("pca_scores.csv");
        self.pca.scores_to_csv(&path)?;
        written.push(path);
        let path = file("pca_loadings.csv");
        self.pca.loadings_to_csv(&path)?;
        written.push(path);

        if let Some(opls) = &self.oplsda {
            let path = file("oplsda_scores.csv");
            opls.scores_to_csv(&path)?;
            written.push(path);
            let path = file("oplsda_loadings.csv");
            opls.loadings_to_csv(&path)?;
            written.push(path);
        }

        let path = file("de.csv");
        self.de.to_csv(&path)?;
        written.push(path);

        if let Some(enrichment) = &self.enrichment {
            let path = file("enrichment.csv");
            enrichment.to_csv(&path)?;
            written.push(path);
        }

        info!("Branch '{}': wrote {} tables to {}", self.name, written.len(), dir.display());
        Ok(written)
    }
}

impl std::fmt::Display for BranchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = &self.thresholds;
        writeln!(f, "Branch '{}' ({})", self.name, self.de.contrast)?;
        writeln!(
            f,
            "  Samples: {}  Features: {}",
            self.experiment.n_samples(),
            self.experiment.n_features()
        )?;
        writeln!(
            f,
            "  QC: {} sample(s) flagged, {} unstable feature(s) (CV > {})",
            self.total_intensity.outliers.len(),
            self.cv.unstable(self.cv_threshold).len(),
            self.cv_threshold
        )?;
        writeln!(
            f,
            "  PCA R2X: {:?}",
            self.pca
                .explained_variance
                .iter()
                .map(|v| format!("{:.3}", v))
                .collect::<Vec<_>>()
        )?;
        if let Some(opls) = &self.oplsda {
            writeln!(f, "  OPLS-DA R2Y: {:.3}", opls.r2y.unwrap_or(f64::NAN))?;
        }
        writeln!(
            f,
            "  DE: {} up, {} down (adj.P < {}, |logFC| > {})",
            self.de.up(t.p_cutoff, t.logfc_cutoff).len(),
            self.de.down(t.p_cutoff, t.logfc_cutoff).len(),
            t.p_cutoff,
            t.logfc_cutoff
        )?;
        if let Some(enrichment) = &self.enrichment {
            writeln!(
                f,
                "  Enrichment: {} of {} set(s) at adj.P < {}",
                enrichment.significant(t.enrichment_alpha).len(),
                enrichment.len(),
                t.enrichment_alpha
            )?;
        }
        Ok(())
    }
}

/// Attach branch and stage to a stage error.
fn stage<T>(branch: &str, stage: Stage, result: Result<T>) -> Result<T> {
    result.map_err(|e| LipidError::Pipeline(format!("branch '{}' stage {} failed: {}", branch, stage, e)))
}

/// Run one branch end to end.
///
/// Stages run in order: load, annotate, QC, summarize (optional),
/// normalize, PCA, OPLS-DA (optional), differential test, enrichment
/// (optional). The first failing stage aborts the branch.
pub fn run_branch(config: &BranchConfig) -> Result<BranchReport> {
    let name = config.name.as_str();
    info!("Branch '{}': loading {}", name, config.data.display());

    let mut exp = stage(name, Stage::Load, Experiment::from_csv(&config.data, &config.measure))?;

    if let Some(path) = &config.annotation {
        let annotation = stage(name, Stage::Annotate, SampleAnnotation::from_csv(path))?;
        exp = exp.annotate(&annotation);
    } else {
        warn!("Branch '{}': no annotation, all samples ungrouped", name);
    }

    let total_intensity = stage(
        name,
        Stage::Qc,
        profile_total_intensity(&exp, &config.measure, config.qc.log_totals),
    )?;
    let cv = stage(name, Stage::Qc, profile_cv(&exp, &config.measure, &config.qc.cv_samples))?;

    if let Some(method) = config.summarize {
        exp = stage(name, Stage::Summarize, summarize_transitions(&exp, method))?;
    }

    let exp = stage(
        name,
        Stage::Normalize,
        normalize(&exp, &config.normalization, &config.normalize_options()),
    )?;

    let pca_result = stage(
        name,
        Stage::Pca,
        pca(
            &exp,
            &PcaConfig {
                measure: config.measure.clone(),
                n_components: config.pca.n_components,
                scale: config.pca.scale,
            },
        ),
    )?;

    let oplsda = match &config.oplsda {
        Some(settings) => {
            let opls_config = OplsDaConfig {
                n_orthogonal: settings.n_orthogonal,
                scale: settings.scale,
                ..OplsDaConfig::new(&config.measure, &config.contrast)
            };
            Some(stage(name, Stage::OplsDa, opls_da(&exp, &opls_config))?)
        }
        None => None,
    };

    let de = stage(
        name,
        Stage::Differential,
        differential_test(&exp, &config.measure, &config.contrast),
    )?;

    let enrichment = match &config.enrichment {
        Some(enrich_config) => {
            let sets = LipidSets::from_results(&de.results, &enrich_config.kinds, enrich_config.min_size);
            Some(stage(name, Stage::Enrichment, enrich(&de, &sets, enrich_config))?)
        }
        None => None,
    };

    Ok(BranchReport {
        name: config.name.clone(),
        measure: config.measure.clone(),
        experiment: exp,
        total_intensity,
        cv,
        pca: pca_result,
        oplsda,
        de,
        enrichment,
        thresholds: config.thresholds,
        cv_threshold: config.qc.cv_threshold,
    })
}

/// Run every branch in parallel.
///
/// Branches are independent: one failing does not stop the others. Results
/// are returned in branch order.
pub fn run_pipeline(config: &PipelineConfig) -> Vec<Result<BranchReport>> {
    info!(
        "Running pipeline '{}' with {} branch(es)",
        config.name,
        config.branches.len()
    );
    config.branches.par_iter().map(run_branch).collect()
}

/// Run every branch and write each successful branch's tables to `dir`.
///
/// Returns the per-branch outcome; export failures are reported under the
/// export stage.
pub fn run_and_write<P: AsRef<Path>>(config: &PipelineConfig, dir: P) -> Vec<Result<BranchReport>> {
    let dir = dir.as_ref();
    run_pipeline(config)
        .into_iter()
        .map(|result| -> Result<BranchReport> {
            let report = result?;
            let name = report.name.clone();
            stage(&name, Stage::Export, report.write_tables(dir))?;
            Ok(report)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", contents).unwrap();
        path
    }

    fn create_inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let data = write(
            dir,
            "lipids.csv",
            "Molecule,Class,K1,K2,K3,W1,W2,W3\n\
             PC 34:1,PC,800,820,790,100,110,95\n\
             PC 36:2,PC,400,410,395,60,55,62\n\
             PE 36:2,PE,200,210,190,205,195,200\n\
             PE 38:4,PE,150,148,155,152,149,151\n\
             TG 52:2,TG,300,310,290,305,295,300\n\
             TG 54:3,TG,250,245,255,248,252,250\n",
        );
        let annotation = write(
            dir,
            "samples.csv",
            "SampleID,Group\nK1,KO\nK2,KO\nK3,KO\nW1,WT\nW2,WT\nW3,WT\n",
        );
        (data, annotation)
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let config = PipelineConfig::example();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("positive"));

        let parsed = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = "name: minimal\n\
                    branches:\n\
                    \x20 - name: pos\n\
                    \x20   data: pos.csv\n\
                    \x20   contrast: { group_a: KO, group_b: WT }\n";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let branch = &config.branches[0];
        assert_eq!(branch.measure, "Area");
        assert_eq!(branch.normalization, NormalizationMethod::Pqn);
        assert!(branch.log_transform);
        assert!(branch.oplsda.is_some());
        assert!(branch.enrichment.is_some());
    }

    #[test]
    fn test_from_file_resolves_paths() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "pipeline.yaml",
            &PipelineConfig::example().to_yaml().unwrap(),
        );
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.branches[0].data, dir.path().join("positive_mode.csv"));
        assert_eq!(
            config.branches[1].annotation.as_deref(),
            Some(dir.path().join("samples.csv").as_path())
        );
    }

    #[test]
    fn test_run_branch() {
        let dir = TempDir::new().unwrap();
        let (data, annotation) = create_inputs(dir.path());
        let branch = BranchConfig::new("pos", data, Contrast::new("KO", "WT")).annotation(annotation);

        let report = run_branch(&branch).unwrap();
        assert_eq!(report.de.len(), 6);
        assert_eq!(report.total_intensity.totals.len(), 6);
        assert!(report.oplsda.is_some());
        assert!(report.enrichment.is_some());
        assert!(report.experiment.normalization().is_some());

        let top = report.de.sorted_by_pvalue()[0];
        assert!(top.feature_id.starts_with("PC"));
        assert!(top.log_fc > 0.0);

        let out = dir.path().join("out");
        let written = report.write_tables(&out).unwrap();
        assert_eq!(written.len(), 9);
        assert!(out.join("pos_de.csv").exists());
        assert!(out.join("pos_normalized_Area.csv").exists());
        assert!(report.to_string().contains("Branch 'pos'"));
    }

    #[test]
    fn test_stage_error_names_branch_and_stage() {
        let dir = TempDir::new().unwrap();
        let (data, _) = create_inputs(dir.path());
        // No annotation: the differential test has no groups
        let branch = BranchConfig::new("neg", data, Contrast::new("KO", "WT")).without_oplsda();

        let err = run_branch(&branch).unwrap_err();
        match err {
            LipidError::Pipeline(msg) => {
                assert!(msg.contains("'neg'"));
                assert!(msg.contains("differential test"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_failed_branch_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let (data, annotation) = create_inputs(dir.path());
        let config = PipelineConfig {
            name: "two".to_string(),
            description: None,
            branches: vec![
                BranchConfig::new("good", &data, Contrast::new("KO", "WT")).annotation(&annotation),
                BranchConfig::new("bad", dir.path().join("missing.csv"), Contrast::new("KO", "WT")),
            ],
        };
        let results = run_pipeline(&config);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(LipidError::Pipeline(msg)) if msg.contains("load")));
    }
}
