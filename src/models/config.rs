//! Configuration models for raspberry.
//!
//! Every tunable of the pipeline lives here and is loaded from a TOML file.
//! All sections carry defaults, so an empty file is a valid configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Top-level configuration for raspberry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OpenAI-compatible LLM endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Named model presets referenced by templates and stages
    #[serde(default = "default_presets")]
    pub presets: HashMap<String, ModelSpec>,

    /// Prompt template settings
    #[serde(default)]
    pub templates: TemplateConfig,

    /// arXiv catalog fetch settings
    #[serde(default)]
    pub arxiv: ArxivConfig,

    /// Database and artifact locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Minimum suitability scores
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Per-stage template and preset selection
    #[serde(default)]
    pub stages: StagesConfig,

    /// Training corpus output
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            presets: default_presets(),
            templates: TemplateConfig::default(),
            arxiv: ArxivConfig::default(),
            paths: PathsConfig::default(),
            thresholds: ThresholdConfig::default(),
            stages: StagesConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// LLM endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Specification for a model preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model ID as understood by the endpoint (e.g. "anthropic/claude-3.5-sonnet")
    pub id: String,

    /// Human-readable label
    #[serde(default)]
    pub label: Option<String>,

    /// Maximum tokens for this model
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for this model
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Input price per 1M tokens (USD)
    #[serde(default)]
    pub input_price_per_1m: f64,

    /// Output price per 1M tokens (USD)
    #[serde(default)]
    pub output_price_per_1m: f64,
}

impl ModelSpec {
    /// Estimated cost of one request.
    pub fn cost_usd(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) / 1_000_000.0) * self.input_price_per_1m
            + (f64::from(output_tokens) / 1_000_000.0) * self.output_price_per_1m
    }
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f64 {
    0.0
}

fn default_presets() -> HashMap<String, ModelSpec> {
    let mut presets = HashMap::new();
    presets.insert(
        DEFAULT_PRESET.to_string(),
        ModelSpec {
            id: "anthropic/claude-3.5-sonnet".to_string(),
            label: Some("Claude 3.5 Sonnet".to_string()),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            input_price_per_1m: 3.0,
            output_price_per_1m: 15.0,
        },
    );
    presets
}

/// Preset used when neither a stage nor a template names one.
pub const DEFAULT_PRESET: &str = "default";

/// Prompt template configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Directory holding `<name>.md` templates
    #[serde(default = "default_templates_dir")]
    pub directory: PathBuf,

    /// Preset used when a template does not name one
    #[serde(default = "default_preset_name")]
    pub default_preset: String,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_preset_name() -> String {
    DEFAULT_PRESET.to_string()
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            directory: default_templates_dir(),
            default_preset: default_preset_name(),
        }
    }
}

/// arXiv export API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivConfig {
    /// Export host; also the host of canonical PDF URLs
    #[serde(default = "default_arxiv_base")]
    pub base_url: String,

    /// Categories fetched when none are given on the command line
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// First day of the window (inclusive)
    #[serde(default = "default_begin_date")]
    pub begin_date: NaiveDate,

    /// End of the window (exclusive)
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,

    /// Page size for normal requests
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Page size after the API fails to serialize a page
    #[serde(default = "default_fallback_max_results")]
    pub fallback_max_results: u32,

    /// Consecutive empty or unparseable pages tolerated before giving up
    #[serde(default = "default_max_empty_attempts")]
    pub max_empty_attempts: u32,

    /// Attempts per page request on transport errors
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// First backoff delay in seconds
    #[serde(default = "default_min_backoff")]
    pub min_backoff_secs: u64,

    /// Backoff ceiling in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Pause after an empty page, in milliseconds
    #[serde(default = "default_empty_page_delay")]
    pub empty_page_delay_ms: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

fn default_arxiv_base() -> String {
    "https://export.arxiv.org".to_string()
}

fn default_categories() -> Vec<String> {
    [
        "astro-ph.EP",
        "astro-ph.GA",
        "cond-mat.stat-mech",
        "cs.AI",
        "cs.CL",
        "cs.DS",
        "cs.LG",
        "econ.TH",
        "math.CO",
        "math.NT",
        "physics.flu-dyn",
        "q-bio.PE",
        "quant-ph",
        "stat.ME",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_begin_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default()
}

fn default_max_results() -> u32 {
    1000
}

fn default_fallback_max_results() -> u32 {
    100
}

fn default_max_empty_attempts() -> u32 {
    10
}

fn default_fetch_retries() -> u32 {
    10
}

fn default_min_backoff() -> u64 {
    4
}

fn default_max_backoff() -> u64 {
    60
}

fn default_empty_page_delay() -> u64 {
    1000
}

fn default_fetch_timeout() -> u64 {
    120
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_base(),
            categories: default_categories(),
            begin_date: default_begin_date(),
            end_date: default_end_date(),
            max_results: default_max_results(),
            fallback_max_results: default_fallback_max_results(),
            max_empty_attempts: default_max_empty_attempts(),
            max_retries: default_fetch_retries(),
            min_backoff_secs: default_min_backoff(),
            max_backoff_secs: default_max_backoff(),
            empty_page_delay_ms: default_empty_page_delay(),
            timeout_secs: default_fetch_timeout(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default = "default_pdf_cache")]
    pub pdf_cache_dir: PathBuf,

    #[serde(default = "default_inference_dir")]
    pub inference_artifacts_dir: PathBuf,

    #[serde(default = "default_training_dir")]
    pub training_artifacts_dir: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("papers.db")
}

fn default_pdf_cache() -> PathBuf {
    PathBuf::from("pdf_cache")
}

fn default_inference_dir() -> PathBuf {
    PathBuf::from("inference_artifacts")
}

fn default_training_dir() -> PathBuf {
    PathBuf::from("training_artifacts")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            pdf_cache_dir: default_pdf_cache(),
            inference_artifacts_dir: default_inference_dir(),
            training_artifacts_dir: default_training_dir(),
        }
    }
}

/// Minimum suitability scores gating forward progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Profile score required before CoT extraction
    #[serde(default = "default_profile_threshold")]
    pub profile: u32,

    /// Quality score required before voicing and in the corpus
    #[serde(default = "default_quality_threshold")]
    pub quality: u32,

    /// Voicing score required in the corpus
    #[serde(default = "default_voicing_threshold")]
    pub voicing: u32,
}

fn default_profile_threshold() -> u32 {
    8
}

fn default_quality_threshold() -> u32 {
    14
}

fn default_voicing_threshold() -> u32 {
    9
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_threshold(),
            quality: default_quality_threshold(),
            voicing: default_voicing_threshold(),
        }
    }
}

/// Template and preset used by one LLM-driven step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub template: String,

    /// Overrides the template's own preset when set
    #[serde(default)]
    pub preset: Option<String>,
}

impl StepConfig {
    fn named(template: &str) -> Self {
        Self {
            template: template.to_string(),
            preset: None,
        }
    }
}

/// Per-stage step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_profiling_step")]
    pub profiling: StepConfig,

    #[serde(default = "default_extraction_step")]
    pub extraction: StepConfig,

    #[serde(default = "default_critique_step")]
    pub critique: StepConfig,

    #[serde(default = "default_refinement_step")]
    pub refinement: StepConfig,

    #[serde(default = "default_quality_step")]
    pub quality_assessment: StepConfig,

    #[serde(default = "default_voicing_step")]
    pub voicing: StepConfig,

    #[serde(default = "default_voicing_assessment_step")]
    pub voicing_assessment: StepConfig,

    /// System message written into every training example
    #[serde(default = "default_system_message")]
    pub system_message: String,
}

fn default_profiling_step() -> StepConfig {
    StepConfig::named("raspberry-paper-profiler")
}

fn default_extraction_step() -> StepConfig {
    StepConfig::named("raspberry-cot-extraction")
}

fn default_critique_step() -> StepConfig {
    StepConfig::named("raspberry-cot-critique")
}

fn default_refinement_step() -> StepConfig {
    StepConfig::named("raspberry-cot-refinement")
}

fn default_quality_step() -> StepConfig {
    StepConfig::named("raspberry-cot-quality-assessor")
}

fn default_voicing_step() -> StepConfig {
    StepConfig::named("raspberry-cot-voicing")
}

fn default_voicing_assessment_step() -> StepConfig {
    StepConfig::named("raspberry-cot-voicing-assessor")
}

fn default_system_message() -> String {
    "You are a thinking agent responsible for developing a detailed, step-by-step thought \
     process in response to a request, problem, or conversation. Your task is to break down \
     the situation into a structured reasoning process. If feedback is provided, integrate it \
     into your thought process for refinement."
        .to_string()
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            profiling: default_profiling_step(),
            extraction: default_extraction_step(),
            critique: default_critique_step(),
            refinement: default_refinement_step(),
            quality_assessment: default_quality_step(),
            voicing: default_voicing_step(),
            voicing_assessment: default_voicing_assessment_step(),
            system_message: default_system_message(),
        }
    }
}

impl StagesConfig {
    fn steps(&self) -> [(&'static str, &StepConfig); 7] {
        [
            ("profiling", &self.profiling),
            ("extraction", &self.extraction),
            ("critique", &self.critique),
            ("refinement", &self.refinement),
            ("quality_assessment", &self.quality_assessment),
            ("voicing", &self.voicing),
            ("voicing_assessment", &self.voicing_assessment),
        ]
    }
}

/// Training corpus output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Consolidated corpus, written inside the training artifacts directory
    #[serde(default = "default_training_file")]
    pub training_file: String,

    /// Share of examples held out by `prepare-training`
    #[serde(default = "default_validation_ratio")]
    pub validation_ratio: f64,

    /// Shuffle seed for the train/validation split
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
}

fn default_training_file() -> String {
    "consolidated-training-data.jsonl".to_string()
}

fn default_validation_ratio() -> f64 {
    0.2
}

fn default_split_seed() -> u64 {
    42
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            training_file: default_training_file(),
            validation_ratio: default_validation_ratio(),
            split_seed: default_split_seed(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Load from a file when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.llm.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.llm.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.llm.api_key_env.clone(),
        })
    }

    /// Look up a model preset by name.
    pub fn preset(&self, name: &str) -> Result<&ModelSpec, ConfigError> {
        self.presets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.preset(&self.templates.default_preset)?;
        for (step, cfg) in self.stages.steps() {
            if let Some(preset) = &cfg.preset {
                self.preset(preset)?;
            }
            if cfg.template.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("stages.{step}.template is empty")));
            }
        }

        if self.arxiv.begin_date > self.arxiv.end_date {
            return Err(ConfigError::Invalid(format!(
                "arxiv.begin_date {} is after arxiv.end_date {}",
                self.arxiv.begin_date, self.arxiv.end_date
            )));
        }
        if self.arxiv.fallback_max_results == 0
            || self.arxiv.fallback_max_results > self.arxiv.max_results
        {
            return Err(ConfigError::Invalid(
                "arxiv.fallback_max_results must be between 1 and arxiv.max_results".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.output.validation_ratio) {
            return Err(ConfigError::Invalid(
                "output.validation_ratio must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

static ENV_VAR_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_RE.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or llm.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Preset not found: '{0}' (add it under [presets.{0}])")]
    UnknownPreset(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
