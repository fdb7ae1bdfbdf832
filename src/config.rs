use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ingest::DEFAULT_BATCH_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NlgisConfig {
    pub database: Option<String>,
    /// Directory of shapefile triads used by `seed`
    pub data_dir: Option<String>,
    pub llm: LlmConfig,
    pub ingest: IngestConfig,
    pub grounding: GroundingConfig,
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen3-coder:30b".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Filter-key heuristic data for the schema context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroundingConfig {
    /// Regex a descriptive attribute key must match
    pub descriptive_prefix: String,
    /// Descriptive keys that are never chosen
    pub denylist: Vec<String>,
    /// Fallback keys; the layer's first key found here wins
    pub allowlist: Vec<String>,
    /// Distinct sample values per layer
    pub sample_limit: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            descriptive_prefix: "^d_".to_string(),
            denylist: ["d_MAT", "d_QAG", "d_HER"].map(String::from).to_vec(),
            allowlist: ["NAM", "BEZ", "ART", "FKT", "BWS"].map(String::from).to_vec(),
            sample_limit: 8,
        }
    }
}

impl NlgisConfig {
    /// Load `path` (or the default location) with environment overrides applied.
    /// A missing file yields the defaults.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = load_config(path)?.unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `NLGIS_API_KEY`, `NLGIS_BASE_URL` and `NLGIS_MODEL` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("NLGIS_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("NLGIS_BASE_URL").filter(|v| !v.is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("NLGIS_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("nlgis.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from(".nlgis").join("nlgis.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<NlgisConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: NlgisConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &NlgisConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
