//! Configuration
//!
//! One TOML file, every section optional:
//!
//! ```toml
//! [gateway]
//! base_url = "https://api.openai.com"
//! model = "gpt-4o"
//!
//! [repair]
//! max_retry = 2
//!
//! [telemetry]
//! format = "json"
//! ```

use anyhow::Context;
use locus_cache::CacheConfig;
use locus_gateway::GatewayConfig;
use locus_index::DEFAULT_MAX_SNIPPET_CHARS;
use locus_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::orchestrator::DEFAULT_TOP_K;
use crate::repair::MAX_RETRY;

/// Environment variable overriding `gateway.base_url`
pub const ENV_API_URL: &str = "LOCUS_LLM_API_URL";
/// Environment variable overriding `gateway.api_key`
pub const ENV_API_KEY: &str = "LOCUS_LLM_API_KEY";
/// Environment variable overriding `gateway.model`
pub const ENV_MODEL: &str = "LOCUS_LLM_MODEL";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocusConfig {
    /// Language model endpoint
    pub gateway: GatewayConfig,
    /// Retrieval settings
    pub retrieval: RetrievalConfig,
    /// Repair loop settings
    pub repair: RepairConfig,
    /// Sandbox settings
    pub sandbox: SandboxConfig,
    /// Result cache settings
    pub cache: CacheConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
}

/// Retrieval settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Snippets per feature
    pub top_k: usize,
    /// Characters of each definition that are indexed
    pub max_snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_snippet_chars: DEFAULT_MAX_SNIPPET_CHARS,
        }
    }
}

/// Repair loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Repairs after the first execution
    pub max_retry: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self { max_retry: MAX_RETRY }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LocusConfig {
    /// Parse TOML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid locus configuration")
    }

    /// Read a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Apply `LOCUS_LLM_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup(ENV_API_URL) {
            self.gateway.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.gateway.api_key = key;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.gateway.model = model;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = LocusConfig::from_toml_str("").unwrap();
        assert_eq!(config, LocusConfig::default());
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.repair.max_retry, 2);
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.sandbox.timeout_secs, 300);
        assert_eq!(config.telemetry.filter, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = LocusConfig::from_toml_str(
            r#"
            [repair]
            max_retry = 4

            [sandbox]
            memory_limit = "2g"

            [telemetry]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.repair.max_retry, 4);
        assert_eq!(config.sandbox.memory_limit.as_deref(), Some("2g"));
        assert_eq!(config.sandbox.node_image, "node:18-alpine");
        assert_eq!(config.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locus.toml");
        std::fs::write(&path, "[repair]\nmax_retry = \"many\"\n").unwrap();
        let err = LocusConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("locus.toml"));

        let missing = LocusConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(missing.to_string().contains("absent.toml"));
    }

    #[test]
    fn overrides_replace_gateway_fields() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "http://llm.internal:8080"),
            (ENV_MODEL, "qwen2.5-coder"),
            (ENV_API_KEY, "  "),
        ]
        .into_iter()
        .collect();
        let config = LocusConfig::default().with_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.gateway.base_url, "http://llm.internal:8080");
        assert_eq!(config.gateway.model, "qwen2.5-coder");
        assert_eq!(config.gateway.api_key, GatewayConfig::default().api_key);
    }
}
