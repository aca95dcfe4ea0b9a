use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::runner::DEFAULT_MAX_TURNS;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Upper bound on tool calls running at once; unbounded when absent. A
    /// limit of 0 is treated as 1.
    #[serde(default)]
    pub max_tool_concurrency: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tool_concurrency: None,
        }
    }
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "stub".into()
}

fn default_model() -> String {
    "stub-model".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive such as `info` or `relay_engine=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| RelayError::Config(format!("Failed to parse configuration: {err}")))
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Configuration built from defaults and environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(turns) = env::var("RELAY_MAX_TURNS") {
            self.runner.max_turns = parse_var("RELAY_MAX_TURNS", &turns)?;
        }
        if let Ok(limit) = env::var("RELAY_MAX_TOOL_CONCURRENCY") {
            self.runner.max_tool_concurrency = Some(parse_var("RELAY_MAX_TOOL_CONCURRENCY", &limit)?);
        }
        if let Ok(level) = env::var("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(json) = env::var("RELAY_LOG_JSON") {
            self.logging.json = parse_var("RELAY_LOG_JSON", &json)?;
        }
        if let Ok(key) = env::var("RELAY_API_KEY").or_else(|_| env::var("OPENAI_API_KEY")) {
            self.model.api_key = Some(key);
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("`{name}` has an invalid value `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let cfg = AppConfig::from_toml("[model]\nprovider='openai'\nmodel='gpt-4o'").unwrap();
        assert_eq!(cfg.runner.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(cfg.runner.max_tool_concurrency, None);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.model.model, "gpt-4o");
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[runner]\nmax_turns=4\nmax_tool_concurrency=2\n[logging]\nlevel='debug'"
        )
        .unwrap();

        env::set_var("RELAY_MAX_TURNS", "7");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("RELAY_MAX_TURNS");

        assert_eq!(cfg.runner.max_turns, 7);
        assert_eq!(cfg.runner.max_tool_concurrency, Some(2));
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            AppConfig::from_toml("[runner\nmax_turns=1"),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn rejects_unparsable_numbers() {
        assert!(matches!(
            parse_var::<usize>("RELAY_MAX_TURNS", "many"),
            Err(RelayError::Config(_))
        ));
        assert_eq!(parse_var::<usize>("RELAY_MAX_TURNS", " 3 ").unwrap(), 3);
    }
}
