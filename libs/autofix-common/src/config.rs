// Environment configuration shared by the API and the CLI

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SANDBOX_URL: &str = "https://emkc.org/api/v2/piston/execute";
pub const DEFAULT_GENERATOR_URL: &str = "http://127.0.0.1:8080/v1";
pub const DEFAULT_LANGUAGES_CONFIG: &str = "config/languages.json";
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read language config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse language config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown language '{0}' in language config")]
    UnknownLanguage(String),
}

/// How stderr output affects the success verdict of a run.
///
/// `Strict` rejects any stderr byte, even when the exit code is 0. Runtimes
/// that print warnings on stderr will therefore trigger another repair cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrPolicy {
    #[default]
    Strict,
    /// Whitespace-only stderr counts as empty
    Whitespace,
    /// Only the exit code decides
    Lenient,
}

impl FromStr for StderrPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(StderrPolicy::Strict),
            "whitespace" => Ok(StderrPolicy::Whitespace),
            "lenient" => Ok(StderrPolicy::Lenient),
            other => Err(format!("expected strict, whitespace or lenient, got '{}'", other)),
        }
    }
}

impl fmt::Display for StderrPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StderrPolicy::Strict => "strict",
            StderrPolicy::Whitespace => "whitespace",
            StderrPolicy::Lenient => "lenient",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub url: String,
    pub timeout: Duration,
    pub transport_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SANDBOX_URL.to_string(),
            timeout: Duration::from_secs(30),
            transport_retries: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GENERATOR_URL.to_string(),
            model: "local-model".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutofixConfig {
    pub sandbox: SandboxConfig,
    pub generator: GeneratorConfig,
    pub max_retries: u32,
    pub stderr_policy: StderrPolicy,
    pub languages_config: PathBuf,
    pub api_addr: String,
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            generator: GeneratorConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            stderr_policy: StderrPolicy::default(),
            languages_config: PathBuf::from(DEFAULT_LANGUAGES_CONFIG),
            api_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AutofixConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. Unset or empty
    /// keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("SANDBOX_URL") {
            config.sandbox.url = url;
        }
        if let Some(raw) = get("SANDBOX_TIMEOUT_SECS") {
            config.sandbox.timeout = Duration::from_secs(parse_positive("SANDBOX_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("SANDBOX_TRANSPORT_RETRIES") {
            config.sandbox.transport_retries = parse_number("SANDBOX_TRANSPORT_RETRIES", &raw)?;
        }
        if let Some(raw) = get("SANDBOX_RETRY_BACKOFF_MS") {
            config.sandbox.retry_backoff = Duration::from_millis(parse_number("SANDBOX_RETRY_BACKOFF_MS", &raw)?);
        }

        if let Some(url) = get("GENERATOR_URL") {
            config.generator.base_url = url;
        }
        if let Some(model) = get("GENERATOR_MODEL") {
            config.generator.model = model;
        }
        config.generator.api_key = get("GENERATOR_API_KEY");
        if let Some(raw) = get("GENERATOR_TIMEOUT_SECS") {
            config.generator.timeout = Duration::from_secs(parse_positive("GENERATOR_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("GENERATOR_TEMPERATURE") {
            config.generator.temperature = parse_number("GENERATOR_TEMPERATURE", &raw)?;
        }

        if let Some(raw) = get("AUTOFIX_MAX_RETRIES") {
            config.max_retries = parse_positive("AUTOFIX_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("AUTOFIX_STDERR_POLICY") {
            config.stderr_policy = raw.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "AUTOFIX_STDERR_POLICY",
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(path) = get("LANGUAGES_CONFIG") {
            config.languages_config = PathBuf::from(path);
        }
        if let Some(addr) = get("API_ADDR") {
            config.api_addr = addr;
        }

        Ok(config)
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: fmt::Display,
{
    let value: T = parse_number(key, raw)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
