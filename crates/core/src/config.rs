use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::warn;

pub const CONFIG_PATH_ENV: &str = "RECOVERY_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "config.local.yaml";

pub const API_KEY_ENV_VARS: [&str; 2] = ["ANTHROPIC_API_KEY", "ZHIPUAI_API_KEY"];
pub const BASE_URL_ENV: &str = "BIGMODEL_BASE_URL";
pub const MODEL_ENV: &str = "BIGMODEL_MODEL";
pub const MAX_TOKENS_ENV: &str = "BIGMODEL_MAX_TOKENS";
pub const MAX_IMAGE_BYTES_ENV: &str = "BIGMODEL_MAX_IMAGE_BYTES";
pub const LANGUAGE_ENV: &str = "REHABDESK_LANGUAGE";
pub const LOG_LEVEL_ENV: &str = "REHABDESK_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "REHABDESK_LOG_FORMAT";

const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/anthropic";
const DEFAULT_MODEL: &str = "glm-4.7";
const DEFAULT_MAX_TOKENS: u32 = 1200;
const DEFAULT_MAX_IMAGE_BYTES: u64 = 8_000_000;
const DEFAULT_LANGUAGE: &str = "Simplified Chinese";

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_image_bytes: u64,
    pub response_language: String,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unsupported log format `{other}` (expected compact|pretty|json)")),
        }
    }
}

/// Where the effective value of a config field came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    File(PathBuf),
    Env(&'static str),
    Override,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File(path) => write!(f, "file ({})", path.display()),
            Self::Env(var) => write!(f, "env ({var})"),
            Self::Override => write!(f, "override"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: serde_yaml::Error },
    #[error("config file `{path}` must be a YAML mapping")]
    NotAMapping { path: PathBuf },
}

/// Outcome of a resolve: the config is always usable, file problems are
/// reported as warnings.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub config: RuntimeConfig,
    pub file_path: Option<PathBuf>,
    pub sources: BTreeMap<&'static str, ConfigSource>,
    pub warnings: Vec<ConfigError>,
}

impl ResolvedConfig {
    pub fn source_of(&self, field: &str) -> ConfigSource {
        self.sources.get(field).cloned().unwrap_or(ConfigSource::Default)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new().into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            response_language: DEFAULT_LANGUAGE.to_string(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl RuntimeConfig {
    /// Merges defaults, the YAML file and environment overrides, in that order
    /// of increasing precedence. Never fails.
    pub fn resolve(options: LoadOptions) -> ResolvedConfig {
        let mut resolver = Resolver::default();
        let file_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = &file_path {
            match read_mapping(path) {
                Ok(mapping) => resolver.apply_file(path, &mapping),
                Err(error) => {
                    warn!(
                        event_name = "config.file_ignored",
                        path = %path.display(),
                        error = %error,
                        "config file ignored, falling back to defaults"
                    );
                    resolver.warnings.push(error);
                }
            }
        }

        resolver.apply_env_overrides();
        resolver.apply_overrides(options.overrides);
        resolver.finish(file_path)
    }

    /// Convenience for callers that only need the values.
    pub fn load(options: LoadOptions) -> Self {
        Self::resolve(options).config
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.expose_secret().trim().is_empty()
    }
}

struct Resolver {
    config: RuntimeConfig,
    // `None` marks a value that failed integer coercion.
    max_tokens: Option<u64>,
    max_image_bytes: Option<u64>,
    sources: BTreeMap<&'static str, ConfigSource>,
    warnings: Vec<ConfigError>,
}

impl Resolver {
    fn apply_file(&mut self, path: &Path, mapping: &Mapping) {
        let source = ConfigSource::File(path.to_path_buf());

        if let Some(value) = mapping_str(mapping, "api_key") {
            self.config.api_key = value.into();
            self.sources.insert("api_key", source.clone());
        }
        if let Some(value) = mapping_str(mapping, "base_url") {
            self.config.base_url = value;
            self.sources.insert("base_url", source.clone());
        }
        if let Some(value) = mapping_str(mapping, "model") {
            self.config.model = value;
            self.sources.insert("model", source.clone());
        }
        if let Some(value) = mapping_value(mapping, "max_tokens") {
            self.max_tokens = coerce_u64(value);
            self.sources.insert("max_tokens", source.clone());
        }
        if let Some(value) = mapping_value(mapping, "max_image_bytes") {
            self.max_image_bytes = coerce_u64(value);
            self.sources.insert("max_image_bytes", source.clone());
        }
        if let Some(value) = mapping_str(mapping, "response_language") {
            self.config.response_language = value;
            self.sources.insert("response_language", source.clone());
        }
        if let Some(value) = mapping_str(mapping, "log_level") {
            self.config.logging.level = value;
            self.sources.insert("log_level", source.clone());
        }
        if let Some(value) = mapping_str(mapping, "log_format") {
            self.config.logging.format = value.parse().unwrap_or(LogFormat::Compact);
            self.sources.insert("log_format", source);
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some((var, value)) =
            API_KEY_ENV_VARS.iter().find_map(|var| read_env(var).map(|value| (*var, value)))
        {
            self.config.api_key = value.into();
            self.sources.insert("api_key", ConfigSource::Env(var));
        }
        if let Some(value) = read_env(BASE_URL_ENV) {
            self.config.base_url = value;
            self.sources.insert("base_url", ConfigSource::Env(BASE_URL_ENV));
        }
        if let Some(value) = read_env(MODEL_ENV) {
            self.config.model = value;
            self.sources.insert("model", ConfigSource::Env(MODEL_ENV));
        }
        if let Some(value) = read_env(MAX_TOKENS_ENV) {
            if let Some(parsed) = parse_u64_text(&value) {
                self.max_tokens = Some(parsed);
                self.sources.insert("max_tokens", ConfigSource::Env(MAX_TOKENS_ENV));
            }
        }
        if let Some(value) = read_env(MAX_IMAGE_BYTES_ENV) {
            if let Some(parsed) = parse_u64_text(&value) {
                self.max_image_bytes = Some(parsed);
                self.sources.insert("max_image_bytes", ConfigSource::Env(MAX_IMAGE_BYTES_ENV));
            }
        }
        if let Some(value) = read_env(LANGUAGE_ENV) {
            self.config.response_language = value;
            self.sources.insert("response_language", ConfigSource::Env(LANGUAGE_ENV));
        }
        if let Some(value) = read_env(LOG_LEVEL_ENV) {
            self.config.logging.level = value;
            self.sources.insert("log_level", ConfigSource::Env(LOG_LEVEL_ENV));
        }
        if let Some(value) = read_env(LOG_FORMAT_ENV) {
            self.config.logging.format = value.parse().unwrap_or(LogFormat::Compact);
            self.sources.insert("log_format", ConfigSource::Env(LOG_FORMAT_ENV));
        }
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(model) = overrides.model {
            self.config.model = model;
            self.sources.insert("model", ConfigSource::Override);
        }
        if let Some(log_level) = overrides.log_level {
            self.config.logging.level = log_level;
            self.sources.insert("log_level", ConfigSource::Override);
        }
    }

    fn finish(mut self, file_path: Option<PathBuf>) -> ResolvedConfig {
        self.config.max_tokens = match self.max_tokens.map(u32::try_from) {
            Some(Ok(value)) => value,
            _ => {
                self.sources.remove("max_tokens");
                DEFAULT_MAX_TOKENS
            }
        };
        self.config.max_image_bytes = match self.max_image_bytes {
            Some(value) => value,
            None => {
                self.sources.remove("max_image_bytes");
                DEFAULT_MAX_IMAGE_BYTES
            }
        };

        ResolvedConfig {
            config: self.config,
            file_path,
            sources: self.sources,
            warnings: self.warnings,
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            max_tokens: Some(u64::from(config.max_tokens)),
            max_image_bytes: Some(config.max_image_bytes),
            config,
            sources: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    let candidate = read_env(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    candidate.exists().then_some(candidate)
}

fn read_mapping(path: &Path) -> Result<Mapping, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let document = serde_yaml::from_str::<Value>(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;

    match document {
        Value::Mapping(mapping) => Ok(mapping),
        // An empty document is treated like an empty mapping.
        Value::Null => Ok(Mapping::new()),
        _ => Err(ConfigError::NotAMapping { path: path.to_path_buf() }),
    }
}

fn mapping_value<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    mapping.get(key).filter(|value| !value.is_null())
}

fn mapping_str(mapping: &Mapping, key: &str) -> Option<String> {
    match mapping_value(mapping, key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0)
                .map(|float| float.trunc() as u64)
        }),
        Value::String(text) => parse_u64_text(text),
        _ => None,
    }
}

fn parse_u64_text(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
