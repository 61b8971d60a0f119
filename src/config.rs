use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};

use crate::batch::{BatchLimits, DEFAULT_MAX_SECTION_TOKENS, DEFAULT_MAX_TOKENS};

pub const APP_DIR_NAME: &str = "gazette-extract";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_PROVIDER: &str = "azure";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_DB_URL: &str = "gazette.db";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub ocr_endpoint: Option<String>,
    pub ocr_key: Option<String>,
    pub db_url: Option<String>,
    pub max_tokens: Option<usize>,
    pub max_section_tokens: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub poll_timeout_secs: Option<u64>,
    pub default_profile: Option<String>,
    /// Language model profiles, keyed by name.
    #[serde(default)]
    pub profiles: std::collections::BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = config_dir().context("unable to resolve OS config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn ensure_config_parent_exists(path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating config dir: {}", parent.display()))?;
    }
    Ok(())
}

pub fn load_config_if_exists(path: &PathBuf) -> Result<Option<AppConfig>> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&text).context("parsing config TOML")?;
        Ok(Some(cfg))
    } else {
        Ok(None)
    }
}

pub fn write_config(path: &PathBuf, cfg: &AppConfig) -> Result<()> {
    ensure_config_parent_exists(path)?;
    let text = toml::to_string_pretty(cfg).context("serializing config to TOML")?;
    fs::write(path, text).with_context(|| format!("writing config file: {}", path.display()))?;
    Ok(())
}

/// Everything a run needs, after file, environment and CLI layers are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ocr_endpoint: Option<String>,
    pub ocr_key: Option<String>,
    pub llm_provider: String,
    pub llm_endpoint: Option<String>,
    pub llm_key: Option<String>,
    pub llm_model: String,
    pub db_url: String,
    pub max_tokens: usize,
    pub max_section_tokens: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl Settings {
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits { max_tokens: self.max_tokens, max_section_tokens: self.max_section_tokens }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 || self.max_section_tokens == 0 {
            bail!("invalid token limits: max_tokens and max_section_tokens must be positive");
        }
        if self.max_section_tokens > self.max_tokens {
            bail!(
                "invalid token limits: max_section_tokens ({}) exceeds max_tokens ({})",
                self.max_section_tokens,
                self.max_tokens
            );
        }
        if self.poll_interval.is_zero() || self.poll_timeout.is_zero() {
            bail!("invalid poll settings: poll_interval_ms and poll_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn require_ocr(&self) -> Result<(&str, &str)> {
        let endpoint = self
            .ocr_endpoint
            .as_deref()
            .context("missing OCR endpoint: set COGNITIVE_SERVICES_ENDPOINT or ocr_endpoint")?;
        let key = self
            .ocr_key
            .as_deref()
            .context("missing COGNITIVE_SERVICES_KEY: set it in env, .env or ocr_key")?;
        Ok((endpoint, key))
    }
}

/// Command-line overrides, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides<'a> {
    pub profile: Option<&'a str>,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub db_url: Option<&'a str>,
}

/// Source of environment values; abstracted so resolution can be tested
/// without touching the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

pub fn resolve_settings(overrides: &CliOverrides<'_>) -> Result<Settings> {
    let path = default_config_path()?;
    let cfg = load_config_if_exists(&path)?.unwrap_or_default();
    merge_settings(cfg, &ProcessEnv, overrides)
}

pub fn merge_settings(cfg: AppConfig, env: &impl EnvSource, overrides: &CliOverrides<'_>) -> Result<Settings> {
    let profile_name = overrides
        .profile
        .map(|s| s.to_string())
        .or(cfg.default_profile.clone())
        .unwrap_or_else(|| "default".to_string());
    let profile = cfg.profiles.get(&profile_name).cloned().unwrap_or_default();
    if overrides.profile.is_some() && !cfg.profiles.contains_key(&profile_name) {
        bail!("profile not found: {}", profile_name);
    }

    let parse_usize = |key: &str| -> Result<Option<usize>> {
        env.get(key)
            .map(|v| v.trim().parse::<usize>().with_context(|| format!("invalid {}: {}", key, v)))
            .transpose()
    };

    let settings = Settings {
        ocr_endpoint: env.get("COGNITIVE_SERVICES_ENDPOINT").or(cfg.ocr_endpoint),
        ocr_key: env.get("COGNITIVE_SERVICES_KEY").or(cfg.ocr_key),
        llm_provider: overrides
            .provider
            .map(|s| s.to_string())
            .or(profile.provider)
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
            .to_lowercase(),
        llm_endpoint: env.get("AZURE_OPENAI_ENDPOINT").or(profile.endpoint),
        llm_key: env.get("AZURE_OPENAI_KEY").or(profile.api_key),
        llm_model: overrides
            .model
            .map(|s| s.to_string())
            .or_else(|| env.get("MODEL"))
            .or(profile.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        db_url: overrides
            .db_url
            .map(|s| s.to_string())
            .or_else(|| env.get("DB_URL"))
            .or(cfg.db_url)
            .unwrap_or_else(|| DEFAULT_DB_URL.to_string()),
        max_tokens: parse_usize("GAZETTE_MAX_TOKENS")?
            .or(cfg.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        max_section_tokens: parse_usize("GAZETTE_MAX_SECTION_TOKENS")?
            .or(cfg.max_section_tokens)
            .unwrap_or(DEFAULT_MAX_SECTION_TOKENS),
        poll_interval: Duration::from_millis(cfg.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS)),
        poll_timeout: Duration::from_secs(cfg.poll_timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS)),
    };
    settings.validate()?;
    Ok(settings)
}
