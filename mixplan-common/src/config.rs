//! Configuration loading
//!
//! One immutable `EngineConfig` is built at process start and passed by
//! reference (usually `Arc<EngineConfig>`) to every component.
//!
//! Each value is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MIXPLAN_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::models::{Plan, PlanLimitTable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_ROOT_FOLDER: &str = "MIXPLAN_ROOT_FOLDER";
pub const ENV_LOG_LEVEL: &str = "MIXPLAN_LOG_LEVEL";
pub const ENV_API_KEY: &str = "MIXPLAN_API_KEY";
pub const ENV_MODEL: &str = "MIXPLAN_MODEL";
pub const ENV_GENERATOR_URL: &str = "MIXPLAN_GENERATOR_URL";
pub const ENV_GENERATOR_TIMEOUT_SECS: &str = "MIXPLAN_GENERATOR_TIMEOUT_SECS";

pub const DEFAULT_GENERATOR_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Generation calls take tens of seconds to a few minutes
pub const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HISTORY_PROMPT_LIMIT: usize = 5;
pub const DEFAULT_CONSOLE_DESCRIPTION: &str = "Digital mixing console: 16 mic/line inputs, \
per-channel high-pass filter, gate, 4-band parametric EQ, compressor and delay, \
4 stereo FX engines, aux sends for monitor mixes, graphic EQ on every output.";

const DATABASE_FILE: &str = "mixplan.db";

// ============================================================================
// TOML file schema
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanLimitsToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_limit: Option<usize>,
}

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub generator: GeneratorToml,
    #[serde(default)]
    pub console: ConsoleToml,
    /// Per-plan limit overrides keyed by plan name
    #[serde(default)]
    pub plans: BTreeMap<String, PlanLimitsToml>,
    #[serde(default)]
    pub history: HistoryToml,
}

impl TomlConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }
}

/// Write TOML config (creates parent directory)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mixplan").join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mixplan"))
        .unwrap_or_else(|| PathBuf::from("./mixplan_data"))
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// External generator settings
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Upper bound on one generation call
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_GENERATOR_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_GENERATOR_TIMEOUT_SECS),
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Immutable engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub generator: GeneratorConfig,
    /// Equipment description handed to the generator
    pub console_description: String,
    pub plan_limits: PlanLimitTable,
    /// History entries rendered into the generator prompt
    pub history_prompt_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            generator: GeneratorConfig::default(),
            console_description: DEFAULT_CONSOLE_DESCRIPTION.to_string(),
            plan_limits: PlanLimitTable::default(),
            history_prompt_limit: DEFAULT_HISTORY_PROMPT_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Resolve from command line, process environment, and TOML file
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let toml = match &overrides.config_path {
            // An explicitly named file must exist
            Some(path) => Some(TomlConfig::load(path)?),
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    info!("Loading config file: {}", path.display());
                    Some(TomlConfig::load(&path)?)
                }
                _ => {
                    warn!("No config file found, using defaults");
                    None
                }
            },
        };
        Self::resolve_with(overrides, |name| std::env::var(name).ok(), toml.as_ref())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(
        overrides: &ConfigOverrides,
        env: F,
        toml: Option<&TomlConfig>,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let empty = TomlConfig::default();
        let toml = toml.unwrap_or(&empty);
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let root_folder = overrides
            .root_folder
            .clone()
            .or_else(|| env(ENV_ROOT_FOLDER).map(PathBuf::from))
            .or_else(|| toml.root_folder.clone())
            .unwrap_or(defaults.root_folder);

        let log_level = overrides
            .log_level
            .clone()
            .or_else(|| env(ENV_LOG_LEVEL))
            .or_else(|| toml.logging.level.clone())
            .unwrap_or(defaults.log_level);

        let timeout_secs = match env(ENV_GENERATOR_TIMEOUT_SECS) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("{} must be a number of seconds: {}", ENV_GENERATOR_TIMEOUT_SECS, e))
            })?,
            None => toml
                .generator
                .timeout_secs
                .unwrap_or(DEFAULT_GENERATOR_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            return Err(Error::Config("Generator timeout must be at least 1 second".to_string()));
        }

        let generator = GeneratorConfig {
            api_key: env(ENV_API_KEY).or_else(|| {
                toml.generator
                    .api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
            }),
            model: env(ENV_MODEL)
                .or_else(|| toml.generator.model.clone())
                .unwrap_or(defaults.generator.model),
            base_url: env(ENV_GENERATOR_URL)
                .or_else(|| toml.generator.base_url.clone())
                .unwrap_or(defaults.generator.base_url),
            max_tokens: toml.generator.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout: Duration::from_secs(timeout_secs),
        };

        let mut plan_limits = defaults.plan_limits;
        for (name, limits) in &toml.plans {
            let plan: Plan = name.parse()?;
            let target = plan_limits.limits_for_mut(plan);
            if let Some(generations) = limits.generations {
                target.generations = check_limit(name, "generations", generations)?;
            }
            if let Some(learning) = limits.learning {
                target.learning = check_limit(name, "learning", learning)?;
            }
        }

        Ok(Self {
            root_folder,
            log_level,
            generator,
            console_description: toml
                .console
                .description
                .clone()
                .unwrap_or(defaults.console_description),
            plan_limits,
            history_prompt_limit: toml
                .history
                .prompt_limit
                .unwrap_or(defaults.history_prompt_limit),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    /// Generator API key, required only by commands that call the generator
    pub fn require_api_key(&self) -> Result<&str> {
        self.generator.api_key.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "Generator API key not configured. Set {} or [generator] api_key in config.toml",
                ENV_API_KEY
            ))
        })
    }
}

fn check_limit(plan: &str, field: &str, value: i64) -> Result<i64> {
    if value < crate::models::UNLIMITED {
        return Err(Error::Config(format!(
            "plans.{}.{} must be -1 (unlimited) or a non-negative count",
            plan, field
        )));
    }
    Ok(value)
}
