//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then a YAML file (explicit path or
//! `<config dir>/deskpilot/config.yaml`), then `DESKPILOT_*` environment
//! variables. The result is validated before use.

use crate::cache::CacheProfile;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_MAX_STEPS: &str = "DESKPILOT_MAX_STEPS";
pub const ENV_FAILURE_LIMIT: &str = "DESKPILOT_FAILURE_LIMIT";
pub const ENV_CACHE_WINDOW_MS: &str = "DESKPILOT_CACHE_WINDOW_MS";
pub const ENV_USE_VISION: &str = "DESKPILOT_USE_VISION";
pub const ENV_JPEG_QUALITY: &str = "DESKPILOT_JPEG_QUALITY";
pub const ENV_REASONING_URL: &str = deskpilot_decision::REASONING_URL_ENV;
pub const ENV_REASONING_TOKEN: &str = deskpilot_decision::REASONING_TOKEN_ENV;
pub const ENV_LOG_DIR: &str = "DESKPILOT_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_steps: u32,
    pub consecutive_failure_limit: u32,
    /// Re-prompts allowed after an unparseable decision before the run is fatal.
    pub decision_retries: u32,
    /// Pause after a mutating action so the UI can settle before the next snapshot.
    pub settle_delay_ms: u64,
    /// How many earlier steps are summarized into each decision request.
    pub history_window: usize,
    /// Pause before the single perception retry after a Launch.
    pub launch_retry_delay_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            consecutive_failure_limit: 3,
            decision_retries: 1,
            settle_delay_ms: 500,
            history_window: 5,
            launch_retry_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub preset: Option<CacheProfile>,
    /// Explicit freshness window; wins over `preset`.
    pub freshness_ms: Option<u64>,
}

impl CacheConfig {
    pub fn freshness(&self) -> Duration {
        match (self.freshness_ms, self.preset) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(preset)) => preset.window(),
            (None, None) => CacheProfile::Default.window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub timeout_ms: u64,
    pub max_depth: usize,
    /// Fewer classified nodes than this marks the tree as sparse.
    pub sparse_threshold: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_depth: 60,
            sparse_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Attach a screenshot to every snapshot, not only as a fallback.
    pub enabled: bool,
    pub scale: f32,
    pub jpeg_quality: u8,
    pub max_dimension: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: 1.0,
            jpeg_quality: 75,
            max_dimension: 1920,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub shell_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub max_wait_secs: u64,
    /// How long Launch polls for the new window to appear.
    pub launch_wait_ms: u64,
    pub launch_poll_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 60,
            max_output_bytes: 8192,
            max_wait_secs: 60,
            launch_wait_ms: 10_000,
            launch_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    #[serde(rename = "loop")]
    pub run: LoopConfig,
    pub cache: CacheConfig,
    pub tree: TreeConfig,
    pub vision: VisionConfig,
    pub executor: ExecutorConfig,
    pub reasoning: ReasoningConfig,
    pub log_dir: Option<PathBuf>,
}

impl PilotConfig {
    /// `<config dir>/deskpilot/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("deskpilot").join("config.yaml"))
    }

    /// Load from `path`, or from the default location when it exists, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => {
                    debug!("[config] no config file, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&text, &path.display().to_string())?;
        info!("[config] loaded {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Apply `DESKPILOT_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("cannot parse '{raw}'"),
            })
        }

        if let Some(v) = lookup(ENV_MAX_STEPS) {
            self.run.max_steps = parse(ENV_MAX_STEPS, &v)?;
        }
        if let Some(v) = lookup(ENV_FAILURE_LIMIT) {
            self.run.consecutive_failure_limit = parse(ENV_FAILURE_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_CACHE_WINDOW_MS) {
            self.cache.freshness_ms = Some(parse(ENV_CACHE_WINDOW_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_USE_VISION) {
            self.vision.enabled = matches!(
                v.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = lookup(ENV_JPEG_QUALITY) {
            self.vision.jpeg_quality = parse(ENV_JPEG_QUALITY, &v)?;
        }
        if let Some(v) = lookup(ENV_REASONING_URL).filter(|v| !v.is_empty()) {
            self.reasoning.url = Some(v);
        }
        if let Some(v) = lookup(ENV_REASONING_TOKEN).filter(|v| !v.is_empty()) {
            self.reasoning.token = Some(v);
        }
        if let Some(v) = lookup(ENV_LOG_DIR).filter(|v| !v.is_empty()) {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.run.max_steps == 0 {
            return Err(invalid("loop.max_steps", "must be at least 1"));
        }
        if self.run.consecutive_failure_limit == 0 {
            return Err(invalid("loop.consecutive_failure_limit", "must be at least 1"));
        }
        if !(1..=100).contains(&self.vision.jpeg_quality) {
            return Err(invalid("vision.jpeg_quality", "must be between 1 and 100"));
        }
        if !(self.vision.scale.is_finite() && self.vision.scale > 0.0) {
            return Err(invalid("vision.scale", "must be a positive number"));
        }
        if self.vision.max_dimension == 0 {
            return Err(invalid("vision.max_dimension", "must be at least 1"));
        }
        if self.tree.timeout_ms == 0 {
            return Err(invalid("tree.timeout_ms", "must be at least 1"));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.run.settle_delay_ms)
    }
}
