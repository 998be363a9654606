//! Runtime configuration, read once from the environment at process start.
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `STUDYBUDDY_API_KEY` | yes | |
//! | `STUDYBUDDY_BASE_URL` | yes | |
//! | `STUDYBUDDY_MODEL` | yes | |
//! | `STUDYBUDDY_GUARDRAIL_MODEL` | no | `STUDYBUDDY_MODEL` |
//! | `STUDYBUDDY_GUARDRAIL_TIMEOUT` | no | `20s` |
//! | `STUDYBUDDY_AGENT_TIMEOUT` | no | `60s` |
//! | `STUDYBUDDY_FAILURE_POLICY` | no | `closed` |
//! | `STUDYBUDDY_HISTORY_DIR` | no | `./history` |
//! | `STUDYBUDDY_DEVELOPER_NAME` / `_MAIL` / `_GITHUB` | no | unset |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use studybuddy_core::DeveloperInfo;

use crate::providers::{ApiCredential, CompletionConfig};
use crate::resilience::{CircuitBreakerConfig, FailurePolicy, RetryConfig};

pub const API_KEY_ENV: &str = "STUDYBUDDY_API_KEY";
pub const BASE_URL_ENV: &str = "STUDYBUDDY_BASE_URL";
pub const MODEL_ENV: &str = "STUDYBUDDY_MODEL";
pub const GUARDRAIL_MODEL_ENV: &str = "STUDYBUDDY_GUARDRAIL_MODEL";
pub const GUARDRAIL_TIMEOUT_ENV: &str = "STUDYBUDDY_GUARDRAIL_TIMEOUT";
pub const AGENT_TIMEOUT_ENV: &str = "STUDYBUDDY_AGENT_TIMEOUT";
pub const FAILURE_POLICY_ENV: &str = "STUDYBUDDY_FAILURE_POLICY";
pub const HISTORY_DIR_ENV: &str = "STUDYBUDDY_HISTORY_DIR";
pub const DEVELOPER_NAME_ENV: &str = "STUDYBUDDY_DEVELOPER_NAME";
pub const DEVELOPER_MAIL_ENV: &str = "STUDYBUDDY_DEVELOPER_MAIL";
pub const DEVELOPER_GITHUB_ENV: &str = "STUDYBUDDY_DEVELOPER_GITHUB";

/// Errors loading configuration. All of them are fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Timeouts and resilience knobs, independent of credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Model for agent answers and routing
    pub model: String,

    /// Model for guardrail classification
    pub guardrail_model: String,

    /// Bound on each guardrail classification call
    pub guardrail_timeout: Duration,

    /// Bound on routing and on each read of an agent stream
    pub agent_timeout: Duration,

    pub failure_policy: FailurePolicy,

    pub circuit_breaker: CircuitBreakerConfig,

    pub retry: RetryConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model: CompletionConfig::default().model,
            guardrail_model: CompletionConfig::default().model,
            guardrail_timeout: Duration::from_secs(20),
            agent_timeout: Duration::from_secs(60),
            failure_policy: FailurePolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineSettings {
    /// Completion settings for guardrail classifiers.
    pub fn guardrail_completion(&self) -> CompletionConfig {
        CompletionConfig::classifier(&self.guardrail_model, self.guardrail_timeout)
    }

    /// Completion settings for the route decision.
    pub fn router_completion(&self) -> CompletionConfig {
        CompletionConfig::classifier(&self.model, self.agent_timeout)
    }

    /// Completion settings for streamed agent answers.
    pub fn agent_completion(&self) -> CompletionConfig {
        CompletionConfig {
            timeout: self.agent_timeout,
            ..CompletionConfig::new(&self.model)
        }
    }
}

/// Everything the process needs to start serving turns.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub api_key: ApiCredential,

    pub base_url: String,

    pub pipeline: PipelineSettings,

    /// Directory receiving `<session>.json` history files
    pub history_dir: PathBuf,

    /// Record returned by the `developer_info` tool
    pub developer: Option<DeveloperInfo>,
}

impl RuntimeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let api_key = ApiCredential::from_lookup(API_KEY_ENV, "StudyBuddy API key", &lookup)
            .map_err(|_| ConfigError::Missing(API_KEY_ENV))?;
        let base_url = require(BASE_URL_ENV)?;
        let model = require(MODEL_ENV)?;

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: BASE_URL_ENV,
                reason: "must start with http:// or https://".to_string(),
            });
        }

        let defaults = PipelineSettings::default();
        let duration = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(raw) => humantime::parse_duration(&raw).map_err(|e| ConfigError::Invalid {
                    var: key,
                    reason: e.to_string(),
                }),
                None => Ok(default),
            }
        };

        let failure_policy = match get(FAILURE_POLICY_ENV) {
            Some(raw) => raw.parse::<FailurePolicy>().map_err(|reason| ConfigError::Invalid {
                var: FAILURE_POLICY_ENV,
                reason,
            })?,
            None => defaults.failure_policy,
        };

        let pipeline = PipelineSettings {
            guardrail_model: get(GUARDRAIL_MODEL_ENV).unwrap_or_else(|| model.clone()),
            model,
            guardrail_timeout: duration(GUARDRAIL_TIMEOUT_ENV, defaults.guardrail_timeout)?,
            agent_timeout: duration(AGENT_TIMEOUT_ENV, defaults.agent_timeout)?,
            failure_policy,
            ..defaults
        };

        let developer = match (
            get(DEVELOPER_NAME_ENV),
            get(DEVELOPER_MAIL_ENV),
            get(DEVELOPER_GITHUB_ENV),
        ) {
            (Some(name), Some(mail), Some(github)) => Some(DeveloperInfo { name, mail, github }),
            (None, None, None) => None,
            _ => {
                tracing::warn!("Developer info is partially configured; developer_info tool disabled");
                None
            }
        };

        Ok(Self {
            api_key,
            base_url,
            pipeline,
            history_dir: get(HISTORY_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("history")),
            developer,
        })
    }
}
