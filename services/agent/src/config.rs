//! Configuration for the agent.
//!
//! Values come from `CENTRAL_*` and `AGENT_*` environment variables. After
//! loading, [`Config::validate`] walks each section's [`Validatable`]
//! implementation in a fixed order and stops at the first failure.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agentsdk_resource::KnownKind;
use anyhow::{Context, Result};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A configuration section that can check itself.
pub trait Validatable {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Which class of agent this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentType {
    Discovery,
    Traceability,
    Compliance,
}

impl AgentType {
    /// Kind of the agent's own resource.
    pub fn resource_kind(&self) -> KnownKind {
        match self {
            Self::Discovery => KnownKind::DiscoveryAgent,
            Self::Traceability => KnownKind::TraceabilityAgent,
            Self::Compliance => KnownKind::ComplianceAgent,
        }
    }

    fn topic_suffix(&self) -> &'static str {
        match self {
            Self::Discovery => "discoveryagents",
            Self::Traceability => "traceabilityagents",
            Self::Compliance => "governanceagents",
        }
    }
}

impl FromStr for AgentType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discovery" | "discoveryagent" => Ok(Self::Discovery),
            "traceability" | "traceabilityagent" => Ok(Self::Traceability),
            "compliance" | "complianceagent" | "governance" => Ok(Self::Compliance),
            other => Err(ConfigError::Invalid {
                name: "AGENT_TYPE",
                reason: format!("unknown agent type {other}"),
            }),
        }
    }
}

/// How events are delivered after the initial catch-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    Stream,
    Poll,
}

impl FromStr for EventMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "grpc" => Ok(Self::Stream),
            "poll" | "polling" => Ok(Self::Poll),
            other => Err(ConfigError::Invalid {
                name: "AGENT_EVENT_MODE",
                reason: format!("unknown event mode {other}"),
            }),
        }
    }
}

/// Credential handling settings.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// Mark expired credentials inactive.
    pub deprovision_expired: bool,

    /// Cron expression for the expiry scan.
    pub expiry_schedule: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            deprovision_expired: false,
            expiry_schedule: "0 0 * * * *".to_string(),
        }
    }
}

impl Validatable for CredentialConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        cron::Schedule::from_str(&normalize_cron(&self.expiry_schedule)).map_err(|e| {
            ConfigError::Invalid {
                name: "AGENT_CREDENTIAL_EXPIRY_SCHEDULE",
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}

/// Control plane connection and scheduling settings.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// Control plane API URL.
    pub url: String,

    /// Replay (harvester) API URL.
    pub harvester_url: String,

    pub tenant_id: String,

    /// Environment the agent publishes into.
    pub environment: String,

    /// Name of the agent resource; required for status reporting.
    pub agent_name: Option<String>,

    /// Bearer token sent with every request.
    pub auth_token: Option<String>,

    /// Page size for list calls.
    pub page_size: usize,

    /// Interval between polls and between agent-kinds ACL checks.
    pub poll_interval: Duration,

    /// Interval between instance validation runs.
    pub api_validation_frequency: Duration,

    /// Interval between periodic status reports.
    pub report_activity_frequency: Duration,

    /// Timeout for a single HTTP request.
    pub client_timeout: Duration,

    pub credentials: CredentialConfig,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            harvester_url: "http://127.0.0.1:8080".to_string(),
            tenant_id: String::new(),
            environment: String::new(),
            agent_name: None,
            auth_token: None,
            page_size: 100,
            poll_interval: Duration::from_secs(60),
            api_validation_frequency: Duration::from_secs(30 * 60),
            report_activity_frequency: Duration::from_secs(5 * 60),
            client_timeout: Duration::from_secs(60),
            credentials: CredentialConfig::default(),
        }
    }
}

impl Validatable for CentralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Missing("CENTRAL_URL"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "CENTRAL_URL",
                reason: format!("{} is not an http(s) url", self.url),
            });
        }
        if self.environment.is_empty() {
            return Err(ConfigError::Missing("CENTRAL_ENVIRONMENT"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "CENTRAL_PAGE_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                name: "CENTRAL_POLL_INTERVAL_SECS",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.api_validation_frequency.is_zero() {
            return Err(ConfigError::Invalid {
                name: "CENTRAL_API_VALIDATION_FREQUENCY_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.report_activity_frequency.is_zero() {
            return Err(ConfigError::Invalid {
                name: "CENTRAL_REPORT_ACTIVITY_FREQUENCY_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Local cache persistence settings.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// SQLite file to persist the cache to; `None` keeps it in memory only.
    pub persist_path: Option<PathBuf>,
}

impl Validatable for CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match &self.persist_path {
            Some(path) if path.as_os_str().is_empty() => Err(ConfigError::Invalid {
                name: "AGENT_CACHE_PATH",
                reason: "path is empty".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub agent_type: AgentType,

    pub event_mode: EventMode,

    pub central: CentralConfig,

    pub cache: CacheConfig,

    /// Window over which ACL subject changes are batched.
    pub acl_debounce: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human readable ones.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_type: AgentType::Discovery,
            event_mode: EventMode::Poll,
            central: CentralConfig::default(),
            cache: CacheConfig::default(),
            acl_debounce: Duration::from_secs(5),
            log_level: "info".to_string(),
            log_json: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let central_defaults = defaults.central.clone();

        let url = std::env::var("CENTRAL_URL").unwrap_or(central_defaults.url);
        let harvester_url = std::env::var("CENTRAL_HARVESTER_URL").unwrap_or_else(|_| url.clone());

        let central = CentralConfig {
            url,
            harvester_url,
            tenant_id: std::env::var("CENTRAL_TENANT_ID").unwrap_or_default(),
            environment: std::env::var("CENTRAL_ENVIRONMENT").unwrap_or_default(),
            agent_name: std::env::var("CENTRAL_AGENT_NAME")
                .ok()
                .filter(|s| !s.is_empty()),
            auth_token: std::env::var("CENTRAL_AUTH_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            page_size: env_parse("CENTRAL_PAGE_SIZE")?.unwrap_or(central_defaults.page_size),
            poll_interval: env_secs("CENTRAL_POLL_INTERVAL_SECS")?
                .unwrap_or(central_defaults.poll_interval),
            api_validation_frequency: env_secs("CENTRAL_API_VALIDATION_FREQUENCY_SECS")?
                .unwrap_or(central_defaults.api_validation_frequency),
            report_activity_frequency: env_secs("CENTRAL_REPORT_ACTIVITY_FREQUENCY_SECS")?
                .unwrap_or(central_defaults.report_activity_frequency),
            client_timeout: env_secs("CENTRAL_CLIENT_TIMEOUT_SECS")?
                .unwrap_or(central_defaults.client_timeout),
            credentials: CredentialConfig {
                deprovision_expired: env_parse("CENTRAL_CREDENTIALS_DEPROVISION_EXPIRED")?
                    .unwrap_or(central_defaults.credentials.deprovision_expired),
                expiry_schedule: std::env::var("AGENT_CREDENTIAL_EXPIRY_SCHEDULE")
                    .unwrap_or(central_defaults.credentials.expiry_schedule),
            },
        };

        let agent_type = match std::env::var("AGENT_TYPE") {
            Ok(v) => v.parse().context("Invalid AGENT_TYPE")?,
            Err(_) => defaults.agent_type,
        };
        let event_mode = match std::env::var("AGENT_EVENT_MODE") {
            Ok(v) => v.parse().context("Invalid AGENT_EVENT_MODE")?,
            Err(_) => defaults.event_mode,
        };

        Ok(Self {
            agent_type,
            event_mode,
            central,
            cache: CacheConfig {
                persist_path: std::env::var("AGENT_CACHE_PATH").ok().map(PathBuf::from),
            },
            acl_debounce: env_secs("AGENT_ACL_DEBOUNCE_SECS")?.unwrap_or(defaults.acl_debounce),
            log_level: std::env::var("AGENT_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: std::env::var("AGENT_LOG_FORMAT")
                .map(|f| f != "pretty")
                .unwrap_or(defaults.log_json),
        })
    }

    /// Run every section's validator in order, stopping at the first error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let validators: [&dyn Validatable; 3] =
            [&self.central, &self.central.credentials, &self.cache];
        for validator in validators {
            validator.validate()?;
        }
        Ok(())
    }

    /// Name of the watch topic this agent consumes.
    pub fn watch_topic_name(&self) -> String {
        let prefix = self
            .central
            .agent_name
            .as_deref()
            .unwrap_or(&self.central.environment);
        format!("{}-{}", prefix, self.agent_type.topic_suffix())
    }

    /// Self link of the watch topic this agent consumes.
    pub fn watch_topic_self_link(&self) -> String {
        format!(
            "/management/v1alpha1/watchtopics/{}",
            self.watch_topic_name()
        )
    }

    pub fn is_discovery(&self) -> bool {
        self.agent_type == AgentType::Discovery
    }
}

/// Accept five-field cron expressions by prepending a seconds field.
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    match expr {
        "hourly" | "@hourly" => "0 0 * * * *".to_string(),
        "daily" | "@daily" => "0 0 0 * * *".to_string(),
        _ if expr.split_whitespace().count() == 5 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(name)
        .ok()
        .map(|v| v.parse::<T>())
        .transpose()
        .with_context(|| format!("Invalid {}", name))
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}
