/// Configuration management for balanza

use crate::jobs::{BackoffPolicy, ConsistencyLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

pub use crate::error::ConfigError;

/// Longest consistency retry delay a configuration may produce (7 days)
pub const MAX_RETRY_DELAY_SEC: u64 = 7 * 24 * 3600;

/// Main balanza configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Primary database configuration
    pub primary: PrimaryConfig,
    /// Replica pool configuration
    pub load_balancing: LoadBalancingConfig,
    /// Replica health check configuration
    pub health: HealthConfig,
    /// Consistency retry policy
    pub retry: RetryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Per job kind consistency declarations
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Primary database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    /// Address of the writable primary
    pub address: String,
}

/// Replica pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    /// Replica addresses (host:port)
    pub hosts: Vec<String>,
    /// Identity of the connection pool these replicas belong to
    pub pool: String,
    /// Replication lag in seconds under which a replica stays online
    pub max_replication_lag_sec: u64,
    /// Position difference to the primary under which a replica stays online
    pub max_replication_difference: u64,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Health check interval in seconds
    pub interval_sec: u64,
    /// Health check timeout in seconds
    pub timeout_sec: u64,
}

/// Backoff and retry budget for jobs waiting on replicas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Exponent applied to the attempt number
    pub exponent: u32,
    /// Fixed delay added to every retry, in seconds
    pub base_delay_sec: u64,
    /// Upper bound (exclusive) of the random jitter, in seconds
    pub jitter_sec: u64,
    /// Attempts allowed for job kinds that do not set their own
    pub default_max_attempts: u32,
}

/// Consistency declaration of one job kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyLevel>,
    #[serde(default = "default_propagation_enabled")]
    pub propagation_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_attempts: Option<u32>,
}

fn default_propagation_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary: PrimaryConfig {
                address: "127.0.0.1:5432".to_string(),
            },
            load_balancing: LoadBalancingConfig {
                hosts: vec!["127.0.0.1:5433".to_string()],
                pool: "main".to_string(),
                max_replication_lag_sec: 60,
                max_replication_difference: 8 * 1024 * 1024,
            },
            health: HealthConfig {
                interval_sec: 10,
                timeout_sec: 5,
            },
            retry: RetryConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
            jobs: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            exponent: 4,
            base_delay_sec: 15,
            jitter_sec: 30,
            default_max_attempts: 3,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate addresses
        self.primary.address.parse::<SocketAddr>()
            .map_err(|_| ConfigError::ValidationError(
                format!("Invalid primary address: {}", self.primary.address)
            ))?;

        for host in &self.load_balancing.hosts {
            host.parse::<SocketAddr>()
                .map_err(|_| ConfigError::ValidationError(
                    format!("Invalid replica host: {}", host)
                ))?;
        }

        if self.load_balancing.pool.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "load_balancing pool cannot be empty".to_string(),
            ));
        }

        // Validate health config
        if self.health.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec >= self.health.interval_sec {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be less than interval_sec".to_string(),
            ));
        }

        // Validate retry policy
        if self.retry.default_max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry default_max_attempts must be greater than 0".to_string(),
            ));
        }

        self.validate_retry_delay("default", self.retry.default_max_attempts)?;

        let mut names = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "job name cannot be empty".to_string(),
                ));
            }
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::ValidationError(
                    format!("Duplicate job kind: {}", job.name)
                ));
            }
            if job.max_retry_attempts == Some(0) {
                return Err(ConfigError::ValidationError(
                    format!("max_retry_attempts for {} must be greater than 0", job.name)
                ));
            }
            if let Some(max_attempts) = job.max_retry_attempts {
                self.validate_retry_delay(&job.name, max_attempts)?;
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// The last retry of a kind allowing `max_attempts` happens on attempt
    /// `max_attempts - 1`, and delays grow with the attempt.
    fn validate_retry_delay(&self, kind: &str, max_attempts: u32) -> Result<(), ConfigError> {
        let policy = BackoffPolicy::from_config(&self.retry);
        let longest = policy.max_delay_for(max_attempts.saturating_sub(1));
        if longest.as_secs() > MAX_RETRY_DELAY_SEC {
            return Err(ConfigError::ValidationError(format!(
                "retry delay for {} reaches {}s, more than {}s",
                kind,
                longest.as_secs(),
                MAX_RETRY_DELAY_SEC
            )));
        }
        Ok(())
    }

    /// Find the declaration of a job kind
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            primary: PrimaryConfig {
                address: "10.0.1.10:5432".to_string(),
            },
            load_balancing: LoadBalancingConfig {
                hosts: vec![
                    "10.0.1.11:5432".to_string(),
                    "10.0.1.12:5432".to_string(),
                    "10.0.1.13:5432".to_string(),
                ],
                ..Config::default().load_balancing
            },
            jobs: vec![
                JobConfig {
                    name: "AuthorizedKeysWorker".to_string(),
                    consistency: Some(ConsistencyLevel::Strict),
                    propagation_enabled: true,
                    max_retry_attempts: None,
                },
                JobConfig {
                    name: "ProjectCacheWorker".to_string(),
                    consistency: Some(ConsistencyLevel::Delayed),
                    propagation_enabled: true,
                    max_retry_attempts: Some(5),
                },
                JobConfig {
                    name: "EmailReceiverWorker".to_string(),
                    consistency: Some(ConsistencyLevel::Sticky),
                    propagation_enabled: true,
                    max_retry_attempts: None,
                },
            ],
            ..Default::default()
        };

        config.save_to_file(path)
    }
}
