use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::database::load_balancing::LoadBalancingPolicy;
use crate::database::retry::{ReconnectionPolicy, RetryPolicy};
use crate::errors::DriverError;
use crate::types::Consistency;

/// Name of the profile applied to statements that do not pick one
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub driver: String,
    pub hosts: Vec<String>,
    pub port: u16,
    pub keyspace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_timeout_ms: u64,
    pub pool_size: u32,
    pub reconnection: ReconnectionConfig,
    pub profiles: HashMap<String, ExecutionProfileConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), ExecutionProfileConfig::default());

        Self {
            driver: "memory".to_string(),
            hosts: vec!["127.0.0.1".to_string()],
            port: 9042,
            keyspace: None,
            username: None,
            password: None,
            connection_timeout_ms: 5_000,
            pool_size: 2,
            reconnection: ReconnectionConfig::default(),
            profiles,
        }
    }
}

impl ClusterConfig {
    /// Contact points as `host:port`; hosts that already carry a port are kept
    pub fn contact_points(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|host| with_default_port(host, self.port))
            .collect()
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.hosts.is_empty() {
            return Err(DriverError::ConfigError("at least one host is required".to_string()));
        }
        if self.pool_size == 0 {
            return Err(DriverError::ConfigError("pool_size must be positive".to_string()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(DriverError::ConfigError(
                "username and password must be set together".to_string(),
            ));
        }
        if !self.profiles.contains_key(DEFAULT_PROFILE) {
            return Err(DriverError::ConfigError(format!(
                "missing '{}' execution profile",
                DEFAULT_PROFILE
            )));
        }
        let contact_points = self.contact_points();
        for (name, profile) in &self.profiles {
            if profile.request_timeout_ms == 0 {
                return Err(DriverError::ConfigError(format!(
                    "profile '{}': request_timeout_ms must be positive",
                    name
                )));
            }
            if let LoadBalancingPolicy::WhiteListRoundRobin { hosts } =
                profile.load_balancing.policy(self.port)
            {
                if let Some(host) = hosts.iter().find(|h| !contact_points.contains(h)) {
                    return Err(DriverError::ConfigError(format!(
                        "profile '{}': white-listed host {} is not a contact point",
                        name, host
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `host` as `host:port`; hosts that already carry a port are kept
fn with_default_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    }
}

/// Plain-text credentials presented when a connection is opened
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionProfileConfig {
    pub request_timeout_ms: u64,
    pub consistency: Consistency,
    pub retry: RetryConfig,
    pub load_balancing: LoadBalancingConfig,
}

impl Default for ExecutionProfileConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            consistency: Consistency::default(),
            retry: RetryConfig::default(),
            load_balancing: LoadBalancingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryConfig {
    Fallthrough,
    Constant {
        delay_ms: u64,
        max_retries: u32,
    },
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        exponential_base: f64,
        max_retries: u32,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Exponential {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
            max_retries: 2,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        match config {
            RetryConfig::Fallthrough => RetryPolicy::fallthrough(),
            RetryConfig::Constant { delay_ms, max_retries } => {
                RetryPolicy::constant(Duration::from_millis(*delay_ms), *max_retries)
            }
            RetryConfig::Exponential {
                initial_delay_ms,
                max_delay_ms,
                exponential_base,
                max_retries,
            } => RetryPolicy::exponential(
                Duration::from_millis(*initial_delay_ms),
                Duration::from_millis(*max_delay_ms),
                *exponential_base,
                *max_retries,
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadBalancingConfig {
    #[default]
    RoundRobin,
    WhiteListRoundRobin {
        hosts: Vec<String>,
    },
}

impl LoadBalancingConfig {
    /// Policy over `host:port` addresses, the form nodes are known by
    pub fn policy(&self, default_port: u16) -> LoadBalancingPolicy {
        match self {
            LoadBalancingConfig::RoundRobin => LoadBalancingPolicy::RoundRobin,
            LoadBalancingConfig::WhiteListRoundRobin { hosts } => {
                LoadBalancingPolicy::WhiteListRoundRobin {
                    hosts: hosts
                        .iter()
                        .map(|host| with_default_port(host, default_port))
                        .collect(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectionConfig {
    Constant { delay_ms: u64 },
    Exponential { base_delay_ms: u64, max_delay_ms: u64 },
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        ReconnectionConfig::Exponential {
            base_delay_ms: 1_000,
            max_delay_ms: 600_000,
        }
    }
}

impl From<&ReconnectionConfig> for ReconnectionPolicy {
    fn from(config: &ReconnectionConfig) -> Self {
        match config {
            ReconnectionConfig::Constant { delay_ms } => ReconnectionPolicy::Constant {
                delay: Duration::from_millis(*delay_ms),
            },
            ReconnectionConfig::Exponential {
                base_delay_ms,
                max_delay_ms,
            } => ReconnectionPolicy::Exponential {
                base_delay: Duration::from_millis(*base_delay_ms),
                max_delay: Duration::from_millis(*max_delay_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub print_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            print_metrics: false,
        }
    }
}

/// Loads a cluster configuration from a file, overlaid with `<prefix>__*` variables
pub fn load_cluster_config(path: &str, env_prefix: &str) -> Result<ClusterConfig, DriverError> {
    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix(env_prefix).separator("__"))
        .build()?;

    let cluster: ClusterConfig = config.try_deserialize()?;
    cluster.validate()?;
    Ok(cluster)
}
