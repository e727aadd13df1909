use anyhow::Result;
use config::{Config, Environment, File};
use cqlkit::{ClusterConfig, ObservabilityConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEYSPACE: &str = "elko";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub tour: TourSettings,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TourSettings {
    /// Create the keyspace and tables the tour reads before starting
    pub bootstrap_schema: bool,
    pub concurrent_queries: usize,
}

impl Default for TourSettings {
    fn default() -> Self {
        Self {
            bootstrap_schema: true,
            concurrent_queries: 10,
        }
    }
}

impl TourConfig {
    pub fn keyspace(&self) -> &str {
        self.cluster.keyspace.as_deref().unwrap_or(DEFAULT_KEYSPACE)
    }
}

pub fn load_config(path: &str) -> Result<TourConfig> {
    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix("DRIVER_TOUR").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}
