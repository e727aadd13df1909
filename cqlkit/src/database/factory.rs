// cqlkit/src/database/factory.rs
//
// Factory Pattern for runtime transport selection
// Supports: in-process cluster, ScyllaDB, Cassandra 4.x
//

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::ClusterConfig;
use crate::errors::DriverError;

use super::connection::Transport;
use super::memory::MemoryCluster;

/// Supported drivers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    Memory,
    Scylla,
    Cassandra,
}

impl From<&str> for DatabaseDriver {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cassandra" | "cassandra4" | "cass" => DatabaseDriver::Cassandra,
            "scylla" | "scylladb" => DatabaseDriver::Scylla,
            _ => DatabaseDriver::Memory,
        }
    }
}

impl From<String> for DatabaseDriver {
    fn from(s: String) -> Self {
        DatabaseDriver::from(s.as_str())
    }
}

/// Transport factory
pub struct DatabaseFactory;

impl DatabaseFactory {
    /// Create a transport based on driver type
    pub fn create(
        driver: DatabaseDriver,
        config: &ClusterConfig,
    ) -> Result<Arc<dyn Transport>, DriverError> {
        info!("Creating transport with driver: {:?}", driver);

        match driver {
            DatabaseDriver::Memory => {
                let mut cluster = MemoryCluster::new(config.contact_points());
                if let Some(credentials) = config.credentials() {
                    cluster = cluster.with_credentials(credentials.username, credentials.password);
                }
                Ok(Arc::new(cluster))
            }
            DatabaseDriver::Scylla | DatabaseDriver::Cassandra => Self::create_cql(driver),
        }
    }

    /// Create from config (reads driver field from config)
    pub fn create_from_config(config: &ClusterConfig) -> Result<Arc<dyn Transport>, DriverError> {
        Self::create(DatabaseDriver::from(config.driver.as_str()), config)
    }

    #[cfg(feature = "scylla")]
    fn create_cql(driver: DatabaseDriver) -> Result<Arc<dyn Transport>, DriverError> {
        // Scylla driver speaks the same CQL binary protocol as Cassandra 4.x
        let name = match driver {
            DatabaseDriver::Cassandra => "cassandra",
            _ => "scylla",
        };
        Ok(Arc::new(super::scylla::ScyllaTransport::new(name)))
    }

    #[cfg(not(feature = "scylla"))]
    fn create_cql(driver: DatabaseDriver) -> Result<Arc<dyn Transport>, DriverError> {
        Err(DriverError::ConfigError(format!(
            "driver {:?} requires building with the `scylla` feature",
            driver
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_from_string() {
        assert_eq!(DatabaseDriver::from("cassandra"), DatabaseDriver::Cassandra);
        assert_eq!(DatabaseDriver::from("Cassandra4"), DatabaseDriver::Cassandra);
        assert_eq!(DatabaseDriver::from("scylla"), DatabaseDriver::Scylla);
        assert_eq!(DatabaseDriver::from("ScyllaDB".to_string()), DatabaseDriver::Scylla);
        assert_eq!(DatabaseDriver::from("memory"), DatabaseDriver::Memory);
        assert_eq!(DatabaseDriver::from("unknown"), DatabaseDriver::Memory);
    }

    #[test]
    fn test_memory_transport_from_config() {
        let config = ClusterConfig::default();
        let transport = DatabaseFactory::create_from_config(&config).unwrap();
        assert_eq!(transport.driver_name(), "memory");
    }

    #[cfg(not(feature = "scylla"))]
    #[test]
    fn test_cql_driver_needs_feature() {
        let config = ClusterConfig::default();
        assert!(matches!(
            DatabaseFactory::create(DatabaseDriver::Scylla, &config),
            Err(DriverError::ConfigError(_))
        ));
    }
}
