pub mod connection;
pub mod factory;
pub mod load_balancing;
pub mod memory;
pub mod query_builder;
pub mod retry;
#[cfg(feature = "scylla")]
pub mod scylla;

pub use connection::{ConnectionPool, NodeConnection, PoolOptions, Request, RequestBody, Transport};
pub use factory::{DatabaseDriver, DatabaseFactory};
pub use load_balancing::LoadBalancingPolicy;
pub use memory::MemoryCluster;
pub use query_builder::QueryBuilder;
pub use retry::{ReconnectionPolicy, RetryDecision, RetryPolicy};
#[cfg(feature = "scylla")]
pub use self::scylla::{ScyllaConnection, ScyllaTransport};
