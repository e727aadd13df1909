// cqlkit/src/lib.rs
//
// Asynchronous statement execution over a CQL cluster: sessions, futures
// with callbacks, retry and timeout profiles, batches and a small object mapper
//

pub mod batch;
pub mod config;
pub mod database;
pub mod errors;
pub mod future;
pub mod mapper;
pub mod metrics;
pub mod session;
pub mod statement;
pub mod types;

pub use batch::{Batch, BatchType};
pub use config::{
    load_cluster_config, ClusterConfig, Credentials, ExecutionProfileConfig, ObservabilityConfig,
    DEFAULT_PROFILE,
};
pub use database::{
    DatabaseDriver, DatabaseFactory, LoadBalancingPolicy, MemoryCluster, ReconnectionPolicy,
    RetryDecision, RetryPolicy, Transport,
};
pub use errors::{DriverError, ServerErrorCode};
pub use future::{QueryOutcome, ResponseFuture};
pub use mapper::{sync_table, ColumnDef, Mapper, Model, QuerySet, TableSchema};
pub use session::{Cluster, ClusterBuilder, ExecutionProfile, Session};
pub use statement::{Statement, Values};
pub use types::{ColumnSpec, ColumnType, Consistency, CqlValue, FromCqlValue, ResultKind, ResultSet, Row};
