// cqlkit/src/session.rs
//
// Cluster builder and Session - statement executor over the connection pool
// Every submission walks a query plan under the profile's retry policy
//

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::Batch;
use crate::config::{ClusterConfig, Credentials, ExecutionProfileConfig, DEFAULT_PROFILE};
use crate::database::connection::{ConnectionPool, Node, PoolOptions, Request, RequestBody, Transport};
use crate::database::factory::DatabaseFactory;
use crate::database::load_balancing::LoadBalancingPolicy;
use crate::database::query_builder::QueryBuilder;
use crate::database::retry::{ReconnectionPolicy, RetryContext, RetryDecision, RetryPolicy};
use crate::errors::DriverError;
use crate::future::{QueryOutcome, ResponseFuture};
use crate::metrics;
use crate::statement::{Statement, Values};
use crate::types::{Consistency, ResultKind, ResultSet};

/// Client-side policies applied to every statement run under a profile
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionProfile {
    pub request_timeout: Duration,
    pub consistency: Consistency,
    pub retry: RetryPolicy,
    pub load_balancing: LoadBalancingPolicy,
}

impl Default for ExecutionProfile {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            consistency: Consistency::default(),
            retry: RetryPolicy::default(),
            load_balancing: LoadBalancingPolicy::default(),
        }
    }
}

impl ExecutionProfile {
    /// Profile from its configuration; white-listed hosts without a port
    /// take `default_port`
    pub fn from_config(config: &ExecutionProfileConfig, default_port: u16) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            consistency: config.consistency,
            retry: RetryPolicy::from(&config.retry),
            load_balancing: config.load_balancing.policy(default_port),
        }
    }
}

pub struct ClusterBuilder {
    contact_points: Vec<String>,
    credentials: Option<Credentials>,
    profiles: HashMap<String, ExecutionProfile>,
    pool_size: usize,
    connection_timeout: Duration,
    reconnection: ReconnectionPolicy,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), ExecutionProfile::default());
        Self {
            contact_points: Vec::new(),
            credentials: None,
            profiles,
            pool_size: 2,
            connection_timeout: Duration::from_secs(5),
            reconnection: ReconnectionPolicy::default(),
            transport: None,
            runtime: None,
        }
    }
}

impl ClusterBuilder {
    /// Builder pre-filled from a loaded configuration; the transport is still unset
    pub fn from_config(config: &ClusterConfig) -> Self {
        let mut builder = Self::default()
            .contact_points(config.contact_points())
            .pool_size(config.pool_size as usize)
            .connection_timeout(config.connection_timeout())
            .reconnection(ReconnectionPolicy::from(&config.reconnection));
        builder.credentials = config.credentials();
        for (name, profile) in &config.profiles {
            builder = builder.execution_profile(name, ExecutionProfile::from_config(profile, config.port));
        }
        builder
    }

    pub fn contact_point(mut self, address: impl Into<String>) -> Self {
        self.contact_points.push(address.into());
        self
    }

    pub fn contact_points<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contact_points
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn execution_profile(mut self, name: impl Into<String>, profile: ExecutionProfile) -> Self {
        self.profiles.insert(name.into(), profile);
        self
    }

    pub fn default_profile(self, profile: ExecutionProfile) -> Self {
        self.execution_profile(DEFAULT_PROFILE, profile)
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Runtime that runs async submissions and reconnection; defaults to the
    /// runtime `build` is called from
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Cluster, DriverError> {
        if self.contact_points.is_empty() {
            return Err(DriverError::ConfigError(
                "at least one contact point is required".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(DriverError::ConfigError("pool_size must be positive".to_string()));
        }
        let transport = self
            .transport
            .ok_or_else(|| DriverError::ConfigError("no transport configured".to_string()))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                DriverError::ConfigError(format!("no tokio runtime available: {}", e))
            })?,
        };

        Ok(Cluster {
            contact_points: self.contact_points,
            profiles: Arc::new(self.profiles),
            pool_options: PoolOptions {
                pool_size: self.pool_size,
                connection_timeout: self.connection_timeout,
                credentials: self.credentials,
                reconnection: self.reconnection,
            },
            transport,
            runtime,
        })
    }
}

/// Cluster description from which sessions are opened
pub struct Cluster {
    contact_points: Vec<String>,
    profiles: Arc<HashMap<String, ExecutionProfile>>,
    pool_options: PoolOptions,
    transport: Arc<dyn Transport>,
    runtime: Handle,
}

impl Cluster {
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::default()
    }

    /// Cluster using the transport named by `config.driver`
    pub fn from_config(config: &ClusterConfig) -> Result<Self, DriverError> {
        config.validate()?;
        ClusterBuilder::from_config(config)
            .transport(DatabaseFactory::create_from_config(config)?)
            .build()
    }

    pub fn contact_points(&self) -> &[String] {
        &self.contact_points
    }

    pub fn driver_name(&self) -> &str {
        self.transport.driver_name()
    }

    /// Opens the node pools and, if given, switches to `keyspace`
    pub async fn connect(&self, keyspace: Option<&str>) -> Result<Session, DriverError> {
        let pool = ConnectionPool::connect(
            self.transport.clone(),
            &self.contact_points,
            self.pool_options.clone(),
            self.runtime.clone(),
        )
        .await?;

        let session = Session {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                pool,
                profiles: self.profiles.clone(),
                keyspace: RwLock::new(None),
                in_flight: DashMap::new(),
                runtime: self.runtime.clone(),
                closed: AtomicBool::new(false),
            }),
        };

        if let Some(keyspace) = keyspace {
            if let Err(err) = session.set_keyspace(keyspace).await {
                session.close().await;
                return Err(err);
            }
        }

        info!("Session {} connected", session.inner.id);
        Ok(session)
    }
}

struct SessionInner {
    id: Uuid,
    pool: Arc<ConnectionPool>,
    profiles: Arc<HashMap<String, ExecutionProfile>>,
    keyspace: RwLock<Option<String>>,
    in_flight: DashMap<Uuid, ResponseFuture>,
    runtime: Handle,
    closed: AtomicBool,
}

/// Picks the first live node of the plan at or after `from`, wrapping around
fn next_live_node(plan: &[Arc<Node>], from: usize) -> Option<(usize, Arc<Node>)> {
    (0..plan.len())
        .map(|offset| (from + offset) % plan.len())
        .find(|&i| plan[i].is_up())
        .map(|i| (i, plan[i].clone()))
}

fn untrack(session: &Weak<SessionInner>, id: Uuid) {
    if let Some(inner) = session.upgrade() {
        if inner.in_flight.remove(&id).is_some() {
            metrics::IN_FLIGHT.dec();
        }
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn profile(&self, name: Option<&str>) -> Result<&ExecutionProfile, DriverError> {
        let name = name.unwrap_or(DEFAULT_PROFILE);
        self.profiles.get(name).ok_or_else(|| {
            DriverError::InvalidRequest(format!("unknown execution profile '{}'", name))
        })
    }

    async fn run(&self, body: RequestBody, operation: &'static str) -> QueryOutcome {
        let start = Instant::now();
        let outcome = self.execute_with_retries(body).await;
        let status = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        metrics::record_operation(operation, status, start.elapsed().as_secs_f64());
        outcome
    }

    async fn execute_with_retries(&self, body: RequestBody) -> QueryOutcome {
        if self.is_closed() {
            return Err(DriverError::SessionClosed);
        }

        let (profile, consistency, idempotent, timeout_override) = match &body {
            RequestBody::Query(statement) => (
                self.profile(statement.get_profile())?,
                statement.get_consistency(),
                statement.is_idempotent(),
                statement.get_timeout(),
            ),
            RequestBody::Batch(batch) => {
                if batch.is_empty() {
                    return Err(DriverError::InvalidRequest(
                        "batch contains no statements".to_string(),
                    ));
                }
                (
                    self.profile(batch.get_profile())?,
                    batch.get_consistency(),
                    batch.is_idempotent(),
                    None,
                )
            }
        };
        let timeout = timeout_override.unwrap_or(profile.request_timeout);
        let request = Request {
            body,
            keyspace: self.keyspace.read().clone(),
            consistency: consistency.unwrap_or(profile.consistency),
        };

        let plan = self.pool.query_plan(&profile.load_balancing);
        if plan.is_empty() {
            return Err(DriverError::UnavailableError(
                "No hosts available for the query plan".to_string(),
            ));
        }

        let mut position = 0;
        let mut retries = 0u32;
        loop {
            if self.is_closed() {
                return Err(DriverError::SessionClosed);
            }
            let (index, node) = match next_live_node(&plan, position) {
                Some(found) => found,
                None => {
                    return Err(DriverError::UnavailableError(
                        "All hosts in the query plan are down".to_string(),
                    ))
                }
            };

            let error = match node.connection() {
                None => DriverError::UnavailableError(format!(
                    "No open connection to {}",
                    node.address()
                )),
                Some(connection) => {
                    match tokio::time::timeout(timeout, connection.execute(&request)).await {
                        Ok(Ok(result)) => {
                            if let ResultKind::SetKeyspace(keyspace) = result.kind() {
                                info!("Session {} now using keyspace {}", self.id, keyspace);
                                *self.keyspace.write() = Some(keyspace.clone());
                            }
                            return Ok(result);
                        }
                        // Coordinator-side timeouts carry no duration of their own
                        Ok(Err(DriverError::TimeoutError(elapsed))) if elapsed.is_zero() => {
                            DriverError::TimeoutError(timeout)
                        }
                        Ok(Err(err)) => err,
                        Err(_) => DriverError::TimeoutError(timeout),
                    }
                }
            };

            if matches!(error, DriverError::UnavailableError(_)) {
                self.pool.mark_down(&node, &error);
            }

            let decision = profile.retry.decide(&RetryContext {
                error: &error,
                idempotent,
                retries,
            });
            let delay = match decision {
                RetryDecision::DontRetry => {
                    debug!("Request failed on {}: {}", node.address(), error);
                    return Err(error);
                }
                RetryDecision::RetrySameNode(delay) => {
                    position = index;
                    delay
                }
                RetryDecision::RetryNextNode(delay) => {
                    position = index + 1;
                    delay
                }
            };

            retries += 1;
            metrics::record_retry(error.kind());
            warn!(
                "Retrying request (attempt {}) after {} on {}",
                retries + 1,
                error,
                node.address()
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Authenticated, keyspace-scoped handle shared by every caller.
///
/// Clones share the same pools, keyspace and in-flight registry.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("keyspace", &self.keyspace())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub async fn execute(&self, statement: impl Into<Statement>) -> QueryOutcome {
        self.inner
            .run(RequestBody::Query(statement.into()), "execute")
            .await
    }

    /// Runs `text` with `values` bound to its markers
    pub async fn query(&self, text: &str, values: impl Into<Values>) -> QueryOutcome {
        self.execute(Statement::new(text).bind(values)).await
    }

    /// Submits the statement on the session runtime and returns at once
    pub fn execute_async(&self, statement: impl Into<Statement>) -> ResponseFuture {
        self.submit(RequestBody::Query(statement.into()), "execute_async")
    }

    pub async fn batch(&self, batch: &Batch) -> QueryOutcome {
        self.inner
            .run(RequestBody::Batch(batch.clone()), "batch")
            .await
    }

    pub fn batch_async(&self, batch: &Batch) -> ResponseFuture {
        self.submit(RequestBody::Batch(batch.clone()), "batch_async")
    }

    fn submit(&self, body: RequestBody, operation: &'static str) -> ResponseFuture {
        let future = ResponseFuture::pending();
        if self.is_closed() {
            future.complete(Err(DriverError::SessionClosed));
            return future;
        }

        let id = future.id();
        let (on_success, on_failure) = (Arc::downgrade(&self.inner), Arc::downgrade(&self.inner));
        future.add_callbacks(
            move |_| untrack(&on_success, id),
            move |_| untrack(&on_failure, id),
        );
        self.inner.in_flight.insert(id, future.clone());
        metrics::IN_FLIGHT.inc();

        let inner = self.inner.clone();
        let completer = future.clone();
        let task = self.inner.runtime.spawn(async move {
            let outcome = inner.run(body, operation).await;
            completer.complete(outcome);
        });
        future.set_abort_handle(task.abort_handle());
        future
    }

    /// Switches the keyspace used for unqualified table names
    pub async fn set_keyspace(&self, keyspace: &str) -> Result<(), DriverError> {
        let statement = format!("USE {}", QueryBuilder::quote_identifier(keyspace));
        self.execute(statement).await.map(|_| ())
    }

    pub fn keyspace(&self) -> Option<String> {
        self.inner.keyspace.read().clone()
    }

    /// Reads `release_version` from `system.local`
    pub async fn health_check(&self) -> Result<String, DriverError> {
        let result = self
            .execute("SELECT release_version FROM system.local")
            .await?;
        let row = result.first().ok_or_else(|| {
            DriverError::UnavailableError("system.local returned no rows".to_string())
        })?;
        row.get_as::<String>("release_version")
    }

    /// Asynchronous submissions not yet completed
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn live_nodes(&self) -> usize {
        self.inner.pool.up_count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Cancels in-flight futures and closes every pool
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending: Vec<ResponseFuture> = self
            .inner
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let cancelled = pending.iter().filter(|f| f.cancel()).count();
        self.inner.pool.close().await;
        info!(
            "Session {} closed ({} in-flight requests cancelled)",
            self.inner.id, cancelled
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchType;
    use crate::database::memory::MemoryCluster;
    use crate::types::CqlValue;
    use std::sync::atomic::AtomicUsize;

    const NODES: [&str; 2] = ["10.0.0.1:9042", "10.0.0.2:9042"];

    fn fast_profile() -> ExecutionProfile {
        ExecutionProfile {
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy::constant(Duration::ZERO, 2),
            ..ExecutionProfile::default()
        }
    }

    fn builder(cluster: &MemoryCluster) -> ClusterBuilder {
        Cluster::builder()
            .contact_points(cluster.addresses())
            .default_profile(fast_profile())
            .transport(Arc::new(cluster.clone()))
    }

    async fn setup(cluster: &MemoryCluster) -> Session {
        let session = builder(cluster).build().unwrap().connect(None).await.unwrap();
        session
            .execute(
                "CREATE KEYSPACE elko WITH replication = \
                 {'class': 'SimpleStrategy', 'replication_factor': 1}",
            )
            .await
            .unwrap();
        session.set_keyspace("elko").await.unwrap();
        session
            .execute(
                r#"CREATE TABLE "Team_Members" (team_name text, member_name text, wins int,
                   PRIMARY KEY (team_name, member_name))"#,
            )
            .await
            .unwrap();
        for member in ["Bob", "Alice", "Carol"] {
            session
                .query(
                    r#"INSERT INTO "Team_Members" (team_name, member_name, wins) VALUES (?, ?, ?)"#,
                    vec![CqlValue::from("Bobs Team"), CqlValue::from(member), CqlValue::Int(1)],
                )
                .await
                .unwrap();
        }
        session
    }

    #[tokio::test]
    async fn test_execute_returns_ordered_rows() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;

        assert_eq!(session.keyspace().as_deref(), Some("elko"));
        let result = session
            .query(
                r#"SELECT member_name FROM "Team_Members" WHERE team_name = ?"#,
                vec![CqlValue::from("Bobs Team")],
            )
            .await
            .unwrap();
        let names: Vec<String> = result
            .iter()
            .map(|row| row.get_as::<String>("member_name").unwrap())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
    }

    #[tokio::test]
    async fn test_async_future_has_exactly_one_outcome() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;

        let future = session.execute_async(r#"SELECT * FROM "Team_Members""#);
        let outcome = future.wait().await;
        assert!(outcome.is_ok());
        assert!(future.is_done());
        assert!(!future.cancel());
        assert_eq!(future.try_result(), Some(outcome));
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_callback_after_completion_runs_once() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;

        let future = session.execute_async(r#"SELECT * FROM "Team_Members""#);
        future.wait().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        future.add_callback(move |rows| {
            assert_eq!(rows.len(), 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_returns_one_result() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;

        let mut batch = Batch::new(BatchType::Logged);
        for member in ["Dave", "Erin", "Frank"] {
            batch.add(
                Statement::new(
                    r#"INSERT INTO "Team_Members" (team_name, member_name) VALUES (?, ?)"#,
                )
                .bind(vec![CqlValue::from("Other Team"), CqlValue::from(member)]),
            );
        }

        let result = session.batch(&batch).await.unwrap();
        assert_eq!(result.kind(), &ResultKind::Void);

        let count = session
            .query(
                r#"SELECT COUNT(*) FROM "Team_Members" WHERE team_name = ?"#,
                vec![CqlValue::from("Other Team")],
            )
            .await
            .unwrap();
        assert_eq!(count.first().unwrap().get_as::<i64>("count").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_instead_of_hanging() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        cluster.set_latency(Duration::from_millis(300));

        let start = Instant::now();
        let err = session
            .execute(Statement::new("SELECT * FROM system.local").timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::TimeoutError(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_concurrent_async_reads_match_sync_read() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        let query = r#"SELECT * FROM "Team_Members" WHERE team_name = 'Bobs Team'"#;

        let expected = session.execute(query).await.unwrap();
        let futures: Vec<ResponseFuture> = (0..10).map(|_| session.execute_async(query)).collect();
        for future in futures {
            let result = future.await.unwrap();
            assert_eq!(result.first(), expected.first());
        }
    }

    #[tokio::test]
    async fn test_server_error_invokes_errback_only() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let future = session.execute_async("SELECT * FROM no_such_table");
        let (ok_tx, err_tx) = (tx.clone(), tx);
        future.add_callbacks(
            move |_| {
                let _ = ok_tx.send("callback");
            },
            move |err| {
                assert!(matches!(err, DriverError::ServerError { .. }));
                let _ = err_tx.send("errback");
            },
        );

        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(fired, Some("errback"));
        assert!(future.wait().await.is_err());
        // Both senders are gone once the callbacks are consumed
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_retries_bounded_for_idempotent_statements() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        for _ in 0..5 {
            cluster.inject_error(DriverError::TimeoutError(Duration::ZERO));
        }

        let before = cluster.total_requests();
        let outcome = session
            .execute(Statement::new("SELECT * FROM system.local").idempotent(true))
            .await;
        assert!(matches!(outcome, Err(DriverError::TimeoutError(_))));
        // One attempt plus two retries
        assert_eq!(cluster.total_requests() - before, 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_timeout_not_retried() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        cluster.inject_error(DriverError::TimeoutError(Duration::ZERO));

        let before = cluster.total_requests();
        assert!(session.execute("SELECT * FROM system.local").await.is_err());
        assert_eq!(cluster.total_requests() - before, 1);
        assert!(session.execute("SELECT * FROM system.local").await.is_ok());
    }

    #[tokio::test]
    async fn test_coordinator_timeout_reports_request_timeout() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        cluster.inject_error(DriverError::TimeoutError(Duration::ZERO));

        let err = session
            .execute("SELECT * FROM system.local")
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::TimeoutError(fast_profile().request_timeout));
    }

    #[tokio::test]
    async fn test_invalid_request_keeps_nodes_up() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        cluster.inject_error(DriverError::InvalidRequest(
            "value for wins is not an int".to_string(),
        ));

        let before = cluster.total_requests();
        let err = session
            .execute(Statement::new("SELECT * FROM system.local").idempotent(true))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidRequest(_)));
        assert_eq!(cluster.total_requests() - before, 1);
        assert_eq!(session.live_nodes(), NODES.len());
    }

    #[tokio::test]
    async fn test_unavailable_node_rerouted() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        cluster.set_node_down(NODES[0], true);

        for _ in 0..4 {
            let release = session.health_check().await.unwrap();
            assert_eq!(release, crate::database::memory::DEFAULT_RELEASE_VERSION);
        }
        assert_eq!(session.live_nodes(), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_white_list_profile_pins_host() {
        let cluster = MemoryCluster::new(NODES);
        let session = builder(&cluster)
            .execution_profile(
                "pinned",
                ExecutionProfile {
                    load_balancing: LoadBalancingPolicy::WhiteListRoundRobin {
                        hosts: vec![NODES[1].to_string()],
                    },
                    ..fast_profile()
                },
            )
            .build()
            .unwrap()
            .connect(None)
            .await
            .unwrap();

        let before = cluster.requests_served(NODES[0]);
        for _ in 0..6 {
            session
                .execute(Statement::new("SELECT * FROM system.local").profile("pinned"))
                .await
                .unwrap();
        }
        assert_eq!(cluster.requests_served(NODES[0]), before);

        let err = session
            .execute(Statement::new("SELECT * FROM system.local").profile("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_configured_white_list_matches_contact_points() {
        let cluster = MemoryCluster::new(NODES);
        let mut config = ClusterConfig {
            hosts: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            ..ClusterConfig::default()
        };
        config.profiles.insert(
            DEFAULT_PROFILE.to_string(),
            ExecutionProfileConfig {
                load_balancing: crate::config::LoadBalancingConfig::WhiteListRoundRobin {
                    hosts: vec!["10.0.0.2".to_string()],
                },
                ..ExecutionProfileConfig::default()
            },
        );
        config.validate().unwrap();

        let session = ClusterBuilder::from_config(&config)
            .transport(Arc::new(cluster.clone()))
            .build()
            .unwrap()
            .connect(None)
            .await
            .unwrap();

        for _ in 0..4 {
            session.health_check().await.unwrap();
        }
        assert_eq!(cluster.requests_served(NODES[0]), 0);
        assert_eq!(cluster.requests_served(NODES[1]), 4);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_submissions() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;
        cluster.set_latency(Duration::from_millis(300));

        let pending = session.execute_async("SELECT * FROM system.local");
        session.close().await;

        assert_eq!(pending.wait().await, Err(DriverError::Cancelled));
        assert_eq!(session.in_flight(), 0);
        assert_eq!(
            session.execute("SELECT * FROM system.local").await,
            Err(DriverError::SessionClosed)
        );
        assert_eq!(
            session.execute_async("SELECT * FROM system.local").result(),
            Err(DriverError::SessionClosed)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_result_from_plain_thread() {
        let cluster = MemoryCluster::new(NODES);
        let session = setup(&cluster).await;

        let future = session.execute_async(r#"SELECT * FROM "Team_Members""#);
        let outcome = tokio::task::spawn_blocking(move || future.result())
            .await
            .unwrap();
        assert_eq!(outcome.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_connect() {
        let cluster = MemoryCluster::new(NODES).with_credentials("elko", "elkoelko");
        let err = builder(&cluster)
            .credentials("elko", "nope")
            .build()
            .unwrap()
            .connect(None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::AuthenticationError(_)));

        let session = builder(&cluster)
            .credentials("elko", "elkoelko")
            .build()
            .unwrap()
            .connect(None)
            .await
            .unwrap();
        assert!(session.health_check().await.is_ok());
    }
}
