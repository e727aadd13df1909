// cqlkit/src/database/memory/mod.rs
//
// In-process cluster - every node serves the same replicated store
// Nodes can be taken down, slowed down or told to fail requests
//

pub mod cql;
mod store;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Credentials;
use crate::errors::DriverError;
use crate::types::ResultSet;

use super::connection::{NodeConnection, Request, RequestBody, Transport};
use cql::{parse_with_markers, Command};
use store::{check_arity, Store};

pub const DEFAULT_RELEASE_VERSION: &str = "4.0.11";
pub const DEFAULT_CLUSTER_NAME: &str = "Test Cluster";

#[derive(Default)]
struct NodeState {
    down: AtomicBool,
    served: AtomicU64,
}

struct ClusterInner {
    store: RwLock<Store>,
    nodes: DashMap<String, NodeState>,
    credentials: Mutex<Option<Credentials>>,
    latency: Mutex<Duration>,
    injected: Mutex<VecDeque<DriverError>>,
}

/// Cluster whose nodes live in this process and share one store
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl std::fmt::Debug for MemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCluster")
            .field("nodes", &self.addresses())
            .finish()
    }
}

impl MemoryCluster {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes = DashMap::new();
        for address in addresses {
            nodes.insert(address.into(), NodeState::default());
        }
        Self {
            inner: Arc::new(ClusterInner {
                store: RwLock::new(Store::new(DEFAULT_CLUSTER_NAME, DEFAULT_RELEASE_VERSION)),
                nodes,
                credentials: Mutex::new(None),
                latency: Mutex::new(Duration::ZERO),
                injected: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Requires every connection to authenticate with these credentials
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        *self.inner.credentials.lock() = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.inner.nodes.iter().map(|n| n.key().clone()).collect();
        addresses.sort();
        addresses
    }

    pub fn set_node_down(&self, address: &str, down: bool) {
        if let Some(node) = self.inner.nodes.get(address) {
            node.down.store(down, Ordering::Release);
            debug!("Memory node {} {}", address, if down { "down" } else { "up" });
        }
    }

    /// Delay applied to every request before it is served
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// The next request served by any node fails with `error`
    pub fn inject_error(&self, error: DriverError) {
        self.inner.injected.lock().push_back(error);
    }

    /// Requests served by one node, failed ones included
    pub fn requests_served(&self, address: &str) -> u64 {
        self.inner
            .nodes
            .get(address)
            .map(|n| n.served.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.inner
            .nodes
            .iter()
            .map(|n| n.served.load(Ordering::Acquire))
            .sum()
    }

    fn is_down(&self, address: &str) -> Result<bool, DriverError> {
        self.inner
            .nodes
            .get(address)
            .map(|n| n.down.load(Ordering::Acquire))
            .ok_or_else(|| {
                DriverError::UnavailableError(format!("Connection refused by {}", address))
            })
    }

    fn serve(&self, request: &Request) -> Result<ResultSet, DriverError> {
        let keyspace = request.keyspace.as_deref();
        match &request.body {
            RequestBody::Query(statement) => {
                let (command, markers) = parse_with_markers(statement.text())?;
                check_arity(markers, statement.values())?;
                match command {
                    Command::Select { .. } | Command::Use(_) => {
                        self.inner
                            .store
                            .read()
                            .query(&command, statement.values(), keyspace)
                    }
                    _ => self
                        .inner
                        .store
                        .write()
                        .apply(&command, statement.values(), keyspace),
                }
            }
            RequestBody::Batch(batch) => {
                let mut commands = Vec::with_capacity(batch.len());
                for statement in batch.statements() {
                    let (command, markers) = parse_with_markers(statement.text())?;
                    check_arity(markers, statement.values())?;
                    commands.push((command, statement.values()));
                }
                self.inner.store.write().apply_batch(&commands, keyspace)
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryCluster {
    async fn connect(
        &self,
        address: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn NodeConnection>, DriverError> {
        if self.is_down(address)? {
            return Err(DriverError::UnavailableError(format!(
                "Node {} is not reachable",
                address
            )));
        }

        let required = self.inner.credentials.lock().clone();
        if let Some(required) = required {
            match credentials {
                Some(given)
                    if given.username == required.username
                        && given.password == required.password => {}
                Some(given) => {
                    return Err(DriverError::AuthenticationError(format!(
                        "Provided username {} and/or password are incorrect",
                        given.username
                    )))
                }
                None => {
                    return Err(DriverError::AuthenticationError(
                        "Node requires authentication but no credentials were provided"
                            .to_string(),
                    ))
                }
            }
        }

        Ok(Arc::new(MemoryConnection {
            cluster: self.clone(),
            address: address.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    fn driver_name(&self) -> &str {
        "memory"
    }
}

/// Connection to one in-process node
pub struct MemoryConnection {
    cluster: MemoryCluster,
    address: String,
    closed: AtomicBool,
}

#[async_trait]
impl NodeConnection for MemoryConnection {
    async fn execute(&self, request: &Request) -> Result<ResultSet, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::UnavailableError(format!(
                "Connection to {} is closed",
                self.address
            )));
        }
        if self.cluster.is_down(&self.address)? {
            return Err(DriverError::UnavailableError(format!(
                "Node {} is not reachable",
                self.address
            )));
        }
        if let Some(node) = self.cluster.inner.nodes.get(&self.address) {
            node.served.fetch_add(1, Ordering::AcqRel);
        }

        let latency = *self.cluster.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let injected = self.cluster.inner.injected.lock().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }

        self.cluster.serve(request)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn address(&self) -> &str {
        &self.address
    }
}
