use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::config::Credentials;
use crate::errors::DriverError;
use crate::statement::Statement;
use crate::types::{Consistency, ResultSet};

use super::load_balancing::{LoadBalancingPolicy, PlanCursor};
use super::retry::ReconnectionPolicy;

#[derive(Debug, Clone)]
pub enum RequestBody {
    Query(Statement),
    Batch(Batch),
}

/// One unit sent over a connection
#[derive(Debug, Clone)]
pub struct Request {
    pub body: RequestBody,
    /// Session keyspace used to resolve unqualified table names
    pub keyspace: Option<String>,
    pub consistency: Consistency,
}

/// A single link to one node of the cluster
#[async_trait]
pub trait NodeConnection: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<ResultSet, DriverError>;

    async fn close(&self) {}

    fn address(&self) -> &str;
}

/// Opens connections to nodes; implemented by real and in-process clusters
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn NodeConnection>, DriverError>;

    fn driver_name(&self) -> &str;
}

/// Connection options shared by every node of a pool
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub pool_size: usize,
    pub connection_timeout: Duration,
    pub credentials: Option<Credentials>,
    pub reconnection: ReconnectionPolicy,
}

/// A known node and its connections
pub struct Node {
    address: String,
    connections: RwLock<Vec<Arc<dyn NodeConnection>>>,
    next: AtomicUsize,
    up: AtomicBool,
}

impl Node {
    fn new(address: String) -> Self {
        Self {
            address,
            connections: RwLock::new(Vec::new()),
            next: AtomicUsize::new(0),
            up: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Next connection of the node, round robin
    pub fn connection(&self) -> Option<Arc<dyn NodeConnection>> {
        let connections = self.connections.read();
        if connections.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % connections.len();
        Some(connections[i].clone())
    }
}

/// Pools of connections to every known node, shared by all statements of a session
pub struct ConnectionPool {
    nodes: Vec<Arc<Node>>,
    transport: Arc<dyn Transport>,
    options: PoolOptions,
    runtime: Handle,
    cursor: PlanCursor,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub async fn connect(
        transport: Arc<dyn Transport>,
        contact_points: &[String],
        options: PoolOptions,
        runtime: Handle,
    ) -> Result<Arc<Self>, DriverError> {
        info!(
            "Connecting to cluster via {} driver: {:?}",
            transport.driver_name(),
            contact_points
        );

        let pool = Arc::new(Self {
            nodes: contact_points
                .iter()
                .map(|addr| Arc::new(Node::new(addr.clone())))
                .collect(),
            transport,
            options,
            runtime,
            cursor: PlanCursor::new(),
            closed: AtomicBool::new(false),
        });

        let mut failures = Vec::new();
        for node in &pool.nodes {
            match pool.open_connections(node.address()).await {
                Ok(connections) => {
                    *node.connections.write() = connections;
                    node.up.store(true, Ordering::Release);
                    debug!("Node {} is up", node.address());
                }
                Err(err @ DriverError::AuthenticationError(_)) => return Err(err),
                Err(err) => {
                    warn!("Failed to connect to {}: {}", node.address(), err);
                    failures.push(format!("{}: {}", node.address(), err));
                }
            }
        }

        if pool.up_count() == 0 {
            return Err(DriverError::UnavailableError(format!(
                "Unable to connect to any contact point ({})",
                failures.join("; ")
            )));
        }

        for node in &pool.nodes {
            if !node.is_up() {
                pool.spawn_reconnection(node.clone());
            }
        }

        info!(
            "Connected to {}/{} nodes",
            pool.up_count(),
            pool.nodes.len()
        );
        Ok(pool)
    }

    async fn open_connections(
        &self,
        address: &str,
    ) -> Result<Vec<Arc<dyn NodeConnection>>, DriverError> {
        let mut connections = Vec::with_capacity(self.options.pool_size);
        for _ in 0..self.options.pool_size {
            let connect = self
                .transport
                .connect(address, self.options.credentials.as_ref());
            let connection = tokio::time::timeout(self.options.connection_timeout, connect)
                .await
                .map_err(|_| {
                    DriverError::UnavailableError(format!(
                        "Connection to {} timed out after {:?}",
                        address, self.options.connection_timeout
                    ))
                })??;
            connections.push(connection);
        }
        Ok(connections)
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn up_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_up()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live nodes the policy allows, in the order this request should try them
    pub fn query_plan(&self, policy: &LoadBalancingPolicy) -> Vec<Arc<Node>> {
        let states = self
            .nodes
            .iter()
            .map(|n| (n.address().to_string(), n.is_up()))
            .collect::<Vec<_>>();
        self.cursor
            .plan(policy, &states)
            .into_iter()
            .map(|i| self.nodes[i].clone())
            .collect()
    }

    /// Takes a node out of query plans and starts bringing it back
    pub fn mark_down(self: &Arc<Self>, node: &Arc<Node>, reason: &DriverError) {
        if self.is_closed() {
            return;
        }
        if node.up.swap(false, Ordering::AcqRel) {
            warn!("Marking node {} down: {}", node.address(), reason);
            self.spawn_reconnection(node.clone());
        }
    }

    /// The task only holds the pool weakly and ends once the pool is
    /// closed or dropped
    fn spawn_reconnection(self: &Arc<Self>, node: Arc<Node>) {
        let weak = Arc::downgrade(self);
        let reconnection = self.options.reconnection;
        self.runtime.spawn(async move {
            let mut attempt = 0u32;
            loop {
                tokio::time::sleep(reconnection.delay_for(attempt)).await;
                let Some(pool) = weak.upgrade() else {
                    debug!("Pool dropped, abandoning reconnection to {}", node.address());
                    return;
                };
                if pool.is_closed() {
                    return;
                }
                match pool.open_connections(node.address()).await {
                    Ok(connections) => {
                        let stale = std::mem::replace(&mut *node.connections.write(), connections);
                        node.up.store(true, Ordering::Release);
                        info!("Node {} is back up after {} attempts", node.address(), attempt + 1);
                        for connection in stale {
                            connection.close().await;
                        }
                        return;
                    }
                    Err(err) => {
                        debug!("Reconnection to {} failed: {}", node.address(), err);
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        });
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for node in &self.nodes {
            node.up.store(false, Ordering::Release);
            let connections = std::mem::take(&mut *node.connections.write());
            for connection in connections {
                connection.close().await;
            }
        }
        info!("Connection pool closed");
    }
}
