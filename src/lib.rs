//! Balanza - replica-aware load balancing and read/write consistency routing
//!
//! Sits between query code and a primary database with a pool of read
//! replicas:
//! 1. Request path: reads rotate across healthy replicas, and once a unit of
//!    work writes it keeps reading from the primary
//! 2. Job path: jobs carry the position their enqueuer observed, and workers
//!    only run them on a replica that has caught up to it

pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::core::{
    CachedPositions, HostPool, Position, Primary, PrimaryPositionReader, Replica,
    ReplicaPositionReader, Route, Session, StatementKind,
};
use crate::error::BalanzaResult;
use crate::jobs::{
    BackoffPolicy, ConsistencyResolver, ConsistencyStamper, DelayedRetryQueue, JobRegistry,
};
use crate::metrics::MetricsSink;

/// Where a statement was routed
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    Primary,
    Replica(Arc<Replica>),
}

impl RoutingDecision {
    pub fn is_primary(&self) -> bool {
        matches!(self, RoutingDecision::Primary)
    }
}

/// Entry point wiring the host pool, the primary and the position readers
pub struct LoadBalancer {
    primary: Arc<Primary>,
    primary_positions: Arc<dyn PrimaryPositionReader>,
    pool: Arc<HostPool>,
    replicas: Arc<dyn ReplicaPositionReader>,
    pool_name: String,
}

impl LoadBalancer {
    pub fn new(
        primary: Arc<Primary>,
        primary_positions: Arc<dyn PrimaryPositionReader>,
        pool: Arc<HostPool>,
        replicas: Arc<dyn ReplicaPositionReader>,
        pool_name: String,
    ) -> Self {
        Self {
            primary,
            primary_positions,
            pool,
            replicas,
            pool_name,
        }
    }

    /// Read the primary's write position from `reader` (typically a live
    /// driver query) instead of the position cached by health checks
    pub fn with_primary_positions(mut self, reader: Arc<dyn PrimaryPositionReader>) -> Self {
        self.primary_positions = reader;
        self
    }

    /// Build a balancer over the configured primary and replicas, using the
    /// positions cached by health checks
    pub fn from_config(config: &Config, metrics: Arc<dyn MetricsSink>) -> BalanzaResult<Self> {
        let primary = Arc::new(Primary::new(config.primary.address.parse()?));
        let pool_name = config.load_balancing.pool.clone();
        let hosts = build_replicas(&config.load_balancing.hosts, &pool_name)?;

        tracing::info!(
            "Load balancing {} replicas in pool {}",
            hosts.len(),
            pool_name
        );

        Ok(Self::new(
            primary.clone(),
            primary,
            Arc::new(HostPool::new(hosts, metrics)),
            Arc::new(CachedPositions),
            pool_name,
        ))
    }

    /// Route one statement for the unit of work owning `session`.
    ///
    /// Falls back to the primary when the session requires it or no replica
    /// is online.
    pub fn route(&self, session: &mut Session, kind: StatementKind) -> RoutingDecision {
        match session.route(kind) {
            Route::Primary => RoutingDecision::Primary,
            Route::Replica => match session.replica_host(&self.pool) {
                Some(replica) => RoutingDecision::Replica(replica),
                None => RoutingDecision::Primary,
            },
        }
    }

    /// Record that a write routed for `session` committed at `position`.
    ///
    /// Jobs the session enqueues afterwards wait for a replica that has
    /// applied this write, even before the next health check refreshes the
    /// primary's position.
    pub fn record_write_position(&self, session: &mut Session, position: Position) {
        session.record_write_at(position);
        self.primary.record_write_position(position);
    }

    /// Replace the replica set, e.g. after service discovery found new hosts
    pub fn replace_hosts(&self, addresses: &[String]) -> BalanzaResult<()> {
        let hosts = build_replicas(addresses, &self.pool_name)?;
        self.pool.replace(hosts);
        Ok(())
    }

    /// Whether this balancer serves connection pool `pool`
    pub fn manages_pool(&self, pool: &str) -> bool {
        self.pool.manages_pool(pool)
    }

    pub fn primary(&self) -> &Arc<Primary> {
        &self.primary
    }

    pub fn pool(&self) -> &Arc<HostPool> {
        &self.pool
    }

    pub fn stamper(&self, registry: Arc<dyn JobRegistry>) -> ConsistencyStamper {
        ConsistencyStamper::new(
            registry,
            self.primary_positions.clone(),
            self.replicas.clone(),
            self.pool.clone(),
        )
    }

    pub fn resolver(
        &self,
        registry: Arc<dyn JobRegistry>,
        backoff: BackoffPolicy,
        retry_queue: Arc<dyn DelayedRetryQueue>,
    ) -> ConsistencyResolver {
        ConsistencyResolver::new(
            registry,
            self.replicas.clone(),
            self.pool.clone(),
            backoff,
            retry_queue,
        )
    }
}

fn build_replicas(addresses: &[String], pool: &str) -> BalanzaResult<Vec<Arc<Replica>>> {
    addresses
        .iter()
        .enumerate()
        .map(|(index, address)| {
            let addr: SocketAddr = address.parse()?;
            Ok(Arc::new(Replica::new(
                format!("replica-{}", index),
                addr,
                pool.to_string(),
            )))
        })
        .collect()
}
