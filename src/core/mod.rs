/// Core routing model shared by request and job handling
pub mod host_pool;
pub mod position;
pub mod session;

pub use host_pool::HostPool;
pub use position::{CachedPositions, Position, PrimaryPositionReader, ReplicaPositionReader};
pub use session::{Route, Session, StatementKind};

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

/// A read replica the balancer may route to.
///
/// Liveness and replicated position are cached here by the health checker so
/// routing never performs I/O.
#[derive(Debug)]
pub struct Replica {
    pub id: String,
    pub addr: SocketAddr,
    /// Identity of the connection pool that owns this host
    pub pool: String,
    online: AtomicBool,
    status: RwLock<ReplicaStatus>,
}

/// Last observed replication state of a replica
#[derive(Debug, Clone, Default)]
pub struct ReplicaStatus {
    pub position: Option<Position>,
    pub replication_lag: Option<Duration>,
    pub last_health_check: Option<SystemTime>,
}

impl Replica {
    /// New replicas are treated as online until the first probe says otherwise.
    pub fn new(id: String, addr: SocketAddr, pool: String) -> Self {
        Self {
            id,
            addr,
            pool,
            online: AtomicBool::new(true),
            status: RwLock::new(ReplicaStatus::default()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn position(&self) -> Option<Position> {
        self.status.read().position
    }

    /// Record a newly observed position. Positions never move backwards.
    pub fn record_position(&self, position: Position) {
        let mut status = self.status.write();
        status.position = Some(status.position.map_or(position, |p| p.max(position)));
    }

    pub fn status(&self) -> ReplicaStatus {
        self.status.read().clone()
    }

    pub(crate) fn record_health_check(&self, lag: Option<Duration>) {
        let mut status = self.status.write();
        status.replication_lag = lag;
        status.last_health_check = Some(SystemTime::now());
    }
}

/// The writable primary, with its last observed write position
#[derive(Debug)]
pub struct Primary {
    pub addr: SocketAddr,
    write_position: RwLock<Option<Position>>,
}

impl Primary {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            write_position: RwLock::new(None),
        }
    }

    pub fn write_position(&self) -> Option<Position> {
        *self.write_position.read()
    }

    pub fn record_write_position(&self, position: Position) {
        let mut current = self.write_position.write();
        *current = Some(current.map_or(position, |p| p.max(position)));
    }
}
