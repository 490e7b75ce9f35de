/// Health-aware round-robin pool of read replicas
///
/// The host list is an immutable snapshot that `replace` swaps wholesale, so
/// a concurrent `select` observes either the old or the new pool, never a mix.
use crate::core::Replica;
use crate::metrics::{MetricsSink, NoopMetrics, HOST_COUNT_GAUGE};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;

struct Snapshot {
    hosts: Vec<Arc<Replica>>,
    pools: HashSet<String>,
}

impl Snapshot {
    fn new(hosts: Vec<Arc<Replica>>) -> Self {
        let pools = hosts.iter().map(|host| host.pool.clone()).collect();
        Self { hosts, pools }
    }
}

struct PoolState {
    snapshot: Arc<Snapshot>,
    /// Always within `[0, hosts.len())` when the pool is non-empty
    index: usize,
}

pub struct HostPool {
    state: Mutex<PoolState>,
    metrics: Arc<dyn MetricsSink>,
}

impl HostPool {
    /// Create a pool over `hosts`, shuffled so that every process does not
    /// start its rotation on the same replica.
    pub fn new(hosts: Vec<Arc<Replica>>, metrics: Arc<dyn MetricsSink>) -> Self {
        let mut hosts = hosts;
        hosts.shuffle(&mut rand::thread_rng());
        Self::from_ordered(hosts, metrics)
    }

    /// Create a pool that rotates through `hosts` in the given order
    pub fn from_ordered(hosts: Vec<Arc<Replica>>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                snapshot: Arc::new(Snapshot::new(hosts)),
                index: 0,
            }),
            metrics,
        }
    }

    pub fn without_metrics(hosts: Vec<Arc<Replica>>) -> Self {
        Self::new(hosts, Arc::new(NoopMetrics))
    }

    /// Pick the next online replica in rotation.
    ///
    /// Returns `None` when the pool is empty or every host is offline; the
    /// caller routes to the primary instead. At most one full cycle is scanned.
    pub fn select(&self) -> Option<Arc<Replica>> {
        let (selected, host_count) = {
            let mut state = self.state.lock();
            let snapshot = Arc::clone(&state.snapshot);
            let len = snapshot.hosts.len();
            let mut selected = None;

            for _ in 0..len {
                let host = &snapshot.hosts[state.index];
                state.index = (state.index + 1) % len;

                if host.is_online() {
                    selected = Some(Arc::clone(host));
                    break;
                }
            }

            (selected, len)
        };

        self.metrics.gauge(HOST_COUNT_GAUGE, host_count as f64);

        match &selected {
            Some(host) => tracing::trace!("Selected replica {} ({})", host.id, host.addr),
            None => tracing::debug!("No online replica among {} hosts", host_count),
        }

        selected
    }

    /// Online hosts in rotation order, starting at the cursor.
    ///
    /// Takes the lock once and leaves the cursor where it is, so scanning for
    /// a suitable host does not disturb the rotation of request reads.
    pub fn online_from_cursor(&self) -> Vec<Arc<Replica>> {
        let (snapshot, start) = {
            let state = self.state.lock();
            (Arc::clone(&state.snapshot), state.index)
        };

        snapshot
            .hosts
            .iter()
            .cycle()
            .skip(start)
            .take(snapshot.hosts.len())
            .filter(|host| host.is_online())
            .cloned()
            .collect()
    }

    /// Swap in a new host list (e.g. after service discovery refreshed it)
    pub fn replace(&self, hosts: Vec<Arc<Replica>>) {
        let mut hosts = hosts;
        hosts.shuffle(&mut rand::thread_rng());
        let snapshot = Arc::new(Snapshot::new(hosts));
        let host_count = snapshot.hosts.len();

        {
            let mut state = self.state.lock();
            state.snapshot = snapshot;
            state.index = 0;
        }

        tracing::info!("Replaced load balancing hosts, now managing {}", host_count);
        self.metrics.gauge(HOST_COUNT_GAUGE, host_count as f64);
    }

    /// Whether any managed host belongs to connection pool `pool`
    pub fn manages_pool(&self, pool: &str) -> bool {
        self.state.lock().snapshot.pools.contains(pool)
    }

    pub fn host_count(&self) -> usize {
        self.state.lock().snapshot.hosts.len()
    }

    /// The current host list, in rotation order
    pub fn hosts(&self) -> Vec<Arc<Replica>> {
        self.state.lock().snapshot.hosts.clone()
    }
}
