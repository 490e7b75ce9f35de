/// Replica health and replication lag checking
///
/// Probes run in the background and cache their verdict on each `Replica`,
/// so host selection only ever reads an atomic flag.
use crate::config::{HealthConfig, LoadBalancingConfig};
use crate::core::{HostPool, Position, Primary, Replica};
use crate::error::BalanzaResult;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Health status of a replica
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
            HealthStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a usable replica
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// What a probe learned about one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaObservation {
    pub position: Position,
    pub replication_lag: Duration,
}

/// Database driver hooks used to observe replication state
#[async_trait]
pub trait ReplicaProbe: Send + Sync {
    /// Query a replica for its applied position and replication lag
    async fn probe_replica(&self, replica: &Replica) -> BalanzaResult<ReplicaObservation>;

    /// Query the primary for its current write position
    async fn primary_write_position(&self) -> BalanzaResult<Position>;
}

/// Lag limits a replica must stay within to receive reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagThresholds {
    pub max_replication_lag: Duration,
    pub max_replication_difference: u64,
}

impl LagThresholds {
    pub fn from_config(config: &LoadBalancingConfig) -> Self {
        Self {
            max_replication_lag: Duration::from_secs(config.max_replication_lag_sec),
            max_replication_difference: config.max_replication_difference,
        }
    }

    /// A replica is usable when either its lag or its distance to the
    /// primary is within bounds. An idle primary makes lag grow without the
    /// replica falling behind, which the position check compensates for.
    fn evaluate(&self, observation: &ReplicaObservation, primary: Option<Position>) -> HealthStatus {
        if observation.replication_lag <= self.max_replication_lag {
            return HealthStatus::Healthy;
        }

        match primary {
            Some(primary) => {
                let difference = observation.position.lag_behind(primary);
                if difference <= self.max_replication_difference {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy {
                        reason: format!(
                            "replication lag {:?} and {} behind primary",
                            observation.replication_lag, difference
                        ),
                    }
                }
            }
            None => HealthStatus::Unhealthy {
                reason: format!("replication lag {:?}", observation.replication_lag),
            },
        }
    }
}

pub struct HealthCheckManager {
    probe: Arc<dyn ReplicaProbe>,
    primary: Arc<Primary>,
    thresholds: LagThresholds,
    check_interval: Duration,
    check_timeout: Duration,
}

impl HealthCheckManager {
    pub fn new(
        probe: Arc<dyn ReplicaProbe>,
        primary: Arc<Primary>,
        thresholds: LagThresholds,
        config: &HealthConfig,
    ) -> Self {
        Self {
            probe,
            primary,
            thresholds,
            check_interval: Duration::from_secs(config.interval_sec),
            check_timeout: Duration::from_secs(config.timeout_sec),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    /// Refresh the primary's cached write position
    pub async fn refresh_primary(&self) -> Option<Position> {
        match timeout(self.check_timeout, self.probe.primary_write_position()).await {
            Ok(Ok(position)) => {
                self.primary.record_write_position(position);
            }
            Ok(Err(e)) => tracing::warn!("Could not read primary write position: {}", e),
            Err(_) => tracing::warn!("Timed out reading primary write position"),
        }
        self.primary.write_position()
    }

    /// Probe one replica and update its cached liveness and position
    pub async fn check_replica(&self, replica: &Replica) -> HealthStatus {
        let primary = self.primary.write_position();

        let status = match timeout(self.check_timeout, self.probe.probe_replica(replica)).await {
            Ok(Ok(observation)) => {
                replica.record_position(observation.position);
                replica.record_health_check(Some(observation.replication_lag));
                self.thresholds.evaluate(&observation, primary)
            }
            Ok(Err(e)) => {
                replica.record_health_check(None);
                HealthStatus::Unhealthy {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                replica.record_health_check(None);
                HealthStatus::Timeout
            }
        };

        let was_online = replica.is_online();
        replica.set_online(status.is_healthy());

        match &status {
            HealthStatus::Healthy if !was_online => {
                tracing::info!("Replica {} is back online", replica.id);
            }
            HealthStatus::Healthy => tracing::debug!("Replica {} is healthy", replica.id),
            HealthStatus::Unhealthy { reason } => {
                tracing::warn!("Replica {} is unhealthy: {}", replica.id, reason);
            }
            HealthStatus::Timeout => tracing::warn!("Health check timeout for replica {}", replica.id),
            HealthStatus::Unknown => tracing::warn!("Unknown health status for replica {}", replica.id),
        }

        status
    }

    /// Refresh the primary, then probe every host in the pool concurrently
    pub async fn refresh_pool(&self, pool: &HostPool) -> Vec<(String, HealthStatus)> {
        self.refresh_primary().await;

        let hosts = pool.hosts();
        let statuses = join_all(hosts.iter().map(|replica| self.check_replica(replica))).await;

        hosts
            .iter()
            .map(|replica| replica.id.clone())
            .zip(statuses)
            .collect()
    }

    /// Run continuous health checking for a pool
    pub async fn run_health_checks(self: Arc<Self>, pool: Arc<HostPool>) {
        let mut interval = tokio::time::interval(self.check_interval);

        loop {
            interval.tick().await;
            let statuses = self.refresh_pool(&pool).await;
            let online = statuses.iter().filter(|(_, status)| status.is_healthy()).count();
            tracing::debug!("Health check cycle: {}/{} replicas online", online, statuses.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::BalanzaError;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Probe returning scripted observations per replica id
    #[derive(Default)]
    struct MockProbe {
        replicas: Mutex<HashMap<String, Option<ReplicaObservation>>>,
        primary: Mutex<Option<Position>>,
        hang: bool,
    }

    impl MockProbe {
        fn observe(&self, id: &str, position: u64, lag_sec: u64) {
            self.replicas.lock().insert(
                id.to_string(),
                Some(ReplicaObservation {
                    position: Position::new(position),
                    replication_lag: Duration::from_secs(lag_sec),
                }),
            );
        }

        fn fail(&self, id: &str) {
            self.replicas.lock().insert(id.to_string(), None);
        }
    }

    #[async_trait]
    impl ReplicaProbe for MockProbe {
        async fn probe_replica(&self, replica: &Replica) -> BalanzaResult<ReplicaObservation> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let observation = self.replicas.lock().get(&replica.id).cloned().flatten();
            observation.ok_or_else(|| BalanzaError::health("connection refused"))
        }

        async fn primary_write_position(&self) -> BalanzaResult<Position> {
            let position = *self.primary.lock();
            position.ok_or_else(|| BalanzaError::health("primary unreachable"))
        }
    }

    fn create_test_replica(id: &str) -> Arc<Replica> {
        Arc::new(Replica::new(
            id.to_string(),
            "127.0.0.1:5432".parse().unwrap(),
            "main".to_string(),
        ))
    }

    fn manager(probe: Arc<MockProbe>) -> (HealthCheckManager, Arc<Primary>) {
        let config = Config::default();
        let primary = Arc::new(Primary::new("127.0.0.1:5433".parse().unwrap()));
        let thresholds = LagThresholds {
            max_replication_lag: Duration::from_secs(60),
            max_replication_difference: 100,
        };
        let manager = HealthCheckManager::new(probe, primary.clone(), thresholds, &config.health);
        (manager, primary)
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "Healthy");
        assert_eq!(
            HealthStatus::Unhealthy { reason: "test".to_string() }.to_string(),
            "Unhealthy: test"
        );
        assert_eq!(HealthStatus::Timeout.to_string(), "Timeout");
        assert_eq!(HealthStatus::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_health_status_is_healthy() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Unhealthy { reason: "test".to_string() }.is_healthy());
        assert!(!HealthStatus::Timeout.is_healthy());
        assert!(!HealthStatus::Unknown.is_healthy());
    }

    #[test]
    fn test_thresholds_from_config() {
        let config = Config::default();
        let thresholds = LagThresholds::from_config(&config.load_balancing);
        assert_eq!(thresholds.max_replication_lag, Duration::from_secs(60));
        assert_eq!(thresholds.max_replication_difference, 8 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_healthy_replica_caches_position() {
        let probe = Arc::new(MockProbe::default());
        probe.observe("replica-0", 500, 1);
        let (manager, _) = manager(probe);
        let replica = create_test_replica("replica-0");

        let status = manager.check_replica(&replica).await;
        assert!(status.is_healthy());
        assert!(replica.is_online());
        assert_eq!(replica.position(), Some(Position::new(500)));
        assert_eq!(replica.status().replication_lag, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_lagging_replica_goes_offline() {
        let probe = Arc::new(MockProbe::default());
        *probe.primary.lock() = Some(Position::new(1_000));
        probe.observe("replica-0", 500, 120);
        let (manager, primary) = manager(probe.clone());
        let replica = create_test_replica("replica-0");

        assert_eq!(manager.refresh_primary().await, Some(Position::new(1_000)));
        assert_eq!(primary.write_position(), Some(Position::new(1_000)));

        let status = manager.check_replica(&replica).await;
        assert!(matches!(status, HealthStatus::Unhealthy { .. }));
        assert!(!replica.is_online());

        // Lag is high but the primary has been idle: close enough in position
        probe.observe("replica-0", 950, 120);
        assert!(manager.check_replica(&replica).await.is_healthy());
        assert!(replica.is_online());
    }

    #[tokio::test]
    async fn test_probe_failure_marks_offline() {
        let probe = Arc::new(MockProbe::default());
        probe.fail("replica-0");
        let (manager, _) = manager(probe);
        let replica = create_test_replica("replica-0");

        let status = manager.check_replica(&replica).await;
        assert_eq!(
            status,
            HealthStatus::Unhealthy {
                reason: "Health check failed: connection refused".to_string()
            }
        );
        assert!(!replica.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout() {
        let probe = Arc::new(MockProbe {
            hang: true,
            ..Default::default()
        });
        let (manager, _) = manager(probe);
        let replica = create_test_replica("replica-0");

        assert_eq!(manager.check_replica(&replica).await, HealthStatus::Timeout);
        assert!(!replica.is_online());
    }

    #[tokio::test]
    async fn test_refresh_pool_updates_selection() {
        let probe = Arc::new(MockProbe::default());
        *probe.primary.lock() = Some(Position::new(100));
        probe.observe("replica-0", 100, 0);
        probe.fail("replica-1");
        let (manager, _) = manager(probe);

        let pool = HostPool::without_metrics(vec![
            create_test_replica("replica-0"),
            create_test_replica("replica-1"),
        ]);
        let mut statuses = manager.refresh_pool(&pool).await;
        statuses.sort_by(|a, b| a.0.cmp(&b.0));

        assert!(statuses[0].1.is_healthy());
        assert!(!statuses[1].1.is_healthy());
        for _ in 0..4 {
            assert_eq!(pool.select().unwrap().id, "replica-0");
        }
    }
}
