/// Enqueue-side consistency stamping
use crate::core::{HostPool, Position, PrimaryPositionReader, ReplicaPositionReader, Session};
use crate::error::BalanzaResult;
use crate::jobs::{ConsistencyLevel, ConsistencyStamp, JobEnvelope, JobRegistry, StampedPosition};
use std::sync::Arc;

pub struct ConsistencyStamper {
    registry: Arc<dyn JobRegistry>,
    primary: Arc<dyn PrimaryPositionReader>,
    replicas: Arc<dyn ReplicaPositionReader>,
    pool: Arc<HostPool>,
}

impl ConsistencyStamper {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        primary: Arc<dyn PrimaryPositionReader>,
        replicas: Arc<dyn ReplicaPositionReader>,
        pool: Arc<HostPool>,
    ) -> Self {
        Self {
            registry,
            primary,
            replicas,
            pool,
        }
    }

    /// Attach the position `job` must observe when it runs.
    ///
    /// Jobs of unknown kinds, strict kinds, kinds without a declared
    /// consistency or with propagation disabled are returned unchanged. Any
    /// lookup failure also leaves the job unstamped, which the resolver never
    /// treats as permission to read from a replica.
    pub fn stamp_for_enqueue(&self, job: JobEnvelope, session: &mut Session) -> JobEnvelope {
        let info = match self.registry.lookup(&job.kind) {
            Ok(Some(info)) => info,
            Ok(None) => {
                tracing::debug!("Not stamping {}: unknown job kind {}", job.id, job.kind);
                return job;
            }
            Err(e) => {
                tracing::debug!("Not stamping {}: {}", job.id, e);
                return job;
            }
        };

        let declared = match info.consistency {
            Some(ConsistencyLevel::Strict) | None => return job,
            Some(level) => level,
        };

        if !info.propagation_enabled {
            return job;
        }

        let position = if session.was_write_performed() {
            self.write_position(session).map(StampedPosition::Write)
        } else {
            self.replica_position(session).map(StampedPosition::Read)
        };

        match position {
            Ok(position) => {
                tracing::debug!(
                    "Stamped {} ({}) with {:?} consistency at {:?}",
                    job.id,
                    job.kind,
                    declared,
                    position
                );
                job.with_consistency(ConsistencyStamp { declared, position })
            }
            Err(e) => {
                tracing::debug!("Not stamping {}: {}", job.id, e);
                job
            }
        }
    }

    /// Primary position covering the session's writes: the later of what the
    /// primary reports now and what the session's own writes committed at.
    fn write_position(&self, session: &Session) -> BalanzaResult<Position> {
        match (self.primary.current_write_position(), session.last_write_position()) {
            (Ok(current), Some(own)) => Ok(current.max(own)),
            (Ok(current), None) => Ok(current),
            (Err(e), Some(own)) => {
                tracing::debug!("Using session write position {}: {}", own, e);
                Ok(own)
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Position of the replica this session reads from. With no replica
    /// available the session reads from the primary, so its write position
    /// is the (conservative) position observed.
    fn replica_position(&self, session: &mut Session) -> BalanzaResult<Position> {
        match session.replica_host(&self.pool) {
            Some(host) => self.replicas.current_position(&host),
            None => self.primary.current_write_position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CachedPositions;
    use crate::jobs::test_support::*;
    use crate::jobs::JobKindInfo;
    use serde_json::json;

    fn stamper(
        registry: Arc<dyn JobRegistry>,
        primary_position: Option<u64>,
        replica_position: Option<u64>,
    ) -> ConsistencyStamper {
        let pool = HostPool::without_metrics(vec![replica("replica-0", replica_position)]);
        ConsistencyStamper::new(
            registry,
            primary(primary_position),
            Arc::new(CachedPositions),
            Arc::new(pool),
        )
    }

    fn kinds() -> Arc<dyn JobRegistry> {
        registry(vec![
            job_kind("StrictWorker", Some(ConsistencyLevel::Strict), 3),
            job_kind("DelayedWorker", Some(ConsistencyLevel::Delayed), 3),
            job_kind("StickyWorker", Some(ConsistencyLevel::Sticky), 3),
            job_kind("UndeclaredWorker", None, 3),
        ])
    }

    #[test]
    fn test_write_session_stamps_primary_position() {
        let stamper = stamper(kinds(), Some(100), Some(80));
        let mut session = Session::new();
        session.record_write();

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("DelayedWorker", json!([])), &mut session);
        let stamp = job.consistency().unwrap();
        assert_eq!(stamp.declared, ConsistencyLevel::Delayed);
        assert_eq!(stamp.position, StampedPosition::Write(Position::new(100)));
    }

    #[test]
    fn test_write_stamp_covers_the_session_write() {
        // Primary last observed at 100; the session's write committed at 150
        let stamper = stamper(kinds(), Some(100), Some(100));
        let mut session = Session::new();
        session.record_write_at(Position::new(150));

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("StickyWorker", json!([])), &mut session);
        assert_eq!(
            job.consistency().unwrap().position,
            StampedPosition::Write(Position::new(150))
        );

        // Without any primary position, the session's own write is enough
        let stamper = stamper_with_unknown_positions();
        let job = stamper.stamp_for_enqueue(JobEnvelope::new("DelayedWorker", json!([])), &mut session);
        assert_eq!(
            job.consistency().unwrap().position,
            StampedPosition::Write(Position::new(150))
        );
    }

    #[test]
    fn test_primary_is_read_when_stamping() {
        let primary = primary(Some(100));
        let stamper = ConsistencyStamper::new(
            kinds(),
            primary.clone(),
            Arc::new(CachedPositions),
            Arc::new(HostPool::without_metrics(vec![replica("replica-0", Some(100))])),
        );
        let mut session = Session::new();
        session.record_write();
        primary.record_write_position(Position::new(130));

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("DelayedWorker", json!([])), &mut session);
        assert_eq!(
            job.consistency().unwrap().position,
            StampedPosition::Write(Position::new(130))
        );
    }

    #[test]
    fn test_read_session_stamps_replica_position() {
        let stamper = stamper(kinds(), Some(100), Some(80));
        let mut session = Session::new();

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("StickyWorker", json!([])), &mut session);
        let stamp = job.consistency().unwrap();
        assert_eq!(stamp.declared, ConsistencyLevel::Sticky);
        assert_eq!(stamp.position, StampedPosition::Read(Position::new(80)));
        assert_eq!(session.sticky_host().unwrap().id, "replica-0");
    }

    #[test]
    fn test_ignored_write_still_counts_as_write() {
        let stamper = stamper(kinds(), Some(100), Some(80));
        let mut session = Session::new();
        session.ignore_writes_for_scope(|session| session.record_write());

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("StickyWorker", json!([])), &mut session);
        assert_eq!(
            job.consistency().unwrap().position,
            StampedPosition::Write(Position::new(100))
        );
    }

    #[test]
    fn test_strict_jobs_are_never_stamped() {
        let stamper = stamper(kinds(), Some(100), Some(80));
        let mut session = Session::new();
        session.record_write();

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("StrictWorker", json!([])), &mut session);
        assert!(job.consistency().is_none());

        let mut reader = Session::new();
        let job = stamper.stamp_for_enqueue(JobEnvelope::new("StrictWorker", json!([])), &mut reader);
        assert!(job.consistency().is_none());
    }

    #[test]
    fn test_unknown_and_undeclared_kinds_are_not_stamped() {
        let stamper = stamper(kinds(), Some(100), Some(80));
        let mut session = Session::new();

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("MissingWorker", json!([])), &mut session);
        assert!(job.consistency().is_none());

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("UndeclaredWorker", json!([])), &mut session);
        assert!(job.consistency().is_none());
    }

    #[test]
    fn test_disabled_propagation_is_not_stamped() {
        let registry = registry(vec![JobKindInfo {
            propagation_enabled: false,
            ..job_kind("DelayedWorker", Some(ConsistencyLevel::Delayed), 3)
        }]);
        let stamper = stamper(registry, Some(100), Some(80));
        let mut session = Session::new();

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("DelayedWorker", json!([])), &mut session);
        assert!(job.consistency().is_none());
    }

    #[test]
    fn test_lookup_failures_skip_stamping() {
        let stamper = stamper(Arc::new(FailingRegistry), Some(100), Some(80));
        let mut session = Session::new();
        let job = stamper.stamp_for_enqueue(JobEnvelope::new("DelayedWorker", json!([])), &mut session);
        assert!(job.consistency().is_none());

        let stamper = stamper_with_unknown_positions();
        let mut session = Session::new();
        session.record_write();
        let job = stamper.stamp_for_enqueue(JobEnvelope::new("DelayedWorker", json!([])), &mut session);
        assert!(job.consistency().is_none());
    }

    fn stamper_with_unknown_positions() -> ConsistencyStamper {
        stamper(kinds(), None, None)
    }

    #[test]
    fn test_no_replica_uses_primary_position_as_read_position() {
        let offline = replica("replica-0", Some(80));
        offline.set_online(false);
        let stamper = ConsistencyStamper::new(
            kinds(),
            primary(Some(100)),
            Arc::new(CachedPositions),
            Arc::new(HostPool::without_metrics(vec![offline])),
        );
        let mut session = Session::new();

        let job = stamper.stamp_for_enqueue(JobEnvelope::new("StickyWorker", json!([])), &mut session);
        assert_eq!(
            job.consistency().unwrap().position,
            StampedPosition::Read(Position::new(100))
        );
    }
}
