/// Dequeue-side consistency resolution
///
/// Decides, per delivery of a job, whether it runs on the primary, on a
/// replica that has caught up to the job's stamped position, or not at all
/// this time because it is handed back to the delayed-retry queue.
use crate::core::{HostPool, Position, Replica, ReplicaPositionReader, Route, Session};
use crate::jobs::{BackoffPolicy, ConsistencyLevel, DelayedRetryQueue, JobEnvelope, JobRegistry};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Where (or whether) one delivery of a job runs
#[derive(Debug, Clone)]
pub enum Resolution {
    RunOnPrimary,
    RunOnReplica(Arc<Replica>),
    /// Skip execution this time and re-deliver after `delay`
    ScheduleRetry { delay: Duration },
}

impl Resolution {
    pub fn is_retry(&self) -> bool {
        matches!(self, Resolution::ScheduleRetry { .. })
    }
}

/// Result of handing one delivery to `ConsistencyResolver::process`
#[derive(Debug)]
pub enum JobOutcome<R> {
    /// The job body ran; `result` is whatever it returned, errors included
    Executed { route: Route, result: R },
    /// The job was pushed back to the retry queue without running
    Deferred { at: SystemTime, attempt: u32 },
}

pub struct ConsistencyResolver {
    registry: Arc<dyn JobRegistry>,
    replicas: Arc<dyn ReplicaPositionReader>,
    pool: Arc<HostPool>,
    backoff: BackoffPolicy,
    retry_queue: Arc<dyn DelayedRetryQueue>,
}

impl ConsistencyResolver {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        replicas: Arc<dyn ReplicaPositionReader>,
        pool: Arc<HostPool>,
        backoff: BackoffPolicy,
        retry_queue: Arc<dyn DelayedRetryQueue>,
    ) -> Self {
        Self {
            registry,
            replicas,
            pool,
            backoff,
            retry_queue,
        }
    }

    /// Decide how this delivery of `job` runs. Has no side effects beyond
    /// host selection.
    pub fn resolve_for_dequeue(&self, job: &JobEnvelope) -> Resolution {
        let info = match self.registry.lookup(&job.kind) {
            Ok(Some(info)) => info,
            Ok(None) => {
                tracing::debug!("Unknown job kind {}, running {} on primary", job.kind, job.id);
                return Resolution::RunOnPrimary;
            }
            Err(e) => {
                tracing::debug!("Running {} on primary: {}", job.id, e);
                return Resolution::RunOnPrimary;
            }
        };

        let declared = match info.consistency {
            Some(ConsistencyLevel::Strict) | None => return Resolution::RunOnPrimary,
            Some(level) => level,
        };

        if !info.propagation_enabled {
            return Resolution::RunOnPrimary;
        }

        if let Some(replica) = job
            .stamped_position()
            .and_then(|position| self.caught_up_replica(position))
        {
            tracing::debug!("Running {} on caught-up replica {}", job.id, replica.id);
            return Resolution::RunOnReplica(replica);
        }

        let attempt = job.attempt();
        if declared == ConsistencyLevel::Delayed {
            if attempt < info.max_retry_attempts {
                let delay = self.backoff.delay_for(attempt);
                tracing::debug!(
                    "Replicas behind for {} (attempt {}/{}), retrying in {:?}",
                    job.id,
                    attempt,
                    info.max_retry_attempts,
                    delay
                );
                return Resolution::ScheduleRetry { delay };
            }
            tracing::warn!(
                "Replicas still behind for {} after {} attempts, running on primary",
                job.id,
                attempt
            );
        }

        Resolution::RunOnPrimary
    }

    /// Resolve and, unless deferred, run `body` with a fresh session routed
    /// accordingly. The session and any replica it stuck to are released when
    /// the body returns, so nothing leaks into the next job on this worker.
    pub fn process<R>(
        &self,
        job: JobEnvelope,
        body: impl FnOnce(&JobEnvelope, &mut Session) -> R,
    ) -> JobOutcome<R> {
        let mut session = Session::new();

        let route = match self.resolve_for_dequeue(&job) {
            Resolution::ScheduleRetry { delay } => match SystemTime::now().checked_add(delay) {
                Some(at) => {
                    let retry = job.next_attempt();
                    let attempt = retry.attempt();
                    match self.retry_queue.schedule_at(at, retry) {
                        Ok(()) => return JobOutcome::Deferred { at, attempt },
                        Err(e) => {
                            tracing::warn!("Could not defer {}, running on primary: {}", job.id, e);
                            Route::Primary
                        }
                    }
                }
                None => {
                    tracing::warn!(
                        "Retry delay {:?} for {} is out of range, running on primary",
                        delay,
                        job.id
                    );
                    Route::Primary
                }
            },
            Resolution::RunOnReplica(replica) => {
                session.pin_host(replica);
                Route::Replica
            }
            Resolution::RunOnPrimary => Route::Primary,
        };

        let result = match route {
            Route::Primary => session.force_primary_for_scope(|session| body(&job, session)),
            Route::Replica => body(&job, &mut session),
        };

        if let Some(replica) = session.release_host() {
            tracing::trace!("Released replica {} after {}", replica.id, job.id);
        }

        JobOutcome::Executed { route, result }
    }

    /// First online replica, in rotation order, that has applied `position`
    fn caught_up_replica(&self, position: Position) -> Option<Arc<Replica>> {
        self.pool
            .online_from_cursor()
            .into_iter()
            .find(|replica| match self.replicas.caught_up_to(replica, position) {
                Ok(caught_up) => caught_up,
                Err(e) => {
                    tracing::debug!("Treating {} as behind: {}", replica.id, e);
                    false
                }
            })
    }
}
