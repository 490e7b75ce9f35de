/// Consistency propagation across the background job boundary
///
/// The stamper runs when a unit of work enqueues a job and records the
/// position that job must observe. The resolver runs when a worker dequeues
/// it and decides between the primary, a caught-up replica, or a deferred
/// retry.
pub mod backoff;
pub mod envelope;
pub mod resolver;
pub mod retry_queue;
pub mod stamper;

pub use backoff::BackoffPolicy;
pub use envelope::{ConsistencyStamp, JobEnvelope, StampedPosition};
pub use resolver::{ConsistencyResolver, JobOutcome, Resolution};
pub use retry_queue::{DelayedRetryQueue, InMemoryRetryQueue};
pub use stamper::ConsistencyStamper;

use crate::config::{JobConfig, RetryConfig};
use crate::error::BalanzaResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How tolerant a job kind is of reading from a lagging replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// Always runs on the primary
    Strict,
    /// Waits (by retrying later) for a replica to catch up, then falls back
    /// to the primary once the retry budget is spent
    Delayed,
    /// Uses a caught-up replica when there is one, otherwise the primary
    Sticky,
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyLevel::Strict => write!(f, "strict"),
            ConsistencyLevel::Delayed => write!(f, "delayed"),
            ConsistencyLevel::Sticky => write!(f, "sticky"),
        }
    }
}

/// What the registry knows about one job kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKindInfo {
    pub name: String,
    pub consistency: Option<ConsistencyLevel>,
    pub propagation_enabled: bool,
    pub max_retry_attempts: u32,
}

/// Resolves job-kind identifiers to their consistency metadata
pub trait JobRegistry: Send + Sync {
    /// `Ok(None)` when the kind is not a recognised job type.
    fn lookup(&self, kind: &str) -> BalanzaResult<Option<JobKindInfo>>;
}

/// Registry built from configuration, with runtime propagation toggles
#[derive(Debug, Default)]
pub struct StaticJobRegistry {
    kinds: RwLock<HashMap<String, JobKindInfo>>,
}

impl StaticJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(retry: &RetryConfig, jobs: &[JobConfig]) -> Self {
        let registry = Self::new();
        for job in jobs {
            registry.register(JobKindInfo {
                name: job.name.clone(),
                consistency: job.consistency,
                propagation_enabled: job.propagation_enabled,
                max_retry_attempts: job.max_retry_attempts.unwrap_or(retry.default_max_attempts),
            });
        }
        registry
    }

    pub fn register(&self, info: JobKindInfo) {
        self.kinds.write().insert(info.name.clone(), info);
    }

    /// Flip consistency propagation for one job kind. Returns false for
    /// unknown kinds.
    pub fn set_propagation_enabled(&self, kind: &str, enabled: bool) -> bool {
        match self.kinds.write().get_mut(kind) {
            Some(info) => {
                info.propagation_enabled = enabled;
                tracing::info!("Consistency propagation for {} set to {}", kind, enabled);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.read().is_empty()
    }
}

impl JobRegistry for StaticJobRegistry {
    fn lookup(&self, kind: &str) -> BalanzaResult<Option<JobKindInfo>> {
        Ok(self.kinds.read().get(kind).cloned())
    }
}
