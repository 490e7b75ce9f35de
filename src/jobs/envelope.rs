/// Typed job payload carrying its consistency requirement
use crate::core::Position;
use crate::error::BalanzaResult;
use crate::jobs::ConsistencyLevel;
use crate::utils::generate_id;
use serde::{Deserialize, Serialize};

/// Position a job must observe, captured when it was enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampedPosition {
    /// The enqueuing unit of work wrote; the primary's write position
    Write(Position),
    /// The enqueuing unit of work only read; the replica position it saw
    Read(Position),
}

impl StampedPosition {
    pub fn position(&self) -> Position {
        match self {
            StampedPosition::Write(position) | StampedPosition::Read(position) => *position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyStamp {
    pub declared: ConsistencyLevel,
    pub position: StampedPosition,
}

/// A scheduled job as handed to the dispatcher.
///
/// Envelopes are built before dispatch and not mutated afterwards; stamping
/// and retry scheduling produce new envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consistency: Option<ConsistencyStamp>,
    /// Consistency retries already spent on this job
    #[serde(default)]
    retry_count: u32,
}

impl JobEnvelope {
    pub fn new<S: Into<String>>(kind: S, args: serde_json::Value) -> Self {
        Self {
            id: generate_id("job"),
            kind: kind.into(),
            args,
            consistency: None,
            retry_count: 0,
        }
    }

    pub fn consistency(&self) -> Option<&ConsistencyStamp> {
        self.consistency.as_ref()
    }

    pub fn stamped_position(&self) -> Option<Position> {
        self.consistency.map(|stamp| stamp.position.position())
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// 1-based number of the dequeue attempt this envelope represents
    pub fn attempt(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    pub(crate) fn with_consistency(self, stamp: ConsistencyStamp) -> Self {
        Self {
            consistency: Some(stamp),
            ..self
        }
    }

    /// The envelope to re-deliver after a consistency retry
    pub(crate) fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> BalanzaResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> BalanzaResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
