/// Replicated-state position tokens and the readers that report them
use crate::core::{Primary, Replica};
use crate::error::{BalanzaError, BalanzaResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, monotonically increasing marker of how much replicated state a
/// database instance has applied (a WAL location, binlog offset, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(u64);

impl Position {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// True once this position is at or beyond `target`.
    pub fn has_reached(&self, target: Position) -> bool {
        self.0 >= target.0
    }

    /// How far this position trails `ahead`, zero when it does not trail.
    pub fn lag_behind(&self, ahead: Position) -> u64 {
        ahead.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Reads the primary's current write position
pub trait PrimaryPositionReader: Send + Sync {
    fn current_write_position(&self) -> BalanzaResult<Position>;
}

/// Reads how far a replica has applied the primary's changes
pub trait ReplicaPositionReader: Send + Sync {
    fn current_position(&self, replica: &Replica) -> BalanzaResult<Position>;

    /// Whether `replica` has applied everything up to `position`.
    fn caught_up_to(&self, replica: &Replica, position: Position) -> BalanzaResult<bool> {
        Ok(self.current_position(replica)?.has_reached(position))
    }
}

impl PrimaryPositionReader for Primary {
    fn current_write_position(&self) -> BalanzaResult<Position> {
        self.write_position().ok_or_else(|| {
            BalanzaError::position(format!(
                "no write position observed yet for primary {}",
                self.addr
            ))
        })
    }
}

/// Replica position reader backed by the positions cached by health checks
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedPositions;

impl ReplicaPositionReader for CachedPositions {
    fn current_position(&self, replica: &Replica) -> BalanzaResult<Position> {
        replica.position().ok_or_else(|| {
            BalanzaError::position(format!(
                "no replicated position observed yet for replica {}",
                replica.id
            ))
        })
    }
}
