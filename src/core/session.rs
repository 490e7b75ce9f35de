/// Per unit of work consistency state
///
/// A `Session` is created at the start of a request or job execution, passed
/// by reference through the code that issues queries, and dropped at the end.
/// It is never shared between threads, so none of its operations lock.
use crate::core::{HostPool, Position, Replica};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Where a statement should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Replica,
}

/// Read/write nature of a statement, as classified by the query layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
    /// Cannot be classified statically: transaction wrappers, raw
    /// multi-statement execution, session-local configuration changes
    Ambiguous,
}

#[derive(Debug, Default)]
pub struct Session {
    force_primary: bool,
    performed_write: bool,
    /// A write recorded outside of an ignore-writes scope
    sticky_write: bool,
    ignore_writes: bool,
    fallback_to_replicas_for_ambiguous_queries: bool,
    /// Highest primary position reported by this session's own writes
    write_position: Option<Position>,
    host: Option<Arc<Replica>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether reads in this session must go to the primary
    pub fn use_primary(&self) -> bool {
        self.force_primary || (self.sticky_write && !self.ignore_writes)
    }

    /// Pin the rest of the session to the primary
    pub fn force_primary(&mut self) {
        self.force_primary = true;
    }

    /// Record that a write was issued.
    ///
    /// Outside of `ignore_writes_for_scope` this pins the remainder of the
    /// session to the primary.
    pub fn record_write(&mut self) {
        self.performed_write = true;
        if self.ignore_writes {
            return;
        }
        self.sticky_write = true;
        self.force_primary = true;
    }

    /// Record a write together with the primary position it committed at
    pub fn record_write_at(&mut self, position: Position) {
        self.record_write();
        self.write_position = Some(self.write_position.map_or(position, |seen| seen.max(position)));
    }

    /// Position of the latest write recorded with `record_write_at`
    pub fn last_write_position(&self) -> Option<Position> {
        self.write_position
    }

    pub fn was_write_performed(&self) -> bool {
        self.performed_write
    }

    pub fn ignoring_writes(&self) -> bool {
        self.ignore_writes
    }

    /// Whether an ambiguous statement may run on a replica
    pub fn use_replicas_for_ambiguous_queries(&self) -> bool {
        self.fallback_to_replicas_for_ambiguous_queries
            && !self.force_primary
            && !self.performed_write
    }

    /// Run `f` with the primary forced. On exit the previous setting is
    /// restored, unless a write happened in the meantime.
    pub fn force_primary_for_scope<R>(&mut self, f: impl FnOnce(&mut Session) -> R) -> R {
        let previous = self.force_primary;
        self.force_primary = true;
        let mut scope = ScopeGuard::new(self, move |session: &mut Session| {
            session.force_primary = previous || session.sticky_write;
        });
        f(&mut *scope)
    }

    /// Run `f` with writes not counting towards primary stickiness
    pub fn ignore_writes_for_scope<R>(&mut self, f: impl FnOnce(&mut Session) -> R) -> R {
        let previous = self.ignore_writes;
        self.ignore_writes = true;
        let mut scope = ScopeGuard::new(self, move |session: &mut Session| {
            session.ignore_writes = previous;
        });
        f(&mut *scope)
    }

    /// Run `f` with ambiguous statements preferring replicas, as long as the
    /// session has neither forced the primary nor written.
    pub fn fallback_to_replicas_for_ambiguous_queries_for_scope<R>(
        &mut self,
        f: impl FnOnce(&mut Session) -> R,
    ) -> R {
        let previous = self.fallback_to_replicas_for_ambiguous_queries;
        self.fallback_to_replicas_for_ambiguous_queries = true;
        let mut scope = ScopeGuard::new(self, move |session: &mut Session| {
            session.fallback_to_replicas_for_ambiguous_queries = previous;
        });
        f(&mut *scope)
    }

    /// Decide where a statement runs. Writes are recorded as a side effect.
    pub fn route(&mut self, kind: StatementKind) -> Route {
        let route = match kind {
            StatementKind::Write => {
                self.record_write();
                Route::Primary
            }
            StatementKind::Read if self.use_primary() => Route::Primary,
            StatementKind::Read => Route::Replica,
            StatementKind::Ambiguous if self.use_replicas_for_ambiguous_queries() => {
                Route::Replica
            }
            StatementKind::Ambiguous => Route::Primary,
        };
        tracing::trace!("Routing {:?} statement to {:?}", kind, route);
        route
    }

    /// The replica this session reads from, chosen once and then reused
    /// while it stays online
    pub fn replica_host(&mut self, pool: &HostPool) -> Option<Arc<Replica>> {
        if self.host.as_ref().is_some_and(|host| !host.is_online()) {
            self.host = None;
        }
        if self.host.is_none() {
            self.host = pool.select();
        }
        self.host.clone()
    }

    pub fn sticky_host(&self) -> Option<&Arc<Replica>> {
        self.host.as_ref()
    }

    /// Stick this session's reads to `host`
    pub fn pin_host(&mut self, host: Arc<Replica>) {
        self.host = Some(host);
    }

    /// Forget the sticky replica; the next read selects a new one
    pub fn release_host(&mut self) -> Option<Arc<Replica>> {
        self.host.take()
    }
}

/// Restores session state when a scope ends, including by unwinding
struct ScopeGuard<'a, F: FnOnce(&mut Session)> {
    session: &'a mut Session,
    on_exit: Option<F>,
}

impl<'a, F: FnOnce(&mut Session)> ScopeGuard<'a, F> {
    fn new(session: &'a mut Session, on_exit: F) -> Self {
        Self {
            session,
            on_exit: Some(on_exit),
        }
    }
}

impl<F: FnOnce(&mut Session)> Deref for ScopeGuard<'_, F> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &*self.session
    }
}

impl<F: FnOnce(&mut Session)> DerefMut for ScopeGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut *self.session
    }
}

impl<F: FnOnce(&mut Session)> Drop for ScopeGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(&mut *self.session);
        }
    }
}
