//! Per-connection emission throttle with last-write-wins coalescing.
//!
//! Each address has at most one scheduled emission. Submitting a value while
//! an emission is already scheduled only overwrites the pending value, so the
//! emission sends whatever was submitted last, never a value captured at
//! schedule time.
//!
//! # Algorithm
//!
//! - `submit` records the value and, if nothing is scheduled for the address,
//!   schedules an emission at `now + interval`.
//! - When the deadline passes, `fire` compares the pending value with the
//!   registry. Equal values are dropped without a send; otherwise the
//!   registry is written first and the emitter is called second.
//! - The entry is removed either way, so the next submit schedules afresh.
//! - `teardown` drops every entry without emitting.
//!
//! Time is passed in explicitly; the engine owns no timers and never sleeps.
//! The connection loop asks for [`ThrottleEngine::next_deadline`], sleeps until
//! then and calls [`ThrottleEngine::fire_due`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::emitter::Emitter;
use crate::registry::ParameterRegistry;

/// Pending state for one address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingUpdate {
    /// Most recently submitted value
    pub latest_value: f64,
    /// When the scheduled emission fires
    pub deadline: Instant,
}

/// What `submit` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// No emission was pending; one is now scheduled.
    Scheduled { deadline: Instant },
    /// An emission was already pending; only its value changed.
    Coalesced,
}

/// What a fired emission did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FireOutcome {
    /// Registry updated and emitter called successfully.
    Emitted { value: f64 },
    /// Pending value equals the stored value; nothing sent.
    Unchanged { value: f64 },
    /// Registry updated but the emitter failed. Not rolled back.
    EmitFailed { value: f64 },
    /// The registry refused the value (unknown address or out of range).
    Rejected,
    /// Nothing was pending for the address.
    NotPending,
}

/// Counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStats {
    pub submitted: u64,
    pub coalesced: u64,
    pub emitted: u64,
    pub unchanged: u64,
    pub emit_failures: u64,
    pub rejected: u64,
    pub cancelled: u64,
}

/// Throttle state for one connection.
pub struct ThrottleEngine {
    conn_id: u64,
    interval: Duration,
    registry: Arc<ParameterRegistry>,
    emitter: Arc<dyn Emitter>,
    pending: HashMap<String, PendingUpdate>,
    stats: ThrottleStats,
}

impl std::fmt::Debug for ThrottleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleEngine")
            .field("conn_id", &self.conn_id)
            .field("interval", &self.interval)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ThrottleEngine {
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn new(
        conn_id: u64,
        interval: Duration,
        registry: Arc<ParameterRegistry>,
        emitter: Arc<dyn Emitter>,
    ) -> Self {
        assert!(!interval.is_zero(), "throttle interval must be positive");
        Self {
            conn_id,
            interval,
            registry,
            emitter,
            pending: HashMap::new(),
            stats: ThrottleStats::default(),
        }
    }

    /// Record `candidate` as the latest value for `address`.
    pub fn submit(&mut self, address: &str, candidate: f64, now: Instant) -> SubmitOutcome {
        self.stats.submitted += 1;
        if let Some(entry) = self.pending.get_mut(address) {
            entry.latest_value = candidate;
            self.stats.coalesced += 1;
            return SubmitOutcome::Coalesced;
        }

        let deadline = now + self.interval;
        self.pending.insert(
            address.to_string(),
            PendingUpdate {
                latest_value: candidate,
                deadline,
            },
        );
        SubmitOutcome::Scheduled { deadline }
    }

    /// Earliest scheduled emission, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Fire every emission whose deadline is at or before `now`, earliest first.
    pub fn fire_due(&mut self, now: Instant) -> Vec<(String, FireOutcome)> {
        let mut due: Vec<(Instant, String)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(address, p)| (p.deadline, address.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .map(|(_, address)| {
                let outcome = self.fire(&address);
                (address, outcome)
            })
            .collect()
    }

    /// Fire the scheduled emission for `address` now, regardless of its deadline.
    pub fn fire(&mut self, address: &str) -> FireOutcome {
        let Some(entry) = self.pending.remove(address) else {
            return FireOutcome::NotPending;
        };
        let value = entry.latest_value;

        let current = match self.registry.value(address) {
            Ok(current) => current,
            Err(err) => {
                self.stats.rejected += 1;
                warn!(conn_id = self.conn_id, address, error = %err, "dropping pending update");
                return FireOutcome::Rejected;
            }
        };

        #[allow(clippy::float_cmp)]
        let unchanged = current == value;
        if unchanged {
            self.stats.unchanged += 1;
            debug!(conn_id = self.conn_id, address, value, "value unchanged, skipping send");
            return FireOutcome::Unchanged { value };
        }

        if let Err(err) = self.registry.set(address, value) {
            self.stats.rejected += 1;
            warn!(conn_id = self.conn_id, address, value, error = %err, "registry rejected update");
            return FireOutcome::Rejected;
        }

        match self.emitter.send(address, value) {
            Ok(()) => {
                self.stats.emitted += 1;
                debug!(conn_id = self.conn_id, address, value, "emitted (throttled)");
                FireOutcome::Emitted { value }
            }
            Err(err) => {
                self.stats.emit_failures += 1;
                warn!(conn_id = self.conn_id, address, value, error = %err, "emit failed");
                FireOutcome::EmitFailed { value }
            }
        }
    }

    /// Drop every pending emission without sending. Returns how many were dropped.
    ///
    /// Safe to call repeatedly; entries that already fired are simply absent.
    pub fn teardown(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        self.stats.cancelled += cancelled as u64;
        if cancelled > 0 {
            debug!(conn_id = self.conn_id, cancelled, "cancelled pending emissions");
        }
        cancelled
    }

    #[must_use]
    pub fn pending(&self, address: &str) -> Option<&PendingUpdate> {
        self.pending.get(address)
    }

    #[must_use]
    pub fn is_pending(&self, address: &str) -> bool {
        self.pending.contains_key(address)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        self.stats
    }
}
