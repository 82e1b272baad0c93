//! One control-channel connection bound to its own throttle engine.
//!
//! The session decodes inbound delta messages, validates the address against
//! the registry, runs the range policy and then either answers with a limit
//! notification (to this connection only) or hands the clamped value to the
//! throttle engine. Nothing here blocks or performs I/O; the connection loop
//! in [`crate::server`] owns the socket and the clock.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{BridgeConfig, DEFAULT_THROTTLE_INTERVAL_MS};
use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::range_policy::{Limit, Sensitivity, apply_delta_raw};
use crate::registry::ParameterRegistry;
use crate::throttle::{FireOutcome, SubmitOutcome, ThrottleEngine, ThrottleStats};

/// Inbound control message: `{"address": "/usercamera/Zoom", "delta": 10}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub address: String,
    pub delta: f64,
}

impl DeltaEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let event: Self =
            serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        if !event.delta.is_finite() {
            return Err(Error::MalformedMessage(format!(
                "delta must be finite, got {}",
                event.delta
            )));
        }
        Ok(event)
    }
}

/// Outbound notice that a parameter is pinned on a bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitNotification {
    pub address: String,
    pub limit: Limit,
}

impl LimitNotification {
    /// JSON text frame for the control channel.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Per-connection tuning, shared by every session of one server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub throttle_interval: Duration,
    pub sensitivity: Sensitivity,
}

impl SessionSettings {
    /// Derive settings from a configuration, validating it first.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            throttle_interval: config.throttle.interval()?,
            sensitivity: Sensitivity::new(config.throttle.sensitivity_divisor),
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_secs_f64(DEFAULT_THROTTLE_INTERVAL_MS / 1000.0),
            sensitivity: Sensitivity::default(),
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// What one delta did.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOutcome {
    /// Parameter pinned; send this back to the originating connection.
    Limited(LimitNotification),
    /// Candidate value handed to the throttle engine.
    Submitted { value: f64, outcome: SubmitOutcome },
    /// Session already closed; the delta was dropped.
    Ignored,
}

/// State for one control-channel connection.
#[derive(Debug)]
pub struct ConnectionSession {
    id: u64,
    registry: Arc<ParameterRegistry>,
    engine: ThrottleEngine,
    sensitivity: Sensitivity,
    state: SessionState,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(
        id: u64,
        registry: Arc<ParameterRegistry>,
        emitter: Arc<dyn Emitter>,
        settings: SessionSettings,
    ) -> Self {
        let engine =
            ThrottleEngine::new(id, settings.throttle_interval, registry.clone(), emitter);
        info!(conn_id = id, "control connection opened");
        Self {
            id,
            registry,
            engine,
            sensitivity: settings.sensitivity,
            state: SessionState::Open,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn engine(&self) -> &ThrottleEngine {
        &self.engine
    }

    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        self.engine.stats()
    }

    /// Decode and apply one text frame.
    ///
    /// Returns the limit notification to send back, if any. Errors are
    /// per-message: the caller logs them and keeps the connection open.
    pub fn handle_message(&mut self, text: &str, now: Instant) -> Result<Option<LimitNotification>> {
        let event = DeltaEvent::decode(text)?;
        match self.handle_delta(&event, now)? {
            DeltaOutcome::Limited(notification) => Ok(Some(notification)),
            DeltaOutcome::Submitted { .. } | DeltaOutcome::Ignored => Ok(None),
        }
    }

    /// Apply one decoded delta.
    ///
    /// The delta is applied on top of this connection's pending value when an
    /// emission is already scheduled, otherwise on top of the stored value.
    pub fn handle_delta(&mut self, event: &DeltaEvent, now: Instant) -> Result<DeltaOutcome> {
        if self.state == SessionState::Closed {
            return Ok(DeltaOutcome::Ignored);
        }

        let param = self.registry.get(&event.address)?;
        let current = self
            .engine
            .pending(&event.address)
            .map_or(param.value, |p| p.latest_value);

        let outcome = apply_delta_raw(current, param.min, param.max, event.delta, self.sensitivity);
        if let Some(limit) = outcome.limit {
            debug!(conn_id = self.id, address = %event.address, %limit, "limit reached");
            return Ok(DeltaOutcome::Limited(LimitNotification {
                address: event.address.clone(),
                limit,
            }));
        }

        let submit = self.engine.submit(&event.address, outcome.value, now);
        Ok(DeltaOutcome::Submitted {
            value: outcome.value,
            outcome: submit,
        })
    }

    /// Earliest scheduled emission for this connection.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Open => self.engine.next_deadline(),
            SessionState::Closed => None,
        }
    }

    /// Fire every emission that is due.
    pub fn poll_due(&mut self, now: Instant) -> Vec<(String, FireOutcome)> {
        self.engine.fire_due(now)
    }

    /// Close the session and drop every pending emission. Idempotent.
    pub fn close(&mut self) -> usize {
        if self.state == SessionState::Closed {
            return 0;
        }
        self.state = SessionState::Closed;
        let cancelled = self.engine.teardown();
        let stats = self.engine.stats();
        info!(
            conn_id = self.id,
            cancelled,
            submitted = stats.submitted,
            emitted = stats.emitted,
            "control connection closed"
        );
        cancelled
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
