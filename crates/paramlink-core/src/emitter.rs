//! Outbound parameter sink.
//!
//! The throttle engine only needs "send named float parameter". Delivery is
//! best-effort: an `Err` is logged by the caller and never retried.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::EmitterError;

/// Sends one named float parameter to the remote host.
pub trait Emitter: Send + Sync {
    fn send(&self, address: &str, value: f64) -> Result<(), EmitterError>;
}

impl<E: Emitter + ?Sized> Emitter for Arc<E> {
    fn send(&self, address: &str, value: f64) -> Result<(), EmitterError> {
        (**self).send(address, value)
    }
}

/// One recorded call to [`MemoryEmitter::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedUpdate {
    pub address: String,
    pub value: f64,
}

/// In-process emitter that records every send.
///
/// Used as a dry-run sink (`--dry-run`) and by tests. It can be switched into
/// a failing mode to exercise the error path.
#[derive(Debug, Default)]
pub struct MemoryEmitter {
    sent: Mutex<Vec<EmittedUpdate>>,
    fail: Mutex<bool>,
}

impl MemoryEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Every update sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<EmittedUpdate> {
        self.sent.lock().clone()
    }

    /// Updates sent for one address, oldest first.
    #[must_use]
    pub fn sent_to(&self, address: &str) -> Vec<f64> {
        self.sent
            .lock()
            .iter()
            .filter(|u| u.address == address)
            .map(|u| u.value)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Emitter for MemoryEmitter {
    fn send(&self, address: &str, value: f64) -> Result<(), EmitterError> {
        if *self.fail.lock() {
            return Err(EmitterError::Network(std::io::Error::other(
                "memory emitter set to fail",
            )));
        }
        self.sent.lock().push(EmittedUpdate {
            address: address.to_string(),
            value,
        });
        tracing::debug!(address, value, "dry-run emit");
        Ok(())
    }
}
