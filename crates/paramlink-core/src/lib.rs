//! paramlink-core: WebSocket-to-OSC parameter bridge
//!
//! Clients stream relative "delta" events for named camera parameters over a
//! WebSocket. Each delta is scaled to the parameter's range, clamped, coalesced
//! per connection to at most one update per parameter per throttle window, and
//! forwarded to an OSC host over UDP.
//!
//! # Architecture
//!
//! ```text
//! WebSocket frame → ConnectionSession → RangePolicy
//!                         ↓
//!                  ThrottleEngine (per connection)
//!                         ↓
//!          ParameterRegistry (shared) → Emitter (OSC/UDP)
//! ```
//!
//! # Modules
//!
//! - `config`: TOML configuration and the default parameter table
//! - `error`: Error types with remediation hints
//! - `logging`: tracing subscriber setup
//! - `registry`: Shared parameter state
//! - `range_policy`: Delta scaling, clamping and limit detection
//! - `throttle`: Per-connection coalescing of outbound updates
//! - `emitter`: Outbound sink trait and in-memory sink
//! - `osc`: OSC/UDP emitter
//! - `session`: Per-connection message handling
//! - `server`: HTTP/WebSocket front end
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod emitter;
pub mod error;
pub mod logging;
pub mod osc;
pub mod range_policy;
pub mod registry;
pub mod server;
pub mod session;
pub mod throttle;

pub use error::{Error, Result};

/// Version of the paramlink-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
