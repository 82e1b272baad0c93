//! OSC over UDP emitter.
//!
//! Each update goes out as a single OSC message carrying one 32-bit float
//! argument, e.g. `/usercamera/Zoom ,f 42.4`. Fire-and-forget: no bundles,
//! no acknowledgements.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType, encoder};

use crate::emitter::Emitter;
use crate::error::EmitterError;

/// Encode a single-float OSC message.
pub fn encode_float_message(address: &str, value: f64) -> Result<Vec<u8>, EmitterError> {
    if !address.starts_with('/') {
        return Err(EmitterError::Encoding(format!(
            "OSC address must start with '/': {address}"
        )));
    }
    let packet = OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args: vec![OscType::Float(value as f32)],
    });
    encoder::encode(&packet).map_err(|e| EmitterError::Encoding(format!("{e:?}")))
}

/// Sends parameter updates to one OSC host.
#[derive(Debug)]
pub struct OscEmitter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscEmitter {
    /// Bind an ephemeral local socket aimed at `target` (`host:port`).
    pub fn bind(target: &str) -> Result<Self, EmitterError> {
        let target = target
            .to_socket_addrs()
            .map_err(|_| EmitterError::InvalidTarget(target.to_string()))?
            .next()
            .ok_or_else(|| EmitterError::InvalidTarget(target.to_string()))?;

        let local = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;

        tracing::info!(%target, local = ?socket.local_addr().ok(), "OSC emitter ready");
        Ok(Self { socket, target })
    }
}

impl Emitter for OscEmitter {
    fn send(&self, address: &str, value: f64) -> Result<(), EmitterError> {
        let bytes = encode_float_message(address, value)?;
        self.socket.send_to(&bytes, self.target)?;
        tracing::debug!(address, value, "sent OSC");
        Ok(())
    }
}
