//! The `transport` module is the boundary between the broker and the
//! execution contexts of the applications.
//!
//! The broker only depends on two collaborators: a [`Transport`] that
//! carries opaque frames to a named peer, and an [`Identity`] that tells
//! which application sits behind a peer. Frames are JSON-encoded
//! [`message::ClientMessage`] / [`message::ServerMessage`] values.
//!
//! `local` provides an in-process binding over tokio channels and `server`
//! the loop feeding inbound frames into the broker.

pub mod local;
pub mod message;
pub mod server;

use tracing::warn;

use crate::utils::error::Result;
use message::ServerMessage;

pub use local::{Connection, LocalHub, PeerLink};
pub use message::{Ack, ClientMessage};
pub use server::serve;

/// Identifies one connected execution context.
pub type PeerId = String;

/// Carries frames from the broker to peers.
pub trait Transport: Send + Sync {
    fn send(&self, target: &str, frame: Vec<u8>) -> Result<()>;
}

/// Resolves which application produced frames arriving from a peer.
pub trait Identity: Send + Sync {
    fn resolve_origin(&self, source: &str) -> Option<Origin>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub app_symbolic_name: String,
    pub is_platform_host: bool,
}

impl Origin {
    pub fn app(app_symbolic_name: impl Into<String>) -> Self {
        Self {
            app_symbolic_name: app_symbolic_name.into(),
            is_platform_host: false,
        }
    }

    pub fn host(app_symbolic_name: impl Into<String>) -> Self {
        Self {
            app_symbolic_name: app_symbolic_name.into(),
            is_platform_host: true,
        }
    }
}

/// Encodes and sends one frame. Returns whether the peer accepted it.
pub(crate) fn send_frame(transport: &dyn Transport, peer: &str, message: &ServerMessage) -> bool {
    let frame = match serde_json::to_vec(message) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to serialize frame for {peer}: {e}");
            return false;
        }
    };
    match transport.send(peer, frame) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to send to {peer}: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests;
