//! In-process host binding
//!
//! `LocalHub` connects application clients living in the same process as
//! the broker. Each peer gets a pair of unbounded channels: frames from the
//! peer reach the server loop through a [`Connection`], frames from the
//! broker reach the peer through its [`PeerLink`].
//!
//! The hub is both the broker's [`Transport`] and its [`Identity`]: the
//! application behind a peer is fixed when the peer is created, so frames
//! cannot claim another origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Identity, Origin, PeerId, Transport};
use crate::utils::error::{Result, RouteError};

/// A new peer, as seen by the server loop.
#[derive(Debug)]
pub struct Connection {
    pub peer: PeerId,
    /// Frames sent by the peer. Closed when the peer goes away.
    pub frames: UnboundedReceiver<Vec<u8>>,
}

/// The peer's end of a connection.
#[derive(Debug)]
pub struct PeerLink {
    pub peer: PeerId,
    pub app_symbolic_name: String,
    /// Frames to the broker.
    pub outbound: UnboundedSender<Vec<u8>>,
    /// Frames from the broker.
    pub inbound: UnboundedReceiver<Vec<u8>>,
}

struct PeerEntry {
    origin: Origin,
    sender: UnboundedSender<Vec<u8>>,
}

pub struct LocalHub {
    peers: Mutex<HashMap<PeerId, PeerEntry>>,
    accept: UnboundedSender<Connection>,
}

impl LocalHub {
    /// Creates a hub and the stream of connections to hand to
    /// [`serve`](super::serve).
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Connection>) {
        let (accept, connections) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            accept,
        });
        (hub, connections)
    }

    /// Connects a peer on behalf of application `app`.
    pub fn connect(&self, app: &str) -> Result<PeerLink> {
        self.open(Origin::app(app))
    }

    /// Connects a peer of the platform host, which registers itself with
    /// the broker on first contact.
    pub fn connect_host(&self, app: &str) -> Result<PeerLink> {
        self.open(Origin::host(app))
    }

    /// Forgets a peer. Later frames to it fail.
    pub fn release(&self, peer: &str) {
        if self.peers().remove(peer).is_some() {
            debug!("Released peer {peer}");
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    fn open(&self, origin: Origin) -> Result<PeerLink> {
        let peer = format!("{}#{}", origin.app_symbolic_name, Uuid::new_v4().simple());
        let (to_peer, inbound) = mpsc::unbounded_channel();
        let (outbound, frames) = mpsc::unbounded_channel();
        let app_symbolic_name = origin.app_symbolic_name.clone();

        self.peers().insert(
            peer.clone(),
            PeerEntry {
                origin,
                sender: to_peer,
            },
        );
        if self
            .accept
            .send(Connection {
                peer: peer.clone(),
                frames,
            })
            .is_err()
        {
            self.release(&peer);
            return Err(RouteError::transport("the host is not accepting connections"));
        }

        info!("Peer {peer} opened for '{app_symbolic_name}'");
        Ok(PeerLink {
            peer,
            app_symbolic_name,
            outbound,
            inbound,
        })
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, PeerEntry>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for LocalHub {
    fn send(&self, target: &str, frame: Vec<u8>) -> Result<()> {
        let peers = self.peers();
        let entry = peers
            .get(target)
            .ok_or_else(|| RouteError::transport(format!("peer {target} is not connected")))?;
        entry
            .sender
            .send(frame)
            .map_err(|_| RouteError::transport(format!("peer {target} has gone away")))
    }
}

impl Identity for LocalHub {
    fn resolve_origin(&self, source: &str) -> Option<Origin> {
        self.peers().get(source).map(|entry| entry.origin.clone())
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("peers", &self.peer_count())
            .finish()
    }
}
