//! Server loop
//!
//! Accepts connections from a [`LocalHub`] and feeds each peer's frames into
//! the broker. Responsibilities:
//! - one task per connection; frames of a peer are handled one at a time,
//!   so a peer's commands take effect in the order it sent them
//! - refuse peers whose application is not registered
//! - clean up broker and hub state when the peer closes its link

use std::sync::Arc;

use tokio::spawn;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use super::local::{Connection, LocalHub};
use crate::broker::Broker;

pub async fn serve(
    broker: Arc<Broker>,
    hub: Arc<LocalHub>,
    mut connections: UnboundedReceiver<Connection>,
) {
    info!("Broker accepting in-process connections");

    while let Some(connection) = connections.recv().await {
        let broker = broker.clone();
        let hub = hub.clone();
        spawn(async move {
            handle_connection(&broker, &hub, connection).await;
        });
    }

    info!("Connection channel closed, server loop stopped");
}

async fn handle_connection(broker: &Broker, hub: &LocalHub, connection: Connection) {
    let Connection { peer, mut frames } = connection;

    if let Err(e) = broker.connect(&peer) {
        warn!("Refusing peer {peer}: {e}");
        hub.release(&peer);
        return;
    }

    while let Some(frame) = frames.recv().await {
        broker.handle_frame(&peer, &frame).await;
    }

    broker.disconnect(&peer);
    hub.release(&peer);
    info!("Receive loop closed for {peer}");
}
