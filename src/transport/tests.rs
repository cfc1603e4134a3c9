use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use super::local::{LocalHub, PeerLink};
use super::message::{Ack, ClientMessage, ServerMessage};
use super::{Identity, Transport, serve};
use crate::broker::Broker;
use crate::broker::message::TopicMessage;
use crate::config::Settings;
use crate::manifest::ApplicationManifest;

fn start() -> (Arc<Broker>, Arc<LocalHub>) {
    let (hub, connections) = LocalHub::new();
    let settings = Settings {
        applications: vec![
            ApplicationManifest::new("sensors"),
            ApplicationManifest::new("dashboard"),
        ],
        ..Settings::default()
    };
    let broker = Arc::new(Broker::from_settings(&settings, hub.clone(), hub.clone()).unwrap());
    tokio::spawn(serve(broker.clone(), hub.clone(), connections));
    (broker, hub)
}

fn send(link: &PeerLink, message: ClientMessage) {
    link.outbound
        .send(serde_json::to_vec(&message).unwrap())
        .unwrap();
}

async fn next_frame(link: &mut PeerLink) -> Option<ServerMessage> {
    let frame = timeout(Duration::from_secs(2), link.inbound.recv())
        .await
        .expect("timed out waiting for a frame")?;
    Some(serde_json::from_slice(&frame).unwrap())
}

#[test]
fn test_hub_resolves_origin_of_its_peers() {
    let (hub, _connections) = LocalHub::new();
    let app = hub.connect("sensors").unwrap();
    let host = hub.connect_host("workbench").unwrap();

    let origin = hub.resolve_origin(&app.peer).unwrap();
    assert_eq!(origin.app_symbolic_name, "sensors");
    assert!(!origin.is_platform_host);
    assert!(hub.resolve_origin(&host.peer).unwrap().is_platform_host);
    assert!(hub.resolve_origin("sensors#forged").is_none());
    assert_eq!(hub.peer_count(), 2);

    hub.release(&app.peer);
    assert!(hub.resolve_origin(&app.peer).is_none());
    assert!(hub.send(&app.peer, b"{}".to_vec()).is_err());
}

#[test]
fn test_hub_without_server_refuses_connections() {
    let (hub, connections) = LocalHub::new();
    drop(connections);
    let err = hub.connect("sensors").unwrap_err();
    assert_eq!(err.kind(), "TransportError");
    assert_eq!(hub.peer_count(), 0);
}

#[tokio::test]
async fn test_serve_acknowledges_and_delivers() {
    let (_broker, hub) = start();
    let mut dashboard = hub.connect("dashboard").unwrap();
    let mut sensors = hub.connect("sensors").unwrap();

    send(
        &dashboard,
        ClientMessage::Subscribe {
            request_id: "r1".into(),
            subscription_id: "temps".into(),
            topic: "rooms/:room/temperature".into(),
        },
    );
    assert_eq!(
        next_frame(&mut dashboard).await,
        Some(ServerMessage::Ack {
            request_id: "r1".into(),
            ack: Ack::Done
        })
    );

    send(
        &sensors,
        ClientMessage::Publish {
            request_id: "p1".into(),
            message: TopicMessage::new("rooms/hall/temperature").with_body(json!(19)),
        },
    );
    assert!(matches!(
        next_frame(&mut sensors).await,
        Some(ServerMessage::Ack { .. })
    ));

    match next_frame(&mut dashboard).await {
        Some(ServerMessage::Message {
            subscription_id,
            message,
        }) => {
            assert_eq!(subscription_id, "temps");
            assert_eq!(message.params["room"], "hall");
            assert_eq!(message.sender(), Some("sensors"));
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_serve_refuses_unregistered_application() {
    let (_broker, hub) = start();
    let mut stranger = hub.connect("stranger").unwrap();
    assert_eq!(next_frame(&mut stranger).await, None);
}

#[tokio::test]
async fn test_closing_link_disconnects_peer() {
    let (broker, hub) = start();
    let mut dashboard = hub.connect("dashboard").unwrap();
    send(
        &dashboard,
        ClientMessage::Subscribe {
            request_id: "r1".into(),
            subscription_id: "s1".into(),
            topic: "alerts".into(),
        },
    );
    next_frame(&mut dashboard).await;
    assert_eq!(broker.count_subscribers("alerts").unwrap(), 1);

    drop(dashboard);
    for _ in 0..50 {
        if hub.peer_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broker.count_subscribers("alerts").unwrap(), 0);
    assert_eq!(hub.peer_count(), 0);
}
