use std::sync::Arc;
use std::time::Duration;

use appbus::broker::{
    Broker, Headers, Intent, IntentSelector, Interceptor, Next, ReplyStatus, TopicMessage,
};
use appbus::client::AppClient;
use appbus::config::Settings;
use appbus::manifest::{
    ApplicationManifest, CapabilityDecl, IntentionDecl, ManifestObjectFilter, Qualifier,
};
use appbus::transport::{LocalHub, serve};
use appbus::utils::error::{Result, RouteError};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// Rejects publishes to `audit/...` from anyone but the host.
struct AuditGuard;

#[async_trait]
impl Interceptor<TopicMessage> for AuditGuard {
    async fn intercept(&self, message: TopicMessage, next: Next<'_, TopicMessage>) -> Result<()> {
        if message.topic.starts_with("audit/") && message.sender() != Some("host") {
            return Err(RouteError::intercepted("audit topics are reserved for the host"));
        }
        next.handle(message).await
    }
}

fn settings() -> Settings {
    let contact = Qualifier::from([("entity", "contact"), ("id", "*")]);
    Settings {
        applications: vec![
            ApplicationManifest::new("contacts")
                .with_capability(CapabilityDecl::new("view").with_qualifier(contact.clone()).public()),
            ApplicationManifest::new("crm")
                .with_capability(CapabilityDecl::new("view").with_qualifier(contact.clone()).public())
                .with_intention(IntentionDecl::new("view").with_qualifier(contact)),
            ApplicationManifest::new("inbox"),
        ],
        ..Settings::default()
    }
}

fn start() -> (Arc<Broker>, Arc<LocalHub>) {
    appbus::utils::logging::init("debug");
    let (hub, connections) = LocalHub::new();
    let broker = Arc::new(
        Broker::from_settings(&settings(), hub.clone(), hub.clone())
            .unwrap()
            .with_message_interceptor(AuditGuard),
    );
    tokio::spawn(serve(broker.clone(), hub.clone(), connections));
    (broker, hub)
}

fn client(hub: &LocalHub, app: &str) -> AppClient {
    AppClient::connect(hub.connect(app).unwrap(), WAIT)
}

#[tokio::test]
async fn messages_of_one_publisher_arrive_in_order() {
    let (_broker, hub) = start();
    let contacts = client(&hub, "contacts");
    let inbox = client(&hub, "inbox");

    let mut updates = inbox.subscribe("contacts/:id/updated").await.unwrap();
    for n in 0..20 {
        contacts
            .publish(TopicMessage::new(format!("contacts/{n}/updated")).with_body(n))
            .await
            .unwrap();
    }

    for n in 0..20 {
        let message = timeout(WAIT, updates.next()).await.unwrap().unwrap();
        assert_eq!(message.params["id"], n.to_string());
        assert_eq!(message.body, Some(json!(n)));
    }
}

#[tokio::test]
async fn interceptor_guards_topics_for_the_host() {
    let (_broker, hub) = start();
    let host = AppClient::connect(hub.connect_host("host").unwrap(), WAIT);
    let inbox = client(&hub, "inbox");

    let mut audit = host.subscribe("audit/:event").await.unwrap();
    let err = inbox
        .publish(TopicMessage::new("audit/login").with_body("forged"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "audit topics are reserved for the host");

    host.publish(TopicMessage::new("audit/login").with_body("real"))
        .await
        .unwrap();
    let message = timeout(WAIT, audit.next()).await.unwrap().unwrap();
    assert_eq!(message.body, Some(json!("real")));
}

#[tokio::test]
async fn intent_request_collects_replies_of_every_provider() {
    let (_broker, hub) = start();
    let contacts = client(&hub, "contacts");
    let crm = client(&hub, "crm");
    let inbox = client(&hub, "inbox");

    let mut contact_intents = contacts
        .observe_intents(IntentSelector::of_type("view"))
        .await
        .unwrap();
    let mut crm_intents = crm.observe_intents(IntentSelector::all()).await.unwrap();

    let intent = Intent::new("view").with_qualifier(Qualifier::from([
        ("entity", "contact"),
        ("id", "42"),
    ]));
    // inbox holds no intention
    let err = inbox
        .issue_intent(intent.clone(), None, Headers::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotQualifiedError");

    let mut replies = crm
        .request_intent(intent, None, Headers::new())
        .await
        .unwrap();

    let to_contacts = timeout(WAIT, contact_intents.next()).await.unwrap().unwrap();
    contacts
        .reply_intent(&to_contacts, "opened in contacts", ReplyStatus::Ok)
        .await
        .unwrap();
    let to_crm = timeout(WAIT, crm_intents.next()).await.unwrap().unwrap();
    assert_eq!(to_crm.capability.app_symbolic_name, "crm");
    crm.reply_intent(&to_crm, "opened in crm", ReplyStatus::Ok)
        .await
        .unwrap();

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let reply = timeout(WAIT, replies.next()).await.unwrap().unwrap().unwrap();
        bodies.push(reply.body.unwrap());
    }
    bodies.sort_by_key(|b| b.to_string());
    assert_eq!(bodies, vec![json!("opened in contacts"), json!("opened in crm")]);
}

#[tokio::test]
async fn disconnect_removes_runtime_registrations() {
    let (broker, hub) = start();
    let inbox = client(&hub, "inbox");
    let crm = client(&hub, "crm");

    let id = inbox
        .register_capability(CapabilityDecl::new("compose").public())
        .await
        .unwrap();
    let alerts = inbox.subscribe("alerts").await.unwrap();
    assert_eq!(crm.count_subscribers("alerts").await.unwrap(), 1);
    assert_eq!(
        broker
            .lookup_capabilities("inbox", &ManifestObjectFilter::by_id(id.clone()))
            .unwrap()
            .len(),
        1
    );

    drop(alerts);
    drop(inbox);
    for _ in 0..100 {
        if hub.peer_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(crm.count_subscribers("alerts").await.unwrap(), 0);
    assert!(
        broker
            .lookup_capabilities("inbox", &ManifestObjectFilter::by_id(id))
            .unwrap()
            .is_empty()
    );
}
