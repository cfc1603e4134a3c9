use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::time::timeout;

use super::AppClient;
use crate::broker::Broker;
use crate::broker::message::{Headers, Intent, IntentSelector, ReplyStatus, TopicMessage};
use crate::config::Settings;
use crate::manifest::{
    ApplicationManifest, CapabilityDecl, IntentionDecl, ManifestObjectFilter, Qualifier,
};
use crate::transport::{LocalHub, serve};
use crate::utils::error::RouteError;

const WAIT: Duration = Duration::from_secs(2);

struct Bus {
    broker: Arc<Broker>,
    hub: Arc<LocalHub>,
}

impl Bus {
    fn start() -> Self {
        let (hub, connections) = LocalHub::new();
        let settings = Settings {
            applications: vec![
                ApplicationManifest::new("weather").with_capability(
                    CapabilityDecl::new("forecast")
                        .with_qualifier(Qualifier::from([("city", "*")]))
                        .public(),
                ),
                ApplicationManifest::new("planner")
                    .with_intention(IntentionDecl::new("forecast").with_qualifier(Qualifier::any())),
            ],
            ..Settings::default()
        };
        let broker = Arc::new(Broker::from_settings(&settings, hub.clone(), hub.clone()).unwrap());
        tokio::spawn(serve(broker.clone(), hub.clone(), connections));
        Self { broker, hub }
    }

    fn client(&self, app: &str) -> AppClient {
        self.client_with_timeout(app, WAIT)
    }

    fn client_with_timeout(&self, app: &str, request_timeout: Duration) -> AppClient {
        AppClient::connect(self.hub.connect(app).unwrap(), request_timeout)
    }
}

#[tokio::test]
async fn test_publish_and_subscribe() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client("planner");

    let mut readings = planner.subscribe("cities/:city/temperature").await.unwrap();
    weather
        .publish(TopicMessage::new("cities/oslo/temperature").with_body(-3))
        .await
        .unwrap();

    let message = timeout(WAIT, readings.next()).await.unwrap().unwrap();
    assert_eq!(message.params["city"], "oslo");
    assert_eq!(message.body, Some(json!(-3)));
    assert_eq!(message.sender(), Some("weather"));
}

#[tokio::test]
async fn test_retained_message_arrives_on_subscribe() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    weather
        .publish(TopicMessage::new("status").with_body("sunny").retained())
        .await
        .unwrap();

    let planner = bus.client("planner");
    let mut status = planner.subscribe("status").await.unwrap();
    let message = timeout(WAIT, status.next()).await.unwrap().unwrap();
    assert_eq!(message.body, Some(json!("sunny")));
}

#[tokio::test]
async fn test_topic_format_error_is_raised_locally() {
    let bus = Bus::start();
    let planner = bus.client("planner");

    let err = planner
        .publish(TopicMessage::new("cities/:city"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouteError::TopicFormat(_)));
    assert!(matches!(
        planner.subscribe("").await,
        Err(RouteError::TopicFormat(_))
    ));
    assert!(matches!(
        planner.count_subscribers("a/:b").await,
        Err(RouteError::TopicFormat(_))
    ));
}

#[tokio::test]
async fn test_request_one_gets_first_reply() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client("planner");

    let mut requests = weather.subscribe("forecast/:city").await.unwrap();
    let replier = tokio::spawn(async move {
        let request = requests.next().await.unwrap();
        let city = request.params["city"].clone();
        weather
            .reply(&request, json!(format!("rain in {city}")), ReplyStatus::Terminal)
            .await
            .unwrap();
    });

    let reply = planner
        .request_one(TopicMessage::new("forecast/bergen"))
        .await
        .unwrap();
    assert_eq!(reply.body, Some(json!("rain in bergen")));
    assert_eq!(reply.sender(), Some("weather"));
    replier.await.unwrap();
}

#[tokio::test]
async fn test_request_without_replier_fails() {
    let bus = Bus::start();
    let planner = bus.client("planner");
    let err = planner
        .request(TopicMessage::new("forecast/nowhere"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouteError::RequestReply(_)));
}

#[tokio::test]
async fn test_request_one_times_out_on_silent_replier() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client_with_timeout("planner", Duration::from_millis(100));

    let _requests = weather.subscribe("forecast/:city").await.unwrap();
    let err = planner
        .request_one(TopicMessage::new("forecast/oslo"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouteError::Timeout(_)));
    assert!(err.to_string().starts_with("[TimeoutError]"));
}

#[tokio::test]
async fn test_reply_stream_ends_on_terminal_and_error() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client("planner");
    let mut requests = weather.subscribe("forecast/:city").await.unwrap();

    let mut replies = planner
        .request(TopicMessage::new("forecast/oslo"))
        .await
        .unwrap();
    let request = timeout(WAIT, requests.next()).await.unwrap().unwrap();
    weather.reply(&request, "cloudy", ReplyStatus::Ok).await.unwrap();
    weather.reply(&request, "clear", ReplyStatus::Terminal).await.unwrap();

    let first = timeout(WAIT, replies.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.body, Some(json!("cloudy")));
    let last = timeout(WAIT, replies.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(last.body, Some(json!("clear")));
    assert!(replies.next().await.is_none());

    let mut replies = planner
        .request(TopicMessage::new("forecast/oslo"))
        .await
        .unwrap();
    let request = timeout(WAIT, requests.next()).await.unwrap().unwrap();
    weather
        .reply(&request, "station offline", ReplyStatus::Error)
        .await
        .unwrap();
    let err = timeout(WAIT, replies.next()).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err, RouteError::Reply("station offline".into()));
    assert!(replies.next().await.is_none());
}

#[tokio::test]
async fn test_reply_requires_reply_topic() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let err = weather
        .reply(&TopicMessage::new("plain"), "x", ReplyStatus::Ok)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ProtocolError");
}

#[tokio::test]
async fn test_dropping_stream_unsubscribes() {
    let bus = Bus::start();
    let planner = bus.client("planner");
    let stream = planner.subscribe("alerts").await.unwrap();
    assert_eq!(planner.count_subscribers("alerts").await.unwrap(), 1);

    drop(stream);
    // the unsubscribe frame is sent ahead of the next command
    assert_eq!(planner.count_subscribers("alerts").await.unwrap(), 0);
}

#[tokio::test]
async fn test_intent_request_round_trip() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client("planner");

    let mut intents = weather
        .observe_intents(IntentSelector::of_type("forecast"))
        .await
        .unwrap();
    let intent =
        Intent::new("forecast").with_qualifier(Qualifier::from([("city", "tromso")]));
    let mut replies = planner
        .request_intent(intent, Some(json!({"days": 3})), Headers::new())
        .await
        .unwrap();

    let received = timeout(WAIT, intents.next()).await.unwrap().unwrap();
    assert_eq!(received.capability.app_symbolic_name, "weather");
    assert_eq!(received.sender(), Some("planner"));
    assert_eq!(received.body, Some(json!({"days": 3})));
    weather
        .reply_intent(&received, "snow", ReplyStatus::Terminal)
        .await
        .unwrap();

    let reply = timeout(WAIT, replies.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.body, Some(json!("snow")));
}

#[tokio::test]
async fn test_intent_errors_reach_the_issuer() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client("planner");

    let err = weather
        .issue_intent(Intent::new("book"), None, Headers::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotQualifiedError");

    planner
        .register_intention(IntentionDecl::new("book"))
        .await
        .unwrap();
    let err = planner
        .issue_intent(Intent::new("book"), None, Headers::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NullProviderError");
}

#[tokio::test]
async fn test_capability_registration_and_observation() {
    let bus = Bus::start();
    let weather = bus.client("weather");
    let planner = bus.client("planner");

    let mut snapshots = planner
        .observe_capabilities(ManifestObjectFilter::by_type("forecast"))
        .await
        .unwrap();
    let initial = timeout(WAIT, snapshots.next()).await.unwrap().unwrap();
    assert_eq!(initial.len(), 1);

    let id = weather
        .register_capability(
            CapabilityDecl::new("forecast")
                .with_qualifier(Qualifier::from([("region", "*")]))
                .public(),
        )
        .await
        .unwrap();
    let updated = timeout(WAIT, snapshots.next()).await.unwrap().unwrap();
    assert_eq!(updated.len(), 2);

    let found = planner
        .lookup_capabilities(ManifestObjectFilter::by_id(id.clone()))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].app_symbolic_name, "weather");

    weather
        .unregister_capabilities(ManifestObjectFilter::by_id(id))
        .await
        .unwrap();
    let after = timeout(WAIT, snapshots.next()).await.unwrap().unwrap();
    assert_eq!(after.len(), 1);
}

#[tokio::test]
async fn test_intention_lookup_and_unregister() {
    let bus = Bus::start();
    let planner = bus.client("planner");

    planner
        .register_intention(IntentionDecl::new("print"))
        .await
        .unwrap();
    let mut snapshots = planner
        .observe_intentions(ManifestObjectFilter::by_type("print"))
        .await
        .unwrap();
    assert_eq!(timeout(WAIT, snapshots.next()).await.unwrap().unwrap().len(), 1);

    planner
        .unregister_intentions(ManifestObjectFilter::by_type("print"))
        .await
        .unwrap();
    assert!(timeout(WAIT, snapshots.next()).await.unwrap().unwrap().is_empty());
    let found = planner
        .lookup_intentions(ManifestObjectFilter::by_type("forecast"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_unregistered_application_cannot_talk() {
    let bus = Bus::start();
    let stranger = bus.client("stranger");
    let err = stranger
        .publish(TopicMessage::new("hello"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RouteError::Transport(_) | RouteError::Timeout(_)
    ));
    assert_eq!(bus.broker.count_subscribers("hello").unwrap(), 0);
}
