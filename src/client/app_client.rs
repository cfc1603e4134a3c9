//! Application-side API
//!
//! `AppClient` speaks the wire protocol over a [`PeerLink`]. Every command
//! is sent with a fresh `request_id` and awaits the broker's `ack` or
//! `error` frame for that id, bounded by the configured request timeout.
//!
//! A background reader task routes inbound frames:
//! - `ack` / `error` frames complete the pending command with the same id
//! - deliveries go to the stream registered under their `subscription_id`
//!
//! Streams are registered before their command is sent, so retained
//! messages and initial snapshots that arrive ahead of the `ack` are kept.
//! Topics are validated here; malformed ones never reach the broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::streams::{IntentStream, MessageStream, ReplyStream, Route, SnapshotStream};
use crate::broker::message::{
    HEADER_STATUS, Headers, Intent, IntentMessage, IntentSelector, ReplyStatus, TopicMessage,
};
use crate::broker::topic::{PublishedTopic, TopicMatcher};
use crate::manifest::{
    Capability, CapabilityDecl, Intention, IntentionDecl, ManifestObjectFilter,
};
use crate::transport::local::PeerLink;
use crate::transport::message::{Ack, ClientMessage, ServerMessage};
use crate::transport::PeerId;
use crate::utils::error::{Result, RouteError};

type Pending = HashMap<String, oneshot::Sender<Result<Ack>>>;

pub(crate) struct ClientInner {
    peer: PeerId,
    outbound: UnboundedSender<Vec<u8>>,
    /// `None` once the link to the broker is gone.
    pending: Mutex<Option<Pending>>,
    routes: Mutex<HashMap<String, UnboundedSender<ServerMessage>>>,
}

impl ClientInner {
    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, UnboundedSender<ServerMessage>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_route(self: &Arc<Self>) -> Route {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes().insert(id.clone(), sender);
        Route::new(id, receiver, self.clone())
    }

    /// Forgets a route and tells the broker, without waiting for the answer.
    pub(crate) fn close_route(&self, subscription_id: &str) {
        if self.routes().remove(subscription_id).is_none() {
            return;
        }
        let command = ClientMessage::Unsubscribe {
            request_id: Uuid::new_v4().to_string(),
            subscription_id: subscription_id.to_string(),
        };
        if let Ok(frame) = serde_json::to_vec(&command) {
            // the broker may already be gone; its side is cleaned up then
            let _ = self.outbound.send(frame);
        }
    }

    fn dispatch(&self, message: ServerMessage) {
        let subscription_id = match message {
            ServerMessage::Ack { request_id, ack } => return self.complete(&request_id, Ok(ack)),
            ServerMessage::Error { request_id, error } => {
                return self.complete(&request_id, Err(error));
            }
            _ => match message.subscription_id() {
                Some(id) => id.to_string(),
                None => return,
            },
        };

        let mut routes = self.routes();
        let delivered = routes
            .get(&subscription_id)
            .is_some_and(|route| route.send(message).is_ok());
        if !delivered {
            debug!("No receiver for delivery to {subscription_id}");
            routes.remove(&subscription_id);
        }
    }

    fn complete(&self, request_id: &str, outcome: Result<Ack>) {
        let waiter = self
            .pending()
            .as_mut()
            .and_then(|pending| pending.remove(request_id));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(outcome);
            }
            None => debug!("Answer to {request_id} arrived without a waiter"),
        }
    }

    fn shut_down(&self) {
        self.pending().take();
        self.routes().clear();
    }
}

/// Connection of one application to the broker.
pub struct AppClient {
    inner: Arc<ClientInner>,
    app_symbolic_name: String,
    request_timeout: Duration,
}

impl AppClient {
    /// Starts the client over `link`. Must be called within a tokio runtime.
    pub fn connect(link: PeerLink, request_timeout: Duration) -> Self {
        let PeerLink {
            peer,
            app_symbolic_name,
            outbound,
            inbound,
        } = link;

        let inner = Arc::new(ClientInner {
            peer,
            outbound,
            pending: Mutex::new(Some(HashMap::new())),
            routes: Mutex::new(HashMap::new()),
        });
        tokio::spawn(read_frames(Arc::downgrade(&inner), inbound));

        Self {
            inner,
            app_symbolic_name,
            request_timeout,
        }
    }

    pub fn app_symbolic_name(&self) -> &str {
        &self.app_symbolic_name
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    // --- topic messaging ---

    pub async fn publish(&self, message: TopicMessage) -> Result<()> {
        PublishedTopic::parse(&message.topic)?;
        let ack = self
            .command(|request_id| ClientMessage::Publish {
                request_id,
                message,
            })
            .await?;
        expect_done(ack)
    }

    /// Subscribes to `pattern`; retained messages on matching topics arrive first.
    pub async fn subscribe(&self, pattern: &str) -> Result<MessageStream> {
        TopicMatcher::new(pattern)?;
        let route = self.inner.open_route();
        let ack = self
            .command(|request_id| ClientMessage::Subscribe {
                request_id,
                subscription_id: route.id().to_string(),
                topic: pattern.to_string(),
            })
            .await?;
        expect_done(ack)?;
        Ok(MessageStream::new(route))
    }

    /// Sends a request; every reply published to its reply topic arrives on
    /// the returned stream.
    pub async fn request(&self, message: TopicMessage) -> Result<ReplyStream> {
        PublishedTopic::parse(&message.topic)?;
        let route = self.inner.open_route();
        let ack = self
            .command(|request_id| ClientMessage::Request {
                request_id,
                reply_subscription_id: route.id().to_string(),
                message,
            })
            .await?;
        let reply_topic = expect_reply_topic(ack)?;
        Ok(ReplyStream::new(route, reply_topic))
    }

    /// Sends a request and waits for its first reply.
    pub async fn request_one(&self, message: TopicMessage) -> Result<TopicMessage> {
        let topic = message.topic.clone();
        let mut replies = self.request(message).await?;
        first_reply(&mut replies, self.request_timeout, &topic).await
    }

    /// Answers a request received through [`subscribe`](Self::subscribe).
    pub async fn reply(
        &self,
        request: &TopicMessage,
        body: impl Into<Value>,
        status: ReplyStatus,
    ) -> Result<()> {
        self.reply_to(request.reply_to.as_deref(), body.into(), status)
            .await
    }

    /// Answers an intent received through [`observe_intents`](Self::observe_intents).
    pub async fn reply_intent(
        &self,
        intent: &IntentMessage,
        body: impl Into<Value>,
        status: ReplyStatus,
    ) -> Result<()> {
        self.reply_to(intent.reply_to.as_deref(), body.into(), status)
            .await
    }

    async fn reply_to(&self, reply_to: Option<&str>, body: Value, status: ReplyStatus) -> Result<()> {
        let reply_to = reply_to
            .ok_or_else(|| RouteError::protocol("the message does not expect a reply"))?;
        self.publish(
            TopicMessage::new(reply_to)
                .with_body(body)
                .with_header(HEADER_STATUS, status.as_str()),
        )
        .await
    }

    pub async fn count_subscribers(&self, topic: &str) -> Result<usize> {
        PublishedTopic::parse(topic)?;
        let ack = self
            .command(|request_id| ClientMessage::CountSubscribers {
                request_id,
                topic: topic.to_string(),
            })
            .await?;
        match ack {
            Ack::Count(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    // --- intents ---

    pub async fn issue_intent(
        &self,
        intent: Intent,
        body: Option<Value>,
        headers: Headers,
    ) -> Result<()> {
        let ack = self
            .command(|request_id| ClientMessage::IssueIntent {
                request_id,
                intent,
                body,
                headers,
                reply_subscription_id: None,
            })
            .await?;
        expect_done(ack)
    }

    /// Issues an intent; replies of every provider arrive on the returned stream.
    pub async fn request_intent(
        &self,
        intent: Intent,
        body: Option<Value>,
        headers: Headers,
    ) -> Result<ReplyStream> {
        let route = self.inner.open_route();
        let ack = self
            .command(|request_id| ClientMessage::IssueIntent {
                request_id,
                intent,
                body,
                headers,
                reply_subscription_id: Some(route.id().to_string()),
            })
            .await?;
        let reply_topic = expect_reply_topic(ack)?;
        Ok(ReplyStream::new(route, reply_topic))
    }

    /// Receives intents that resolved to this application's capabilities.
    pub async fn observe_intents(&self, selector: IntentSelector) -> Result<IntentStream> {
        let route = self.inner.open_route();
        let ack = self
            .command(|request_id| ClientMessage::ObserveIntents {
                request_id,
                subscription_id: route.id().to_string(),
                selector,
            })
            .await?;
        expect_done(ack)?;
        Ok(IntentStream::new(route))
    }

    // --- manifest ---

    pub async fn register_capability(&self, capability: CapabilityDecl) -> Result<String> {
        let ack = self
            .command(|request_id| ClientMessage::RegisterCapability {
                request_id,
                capability,
            })
            .await?;
        expect_id(ack)
    }

    pub async fn unregister_capabilities(&self, filter: ManifestObjectFilter) -> Result<()> {
        let ack = self
            .command(|request_id| ClientMessage::UnregisterCapabilities { request_id, filter })
            .await?;
        expect_done(ack)
    }

    pub async fn lookup_capabilities(&self, filter: ManifestObjectFilter) -> Result<Vec<Capability>> {
        let ack = self
            .command(|request_id| ClientMessage::LookupCapabilities { request_id, filter })
            .await?;
        match ack {
            Ack::Capabilities(capabilities) => Ok(capabilities),
            other => Err(unexpected(other)),
        }
    }

    /// Emits the matching capabilities now and after every registry change.
    pub async fn observe_capabilities(
        &self,
        filter: ManifestObjectFilter,
    ) -> Result<SnapshotStream<Capability>> {
        let route = self.inner.open_route();
        let ack = self
            .command(|request_id| ClientMessage::ObserveCapabilities {
                request_id,
                subscription_id: route.id().to_string(),
                filter,
            })
            .await?;
        expect_done(ack)?;
        Ok(SnapshotStream::new(route, |frame| match frame {
            ServerMessage::Capabilities { capabilities, .. } => Some(capabilities),
            _ => None,
        }))
    }

    pub async fn register_intention(&self, intention: IntentionDecl) -> Result<String> {
        let ack = self
            .command(|request_id| ClientMessage::RegisterIntention {
                request_id,
                intention,
            })
            .await?;
        expect_id(ack)
    }

    pub async fn unregister_intentions(&self, filter: ManifestObjectFilter) -> Result<()> {
        let ack = self
            .command(|request_id| ClientMessage::UnregisterIntentions { request_id, filter })
            .await?;
        expect_done(ack)
    }

    pub async fn lookup_intentions(&self, filter: ManifestObjectFilter) -> Result<Vec<Intention>> {
        let ack = self
            .command(|request_id| ClientMessage::LookupIntentions { request_id, filter })
            .await?;
        match ack {
            Ack::Intentions(intentions) => Ok(intentions),
            other => Err(unexpected(other)),
        }
    }

    pub async fn observe_intentions(
        &self,
        filter: ManifestObjectFilter,
    ) -> Result<SnapshotStream<Intention>> {
        let route = self.inner.open_route();
        let ack = self
            .command(|request_id| ClientMessage::ObserveIntentions {
                request_id,
                subscription_id: route.id().to_string(),
                filter,
            })
            .await?;
        expect_done(ack)?;
        Ok(SnapshotStream::new(route, |frame| match frame {
            ServerMessage::Intentions { intentions, .. } => Some(intentions),
            _ => None,
        }))
    }

    /// Sends one command and waits for the broker's answer.
    async fn command(&self, build: impl FnOnce(String) -> ClientMessage) -> Result<Ack> {
        let request_id = Uuid::new_v4().to_string();
        let frame = serde_json::to_vec(&build(request_id.clone()))?;

        let (waiter, answer) = oneshot::channel();
        match self.inner.pending().as_mut() {
            Some(pending) => {
                pending.insert(request_id.clone(), waiter);
            }
            None => return Err(RouteError::transport("the broker connection is closed")),
        }

        if self.inner.outbound.send(frame).is_err() {
            self.forget(&request_id);
            return Err(RouteError::transport("the broker connection is closed"));
        }

        match timeout(self.request_timeout, answer).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RouteError::transport(
                "the broker connection closed before answering",
            )),
            Err(_) => {
                self.forget(&request_id);
                Err(RouteError::timeout(format!(
                    "no answer from the broker within {} ms",
                    self.request_timeout.as_millis()
                )))
            }
        }
    }

    fn forget(&self, request_id: &str) {
        if let Some(pending) = self.inner.pending().as_mut() {
            pending.remove(request_id);
        }
    }
}

impl std::fmt::Debug for AppClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppClient")
            .field("app_symbolic_name", &self.app_symbolic_name)
            .field("peer", &self.inner.peer)
            .finish()
    }
}

async fn read_frames(inner: Weak<ClientInner>, mut inbound: UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match serde_json::from_slice::<ServerMessage>(&frame) {
            Ok(message) => inner.dispatch(message),
            Err(e) => warn!("Invalid frame for {}: {e}", inner.peer),
        }
    }

    if let Some(inner) = inner.upgrade() {
        debug!("Broker link of {} closed", inner.peer);
        inner.shut_down();
    }
}

async fn first_reply(
    replies: &mut ReplyStream,
    deadline: Duration,
    topic: &str,
) -> Result<TopicMessage> {
    match timeout(deadline, replies.next()).await {
        Ok(Some(reply)) => reply,
        Ok(None) => Err(RouteError::transport(format!(
            "reply stream for '{topic}' ended without a reply"
        ))),
        Err(_) => Err(RouteError::timeout(format!(
            "no reply to '{topic}' within {} ms",
            deadline.as_millis()
        ))),
    }
}

fn expect_done(ack: Ack) -> Result<()> {
    match ack {
        Ack::Done => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn expect_id(ack: Ack) -> Result<String> {
    match ack {
        Ack::Id(id) => Ok(id),
        other => Err(unexpected(other)),
    }
}

fn expect_reply_topic(ack: Ack) -> Result<String> {
    match ack {
        Ack::ReplyTopic(topic) => Ok(topic),
        other => Err(unexpected(other)),
    }
}

fn unexpected(ack: Ack) -> RouteError {
    RouteError::protocol(format!("unexpected acknowledgement {ack:?}"))
}
