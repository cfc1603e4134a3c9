//! Broker engine
//!
//! This module contains the broker responsible for:
//! - tracking connected peers and the application behind each of them
//! - topic subscriptions, publish fan-out and retained messages
//! - request/reply correlation through generated reply topics
//! - the manifest operations applications perform over the transport
//! - decoding inbound frames and answering them (`handle_frame`)
//!
//! Concurrency and usage notes:
//! - All mutable state (registry, subscription tables, retained store, peers)
//!   lives behind one mutex. Resolution and delivery of a message happen in a
//!   single critical section, so a message reaches exactly the subscriptions
//!   present at that instant, and deliveries to a peer leave in publish order.
//! - Interceptors run outside the lock; the lock is never held across an
//!   `.await`.
//! - Deliveries are fire-and-forget: a failing peer is logged, never reported
//!   back to the publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::interceptor::{Interceptor, InterceptorChain};
use super::message::{HEADER_APP_SYMBOLIC_NAME, IntentMessage, IntentSelector, TopicMessage};
use super::retained::RetainedStore;
use super::subscriptions::{Subscription, SubscriptionId, SubscriptionTable};
use super::topic::{PublishedTopic, TopicMatcher};
use crate::config::{BrokerSettings, Settings};
use crate::manifest::{
    ApplicationManifest, Capability, CapabilityDecl, Intention, IntentionDecl, ManifestObjectFilter,
    ManifestRegistry, ObserverId,
};
use crate::transport::message::{Ack, ClientMessage, ServerMessage};
use crate::transport::{Identity, Origin, PeerId, Transport, send_frame};
use crate::utils::error::{Result, RouteError};

#[derive(Default)]
pub(crate) struct BrokerState {
    pub(crate) registry: ManifestRegistry,
    pub(crate) topic_subscriptions: SubscriptionTable<TopicMatcher>,
    pub(crate) intent_subscriptions: SubscriptionTable<IntentSelector>,
    pub(crate) retained: RetainedStore,
    /// Connected peers and the application behind each.
    pub(crate) peers: HashMap<PeerId, String>,
    /// Registry observations opened over the transport, by peer and
    /// subscription id.
    observations: HashMap<(PeerId, SubscriptionId), ObserverId>,
}

pub struct Broker {
    state: Mutex<BrokerState>,
    pub(crate) message_interceptors: InterceptorChain<TopicMessage>,
    pub(crate) intent_interceptors: InterceptorChain<IntentMessage>,
    pub(crate) transport: Arc<dyn Transport>,
    identity: Arc<dyn Identity>,
    settings: BrokerSettings,
}

impl Broker {
    pub fn new(
        settings: BrokerSettings,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            message_interceptors: InterceptorChain::new(),
            intent_interceptors: InterceptorChain::new(),
            transport,
            identity,
            settings,
        }
    }

    /// Creates a broker with the host application and every configured
    /// application registered.
    pub fn from_settings(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn Identity>,
    ) -> Result<Self> {
        let broker = Self::new(settings.broker.clone(), transport, identity);
        broker.register_application(&host_manifest(&settings.broker.host_app_symbolic_name))?;
        for manifest in &settings.applications {
            broker.register_application(manifest)?;
        }
        Ok(broker)
    }

    /// Appends an interceptor for topic messages. Interceptors run in the
    /// order they were added.
    pub fn with_message_interceptor(
        mut self,
        interceptor: impl Interceptor<TopicMessage> + 'static,
    ) -> Self {
        self.message_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_intent_interceptor(
        mut self,
        interceptor: impl Interceptor<IntentMessage> + 'static,
    ) -> Self {
        self.intent_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn register_application(&self, manifest: &ApplicationManifest) -> Result<()> {
        self.lock().registry.register_application(manifest)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- peers ---

    /// Records a peer connection and returns the application behind it.
    pub fn connect(&self, peer: &str) -> Result<String> {
        let mut state = self.lock();
        let app = self.peer_app(&mut state, peer)?;
        info!("Peer {peer} connected as '{app}'");
        Ok(app)
    }

    /// Forgets a peer: drops its subscriptions and observations and, if it
    /// was the application's last peer, everything the application
    /// registered at runtime. Happens atomically for concurrent lookups.
    pub fn disconnect(&self, peer: &str) {
        let mut state = self.lock();
        let BrokerState {
            registry,
            topic_subscriptions,
            intent_subscriptions,
            peers,
            observations,
            ..
        } = &mut *state;

        let Some(app) = peers.remove(peer) else {
            debug!("Disconnect of unknown peer {peer} ignored");
            return;
        };

        topic_subscriptions.remove_all_for_peer(peer);
        intent_subscriptions.remove_all_for_peer(peer);
        observations.retain(|(owner, _), observer| {
            if owner.as_str() == peer {
                registry.cancel_observer(observer.as_str());
                false
            } else {
                true
            }
        });

        if !peers.values().any(|other| *other == app) {
            registry.remove_all_for_app(&app);
        }
        info!("Peer {peer} of '{app}' disconnected");
    }

    /// Application behind `peer`, resolving and recording it on first use.
    pub(crate) fn peer_app(&self, state: &mut BrokerState, peer: &str) -> Result<String> {
        if let Some(app) = state.peers.get(peer) {
            return Ok(app.clone());
        }

        let Origin {
            app_symbolic_name,
            is_platform_host,
        } = self
            .identity
            .resolve_origin(peer)
            .ok_or_else(|| RouteError::not_qualified(format!("origin of peer {peer} is unknown")))?;

        if is_platform_host && !state.registry.is_registered(&app_symbolic_name) {
            state
                .registry
                .register_application(&host_manifest(&app_symbolic_name))?;
        }
        state.registry.application(&app_symbolic_name)?;
        state
            .peers
            .insert(peer.to_string(), app_symbolic_name.clone());
        Ok(app_symbolic_name)
    }

    // --- topic messaging ---

    /// Publishes a message on behalf of `app` to every matching subscription.
    pub async fn publish(&self, app: &str, mut message: TopicMessage) -> Result<()> {
        PublishedTopic::parse(&message.topic)?;
        self.lock().registry.application(app)?;
        stamp(app, &mut message);
        message.reply_to = None;

        let deliver = |message: TopicMessage| self.deliver_topic_message(message);
        self.message_interceptors.run(message, &deliver).await
    }

    /// Sends a request and subscribes `peer` to its replies under
    /// `reply_subscription_id`. Returns the generated reply topic.
    ///
    /// Fails with `RequestReplyError` before any interceptor runs if no
    /// subscription matches the request topic.
    pub async fn request(
        &self,
        peer: &str,
        reply_subscription_id: &str,
        mut message: TopicMessage,
    ) -> Result<String> {
        let topic = PublishedTopic::parse(&message.topic)?;
        let reply_topic = {
            let mut state = self.lock();
            let app = self.peer_app(&mut state, peer)?;
            if state.topic_subscriptions.count_matching(&topic) == 0 {
                return Err(RouteError::request_reply(format!(
                    "no subscriber on topic '{}' to reply to the request",
                    topic.as_str()
                )));
            }
            let reply_topic = self.subscribe_reply_topic(&mut state, peer, &app, reply_subscription_id)?;
            stamp(&app, &mut message);
            reply_topic
        };
        message.reply_to = Some(reply_topic.clone());
        message.retain = false;

        let deliver = |message: TopicMessage| self.deliver_topic_message(message);
        match self.message_interceptors.run(message, &deliver).await {
            Ok(()) => Ok(reply_topic),
            Err(e) => {
                self.lock()
                    .topic_subscriptions
                    .remove(peer, reply_subscription_id);
                Err(e)
            }
        }
    }

    /// Subscribes `peer` to `pattern`. Retained messages on matching topics
    /// are delivered before this returns.
    pub fn subscribe(&self, peer: &str, subscription_id: &str, pattern: &str) -> Result<()> {
        let matcher = TopicMatcher::new(pattern)?;
        let mut state = self.lock();
        let app = self.peer_app(&mut state, peer)?;

        for (retained, params) in state.retained.matching(&matcher) {
            let mut message = retained.clone();
            message.params = params;
            send_frame(
                self.transport.as_ref(),
                peer,
                &ServerMessage::Message {
                    subscription_id: subscription_id.to_string(),
                    message,
                },
            );
        }

        state.topic_subscriptions.add(Subscription {
            id: subscription_id.to_string(),
            peer: peer.to_string(),
            app_symbolic_name: app.clone(),
            selector: matcher,
        });
        debug!("'{app}' ({peer}) subscribed to '{pattern}' as {subscription_id}");
        Ok(())
    }

    /// Ends a topic or intent subscription, or a registry observation, of `peer`.
    pub fn unsubscribe(&self, peer: &str, subscription_id: &str) -> bool {
        let mut state = self.lock();
        let BrokerState {
            registry,
            topic_subscriptions,
            intent_subscriptions,
            observations,
            ..
        } = &mut *state;

        if topic_subscriptions.remove(peer, subscription_id).is_some()
            || intent_subscriptions.remove(peer, subscription_id).is_some()
        {
            return true;
        }
        let key = (peer.to_string(), subscription_id.to_string());
        match observations.remove(&key) {
            Some(observer) => {
                registry.cancel_observer(&observer);
                true
            }
            None => false,
        }
    }

    /// Number of subscriptions a publish to `topic` would reach right now.
    pub fn count_subscribers(&self, topic: &str) -> Result<usize> {
        let topic = PublishedTopic::parse(topic)?;
        Ok(self.lock().topic_subscriptions.count_matching(&topic))
    }

    /// The message currently retained on `topic`, if any.
    pub fn retained_message(&self, topic: &str) -> Option<TopicMessage> {
        self.lock().retained.get(topic).cloned()
    }

    pub(crate) fn subscribe_reply_topic(
        &self,
        state: &mut BrokerState,
        peer: &str,
        app: &str,
        subscription_id: &str,
    ) -> Result<String> {
        let reply_topic = format!("{}/{}", self.settings.reply_topic_prefix, Uuid::new_v4());
        state.topic_subscriptions.add(Subscription {
            id: subscription_id.to_string(),
            peer: peer.to_string(),
            app_symbolic_name: app.to_string(),
            selector: TopicMatcher::new(&reply_topic)?,
        });
        Ok(reply_topic)
    }

    fn deliver_topic_message(&self, message: TopicMessage) -> Result<()> {
        // an interceptor may have rewritten the topic
        let topic = PublishedTopic::parse(&message.topic)?;
        let mut state = self.lock();
        state.retained.apply(&topic, &message);

        let targets = state.topic_subscriptions.find_matching(&topic);
        debug!(
            "Delivering {} on '{}' to {} subscribers",
            message.message_id,
            topic.as_str(),
            targets.len()
        );
        for (subscription, params) in targets {
            let mut delivery = message.clone();
            delivery.params = params;
            send_frame(
                self.transport.as_ref(),
                &subscription.peer,
                &ServerMessage::Message {
                    subscription_id: subscription.id.clone(),
                    message: delivery,
                },
            );
        }
        Ok(())
    }

    // --- manifest ---

    pub fn register_capability(&self, app: &str, capability: CapabilityDecl) -> Result<String> {
        self.lock().registry.register_capability(app, capability)
    }

    pub fn unregister_capabilities(&self, app: &str, filter: &ManifestObjectFilter) -> Result<usize> {
        self.lock().registry.unregister_capabilities(app, filter)
    }

    pub fn lookup_capabilities(
        &self,
        app: &str,
        filter: &ManifestObjectFilter,
    ) -> Result<Vec<Capability>> {
        self.lock().registry.lookup_capabilities(app, filter)
    }

    pub fn register_intention(&self, app: &str, intention: IntentionDecl) -> Result<String> {
        self.lock().registry.register_intention(app, intention)
    }

    pub fn unregister_intentions(&self, app: &str, filter: &ManifestObjectFilter) -> Result<usize> {
        self.lock().registry.unregister_intentions(app, filter)
    }

    pub fn lookup_intentions(
        &self,
        app: &str,
        filter: &ManifestObjectFilter,
    ) -> Result<Vec<Intention>> {
        self.lock().registry.lookup_intentions(app, filter)
    }

    fn observe_capabilities(
        &self,
        peer: &str,
        subscription_id: &str,
        filter: ManifestObjectFilter,
    ) -> Result<()> {
        let mut state = self.lock();
        let app = self.peer_app(&mut state, peer)?;
        let transport = self.transport.clone();
        let (target, id) = (peer.to_string(), subscription_id.to_string());
        let observer = state.registry.observe_capabilities(
            &app,
            filter,
            Box::new(move |capabilities| {
                send_frame(
                    transport.as_ref(),
                    &target,
                    &ServerMessage::Capabilities {
                        subscription_id: id.clone(),
                        capabilities,
                    },
                )
            }),
        )?;
        track_observation(&mut state, peer, subscription_id, observer);
        Ok(())
    }

    fn observe_intentions(
        &self,
        peer: &str,
        subscription_id: &str,
        filter: ManifestObjectFilter,
    ) -> Result<()> {
        let mut state = self.lock();
        let app = self.peer_app(&mut state, peer)?;
        let transport = self.transport.clone();
        let (target, id) = (peer.to_string(), subscription_id.to_string());
        let observer = state.registry.observe_intentions(
            &app,
            filter,
            Box::new(move |intentions| {
                send_frame(
                    transport.as_ref(),
                    &target,
                    &ServerMessage::Intentions {
                        subscription_id: id.clone(),
                        intentions,
                    },
                )
            }),
        )?;
        track_observation(&mut state, peer, subscription_id, observer);
        Ok(())
    }

    // --- frames ---

    /// Decodes one inbound frame from `peer`, executes it and answers with
    /// an `ack` or `error` frame.
    pub async fn handle_frame(&self, peer: &str, frame: &[u8]) {
        let command: ClientMessage = match serde_json::from_slice(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    "Invalid frame from {peer}: {e} | {}",
                    String::from_utf8_lossy(frame).chars().take(100).collect::<String>()
                );
                return;
            }
        };

        let request_id = command.request_id().to_string();
        let reply = match self.execute(peer, command).await {
            Ok(ack) => ServerMessage::Ack { request_id, ack },
            Err(error) => {
                debug!("Command {request_id} from {peer} failed: {error}");
                ServerMessage::Error { request_id, error }
            }
        };
        send_frame(self.transport.as_ref(), peer, &reply);
    }

    async fn execute(&self, peer: &str, command: ClientMessage) -> Result<Ack> {
        let app = {
            let mut state = self.lock();
            self.peer_app(&mut state, peer)?
        };

        match command {
            ClientMessage::Subscribe {
                subscription_id,
                topic,
                ..
            } => {
                self.subscribe(peer, &subscription_id, &topic)?;
                Ok(Ack::Done)
            }
            ClientMessage::Unsubscribe {
                subscription_id, ..
            } => {
                self.unsubscribe(peer, &subscription_id);
                Ok(Ack::Done)
            }
            ClientMessage::Publish { message, .. } => {
                self.publish(&app, message).await?;
                Ok(Ack::Done)
            }
            ClientMessage::Request {
                reply_subscription_id,
                message,
                ..
            } => {
                let reply_topic = self.request(peer, &reply_subscription_id, message).await?;
                Ok(Ack::ReplyTopic(reply_topic))
            }
            ClientMessage::CountSubscribers { topic, .. } => {
                Ok(Ack::Count(self.count_subscribers(&topic)?))
            }
            ClientMessage::ObserveIntents {
                subscription_id,
                selector,
                ..
            } => {
                self.observe_intents(peer, &subscription_id, selector)?;
                Ok(Ack::Done)
            }
            ClientMessage::IssueIntent {
                intent,
                body,
                headers,
                reply_subscription_id,
                ..
            } => match reply_subscription_id {
                Some(reply_subscription_id) => {
                    let reply_topic = self
                        .request_intent(peer, &reply_subscription_id, intent, body, headers)
                        .await?;
                    Ok(Ack::ReplyTopic(reply_topic))
                }
                None => {
                    self.issue_intent(&app, intent, body, headers).await?;
                    Ok(Ack::Done)
                }
            },
            ClientMessage::RegisterCapability { capability, .. } => {
                Ok(Ack::Id(self.register_capability(&app, capability)?))
            }
            ClientMessage::UnregisterCapabilities { filter, .. } => {
                self.unregister_capabilities(&app, &filter)?;
                Ok(Ack::Done)
            }
            ClientMessage::LookupCapabilities { filter, .. } => {
                Ok(Ack::Capabilities(self.lookup_capabilities(&app, &filter)?))
            }
            ClientMessage::ObserveCapabilities {
                subscription_id,
                filter,
                ..
            } => {
                self.observe_capabilities(peer, &subscription_id, filter)?;
                Ok(Ack::Done)
            }
            ClientMessage::RegisterIntention { intention, .. } => {
                Ok(Ack::Id(self.register_intention(&app, intention)?))
            }
            ClientMessage::UnregisterIntentions { filter, .. } => {
                self.unregister_intentions(&app, &filter)?;
                Ok(Ack::Done)
            }
            ClientMessage::LookupIntentions { filter, .. } => {
                Ok(Ack::Intentions(self.lookup_intentions(&app, &filter)?))
            }
            ClientMessage::ObserveIntentions {
                subscription_id,
                filter,
                ..
            } => {
                self.observe_intentions(peer, &subscription_id, filter)?;
                Ok(Ack::Done)
            }
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("message_interceptors", &self.message_interceptors)
            .field("intent_interceptors", &self.intent_interceptors)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Manifest the platform host is registered with.
pub fn host_manifest(app_symbolic_name: &str) -> ApplicationManifest {
    ApplicationManifest::new(app_symbolic_name)
        .without_scope_check()
        .without_intention_check()
}

/// Records a registry observation of `peer`, cancelling the one it replaces.
fn track_observation(
    state: &mut BrokerState,
    peer: &str,
    subscription_id: &str,
    observer: ObserverId,
) {
    let key = (peer.to_string(), subscription_id.to_string());
    if let Some(previous) = state.observations.insert(key, observer) {
        state.registry.cancel_observer(&previous);
    }
}

/// Sets the broker-owned fields of an outgoing message.
pub(crate) fn stamp(app: &str, message: &mut TopicMessage) {
    message.message_id = Uuid::new_v4().to_string();
    message.timestamp = chrono::Utc::now().timestamp_millis();
    message.params.clear();
    message
        .headers
        .insert(HEADER_APP_SYMBOLIC_NAME.to_string(), app.into());
}
