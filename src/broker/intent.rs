//! Intent dispatch
//!
//! An intent names a capability type and qualifier instead of a topic. The
//! broker resolves it against the registry at dispatch time and delivers one
//! `IntentMessage` per resolved capability to the `observe_intents`
//! subscriptions of the capability's owning application.
//!
//! Resolution rules:
//! - the issuer needs an intention covering the intent, unless the intent
//!   only resolves to capabilities the issuer owns itself
//! - a capability qualifies if it is visible to the issuer and its qualifier
//!   matches the intent's qualifier in either direction
//! - no qualifying capability fails with `NullProviderError`
//!
//! Interceptors run once per resolved capability. Deliveries happen only
//! after every interceptor accepted, so a rejection reaches nobody.

use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::engine::{Broker, BrokerState};
use super::message::{HEADER_APP_SYMBOLIC_NAME, Headers, Intent, IntentMessage, IntentSelector};
use super::subscriptions::Subscription;
use crate::manifest::qualifier::describe;
use crate::manifest::{Application, Capability, ManifestRegistry, QualifierMatcher};
use crate::transport::message::ServerMessage;
use crate::transport::send_frame;
use crate::utils::error::{Result, RouteError};

/// Capabilities an intent of `issuer` reaches, in registration order.
pub fn resolve_providers(
    registry: &ManifestRegistry,
    issuer: &Application,
    intent: &Intent,
) -> Result<Vec<Capability>> {
    let qualified = registry.holds_intention(issuer, &intent.intent_type, intent.qualifier.as_ref());

    let providers: Vec<Capability> = registry
        .visible_of_type(issuer, &intent.intent_type)
        .filter(|c| qualified || c.app_symbolic_name == issuer.symbolic_name)
        .filter(|c| QualifierMatcher::matches_either(intent.qualifier.as_ref(), c.qualifier.as_ref()))
        .cloned()
        .collect();

    if !qualified && providers.is_empty() {
        return Err(RouteError::not_qualified(format!(
            "application '{}' has no intention for '{}' {}",
            issuer.symbolic_name,
            intent.intent_type,
            describe(intent.qualifier.as_ref())
        )));
    }
    if providers.is_empty() {
        return Err(RouteError::null_provider(format!(
            "no application provides a capability for '{}' {}",
            intent.intent_type,
            describe(intent.qualifier.as_ref())
        )));
    }
    Ok(providers)
}

impl Broker {
    /// Subscribes `peer` to intents matching `selector` that resolved to a
    /// capability of its application.
    pub fn observe_intents(
        &self,
        peer: &str,
        subscription_id: &str,
        selector: IntentSelector,
    ) -> Result<()> {
        let mut state = self.lock();
        let app = self.peer_app(&mut state, peer)?;
        debug!("'{app}' ({peer}) observes intents {selector:?} as {subscription_id}");
        state.intent_subscriptions.add(Subscription {
            id: subscription_id.to_string(),
            peer: peer.to_string(),
            app_symbolic_name: app,
            selector,
        });
        Ok(())
    }

    /// Issues an intent on behalf of `app`, fire-and-forget.
    pub async fn issue_intent(
        &self,
        app: &str,
        intent: Intent,
        body: Option<Value>,
        headers: Headers,
    ) -> Result<()> {
        let providers = {
            let state = self.lock();
            let issuer = state.registry.application(app)?;
            resolve_providers(&state.registry, issuer, &intent)?
        };
        let messages = build_messages(app, &intent, providers, body, headers, None);
        self.intercept_and_deliver(messages).await
    }

    /// Issues an intent expecting replies, which `peer` receives under
    /// `reply_subscription_id`. Returns the reply topic.
    ///
    /// Fails with `RequestReplyError` if none of the resolved capabilities'
    /// applications observes the intent.
    pub async fn request_intent(
        &self,
        peer: &str,
        reply_subscription_id: &str,
        intent: Intent,
        body: Option<Value>,
        headers: Headers,
    ) -> Result<String> {
        let (app, providers, reply_topic) = {
            let mut state = self.lock();
            let app = self.peer_app(&mut state, peer)?;
            let issuer = state.registry.application(&app)?;
            let providers = resolve_providers(&state.registry, issuer, &intent)?;

            let observers: usize = providers
                .iter()
                .map(|c| count_observers(&state, &intent, c))
                .sum();
            if observers == 0 {
                return Err(RouteError::request_reply(format!(
                    "no application observes intent '{}' {} to reply to it",
                    intent.intent_type,
                    describe(intent.qualifier.as_ref())
                )));
            }

            let reply_topic =
                self.subscribe_reply_topic(&mut state, peer, &app, reply_subscription_id)?;
            (app, providers, reply_topic)
        };

        let messages = build_messages(
            &app,
            &intent,
            providers,
            body,
            headers,
            Some(reply_topic.clone()),
        );
        match self.intercept_and_deliver(messages).await {
            Ok(()) => Ok(reply_topic),
            Err(e) => {
                self.lock()
                    .topic_subscriptions
                    .remove(peer, reply_subscription_id);
                Err(e)
            }
        }
    }

    async fn intercept_and_deliver(&self, messages: Vec<IntentMessage>) -> Result<()> {
        let accepted = Mutex::new(Vec::with_capacity(messages.len()));
        let collect = |message: IntentMessage| {
            accepted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
            Ok(())
        };
        for message in messages {
            self.intent_interceptors.run(message, &collect).await?;
        }

        let accepted = accepted.into_inner().unwrap_or_else(PoisonError::into_inner);
        let state = self.lock();
        for message in accepted {
            let targets: Vec<_> = state
                .intent_subscriptions
                .find_matching(&message.intent)
                .into_iter()
                .filter(|(s, _)| s.app_symbolic_name == message.capability.app_symbolic_name)
                .collect();
            debug!(
                "Delivering intent '{}' for capability {} to {} subscribers",
                message.intent.intent_type,
                message.capability.id,
                targets.len()
            );
            for (subscription, ()) in targets {
                send_frame(
                    self.transport.as_ref(),
                    &subscription.peer,
                    &ServerMessage::Intent {
                        subscription_id: subscription.id.clone(),
                        message: message.clone(),
                    },
                );
            }
        }
        Ok(())
    }
}

fn count_observers(state: &BrokerState, intent: &Intent, capability: &Capability) -> usize {
    state
        .intent_subscriptions
        .find_matching(intent)
        .iter()
        .filter(|(s, _)| s.app_symbolic_name == capability.app_symbolic_name)
        .count()
}

fn build_messages(
    app: &str,
    intent: &Intent,
    providers: Vec<Capability>,
    body: Option<Value>,
    mut headers: Headers,
    reply_to: Option<String>,
) -> Vec<IntentMessage> {
    headers.insert(HEADER_APP_SYMBOLIC_NAME.to_string(), app.into());
    let timestamp = chrono::Utc::now().timestamp_millis();
    providers
        .into_iter()
        .map(|capability| IntentMessage {
            intent: intent.clone(),
            capability,
            body: body.clone(),
            headers: headers.clone(),
            reply_to: reply_to.clone(),
            message_id: Uuid::new_v4().to_string(),
            timestamp,
        })
        .collect()
}
