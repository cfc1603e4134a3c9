//! Wire protocol between applications and the broker.
//!
//! Every command an application sends carries a `request_id`; the broker
//! answers each with exactly one `ack` or `error` frame bearing the same id.
//! Deliveries carry the `subscription_id` the application chose when it
//! subscribed.

use serde::{Deserialize, Serialize};

use crate::broker::message::{Headers, Intent, IntentMessage, IntentSelector, TopicMessage};
use crate::manifest::{Capability, CapabilityDecl, Intention, IntentionDecl, ManifestObjectFilter};
use crate::utils::error::RouteError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        request_id: String,
        subscription_id: String,
        topic: String,
    },
    Unsubscribe {
        request_id: String,
        subscription_id: String,
    },
    Publish {
        request_id: String,
        message: TopicMessage,
    },
    Request {
        request_id: String,
        reply_subscription_id: String,
        message: TopicMessage,
    },
    CountSubscribers {
        request_id: String,
        topic: String,
    },
    ObserveIntents {
        request_id: String,
        subscription_id: String,
        selector: IntentSelector,
    },
    IssueIntent {
        request_id: String,
        intent: Intent,
        #[serde(default)]
        body: Option<serde_json::Value>,
        #[serde(default)]
        headers: Headers,
        /// Set when the issuer expects replies.
        #[serde(default)]
        reply_subscription_id: Option<String>,
    },
    RegisterCapability {
        request_id: String,
        capability: CapabilityDecl,
    },
    UnregisterCapabilities {
        request_id: String,
        filter: ManifestObjectFilter,
    },
    LookupCapabilities {
        request_id: String,
        filter: ManifestObjectFilter,
    },
    ObserveCapabilities {
        request_id: String,
        subscription_id: String,
        filter: ManifestObjectFilter,
    },
    RegisterIntention {
        request_id: String,
        intention: IntentionDecl,
    },
    UnregisterIntentions {
        request_id: String,
        filter: ManifestObjectFilter,
    },
    LookupIntentions {
        request_id: String,
        filter: ManifestObjectFilter,
    },
    ObserveIntentions {
        request_id: String,
        subscription_id: String,
        filter: ManifestObjectFilter,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Subscribe { request_id, .. }
            | Self::Unsubscribe { request_id, .. }
            | Self::Publish { request_id, .. }
            | Self::Request { request_id, .. }
            | Self::CountSubscribers { request_id, .. }
            | Self::ObserveIntents { request_id, .. }
            | Self::IssueIntent { request_id, .. }
            | Self::RegisterCapability { request_id, .. }
            | Self::UnregisterCapabilities { request_id, .. }
            | Self::LookupCapabilities { request_id, .. }
            | Self::ObserveCapabilities { request_id, .. }
            | Self::RegisterIntention { request_id, .. }
            | Self::UnregisterIntentions { request_id, .. }
            | Self::LookupIntentions { request_id, .. }
            | Self::ObserveIntentions { request_id, .. } => request_id,
        }
    }
}

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Ack {
    Done,
    /// Id of a newly registered capability or intention.
    Id(String),
    Count(usize),
    /// Topic replies to a request are published to.
    ReplyTopic(String),
    Capabilities(Vec<Capability>),
    Intentions(Vec<Intention>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        request_id: String,
        ack: Ack,
    },
    Error {
        request_id: String,
        error: RouteError,
    },
    Message {
        subscription_id: String,
        message: TopicMessage,
    },
    Intent {
        subscription_id: String,
        message: IntentMessage,
    },
    Capabilities {
        subscription_id: String,
        capabilities: Vec<Capability>,
    },
    Intentions {
        subscription_id: String,
        intentions: Vec<Intention>,
    },
}

impl ServerMessage {
    /// Subscription a delivery belongs to; `None` for answers to commands.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Ack { .. } | Self::Error { .. } => None,
            Self::Message {
                subscription_id, ..
            }
            | Self::Intent {
                subscription_id, ..
            }
            | Self::Capabilities {
                subscription_id, ..
            }
            | Self::Intentions {
                subscription_id, ..
            } => Some(subscription_id),
        }
    }
}
