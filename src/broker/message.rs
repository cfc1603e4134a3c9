//! Message envelopes
//!
//! `TopicMessage` and `IntentMessage` are the canonical internal and wire
//! representations of a delivery. The broker stamps `message_id`,
//! `timestamp` and the sender header on publish; applications cannot
//! choose them.
//!
//! Notes on fields:
//! - `params`: wildcard bindings of the receiving subscription, filled in per subscriber
//! - `body`: any JSON value; an absent body or `null` counts as empty
//! - `reply_to`: set on requests; replies are published to this topic
//! - `retain`: topic messages only; keeps the message for late subscribers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::topic::TopicParams;
use crate::manifest::{Capability, Qualifier, QualifierMatcher};

pub type Headers = BTreeMap<String, Value>;

/// Symbolic name of the sending application, set by the broker.
pub const HEADER_APP_SYMBOLIC_NAME: &str = "app_symbolic_name";
/// Reply status, see [`ReplyStatus`].
pub const HEADER_STATUS: &str = "status";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    #[serde(default)]
    pub params: TopicParams,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl TopicMessage {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            params: TopicParams::new(),
            body: None,
            headers: Headers::new(),
            retain: false,
            reply_to: None,
            message_id: String::new(),
            timestamp: 0,
        }
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn has_empty_body(&self) -> bool {
        matches!(self.body, None | Some(Value::Null))
    }

    /// Symbolic name of the sending application.
    pub fn sender(&self) -> Option<&str> {
        self.headers
            .get(HEADER_APP_SYMBOLIC_NAME)
            .and_then(Value::as_str)
    }

    pub fn status(&self) -> ReplyStatus {
        ReplyStatus::from_headers(&self.headers)
    }
}

/// Status a replier attaches to a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// More replies may follow.
    #[default]
    Ok,
    /// Last reply; the requester's stream completes after it.
    Terminal,
    /// The request failed; the body carries the reason.
    Error,
}

impl ReplyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Terminal => "terminal",
            Self::Error => "error",
        }
    }

    fn from_headers(headers: &Headers) -> Self {
        match headers.get(HEADER_STATUS).and_then(Value::as_str) {
            Some("terminal") => Self::Terminal,
            Some("error") => Self::Error,
            _ => Self::Ok,
        }
    }
}

/// A request against a type and qualifier, resolved to capabilities at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: String,
    #[serde(default)]
    pub qualifier: Option<Qualifier>,
}

impl Intent {
    pub fn new(intent_type: impl Into<String>) -> Self {
        Self {
            intent_type: intent_type.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }
}

/// An intent as delivered to one resolved capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentMessage {
    pub intent: Intent,
    pub capability: Capability,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl IntentMessage {
    pub fn sender(&self) -> Option<&str> {
        self.headers
            .get(HEADER_APP_SYMBOLIC_NAME)
            .and_then(Value::as_str)
    }
}

/// Selects which intents an `observe_intents` subscription receives.
///
/// Unset fields select everything; a set qualifier must match the intent's
/// qualifier in either direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSelector {
    #[serde(default, rename = "type")]
    pub intent_type: Option<String>,
    #[serde(default)]
    pub qualifier: Option<Qualifier>,
}

impl IntentSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_type(intent_type: impl Into<String>) -> Self {
        Self {
            intent_type: Some(intent_type.into()),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn accepts(&self, intent: &Intent) -> bool {
        self.intent_type
            .as_deref()
            .is_none_or(|t| t == intent.intent_type)
            && self.qualifier.as_ref().is_none_or(|pattern| {
                QualifierMatcher::matches_either(Some(pattern), intent.qualifier.as_ref())
            })
    }
}
