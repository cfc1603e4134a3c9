//! Error taxonomy surfaced to applications.
//!
//! Every variant renders with a stable, bracketed identifier so callers on
//! the other side of the transport can match on it by substring. Errors are
//! serializable because they travel back to the issuing application inside
//! `error` frames.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for broker, registry and client operations.
pub type Result<T> = std::result::Result<T, RouteError>;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum RouteError {
    /// Malformed topic or topic pattern. Raised locally, never transported.
    #[error("[TopicFormatError] {0}")]
    TopicFormat(String),

    /// The caller lacks an intention or is not a registered application.
    #[error("[NotQualifiedError] {0}")]
    NotQualified(String),

    /// An intent resolved to no capability.
    #[error("[NullProviderError] {0}")]
    NullProvider(String),

    /// A request has no subscriber that could possibly reply.
    #[error("[RequestReplyError] {0}")]
    RequestReply(String),

    #[error("[CapabilityRegisterError] {0}")]
    CapabilityRegister(String),

    #[error("[IntentionRegisterError] {0}")]
    IntentionRegister(String),

    /// A caller-side wait exceeded its deadline.
    #[error("[TimeoutError] {0}")]
    Timeout(String),

    /// Rejection raised by an interceptor, surfaced verbatim.
    #[error("{0}")]
    Intercepted(String),

    #[error("[TransportError] {0}")]
    Transport(String),

    #[error("[SerializationError] {0}")]
    Serialization(String),

    /// Unexpected or malformed frame.
    #[error("[ProtocolError] {0}")]
    Protocol(String),

    /// A replier answered with an `error` status.
    #[error("[ReplyError] {0}")]
    Reply(String),
}

impl RouteError {
    pub fn topic_format(msg: impl Into<String>) -> Self {
        Self::TopicFormat(msg.into())
    }

    pub fn not_qualified(msg: impl Into<String>) -> Self {
        Self::NotQualified(msg.into())
    }

    pub fn null_provider(msg: impl Into<String>) -> Self {
        Self::NullProvider(msg.into())
    }

    pub fn request_reply(msg: impl Into<String>) -> Self {
        Self::RequestReply(msg.into())
    }

    pub fn capability_register(msg: impl Into<String>) -> Self {
        Self::CapabilityRegister(msg.into())
    }

    pub fn intention_register(msg: impl Into<String>) -> Self {
        Self::IntentionRegister(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Rejection raised from within an interceptor.
    pub fn intercepted(reason: impl Into<String>) -> Self {
        Self::Intercepted(reason.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Stable identifier of the error kind, e.g. `"NullProviderError"`.
    ///
    /// Interceptor rejections have no identifier of their own and report
    /// `"InterceptorError"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TopicFormat(_) => "TopicFormatError",
            Self::NotQualified(_) => "NotQualifiedError",
            Self::NullProvider(_) => "NullProviderError",
            Self::RequestReply(_) => "RequestReplyError",
            Self::CapabilityRegister(_) => "CapabilityRegisterError",
            Self::IntentionRegister(_) => "IntentionRegisterError",
            Self::Timeout(_) => "TimeoutError",
            Self::Intercepted(_) => "InterceptorError",
            Self::Transport(_) => "TransportError",
            Self::Serialization(_) => "SerializationError",
            Self::Protocol(_) => "ProtocolError",
            Self::Reply(_) => "ReplyError",
        }
    }
}

impl From<serde_json::Error> for RouteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
