//! The `broker` module routes topic messages and intents between
//! applications. `engine` holds the [`Broker`] itself; `intent` extends it
//! with capability-based dispatch.

pub mod engine;
pub mod intent;
pub mod interceptor;
pub mod message;
pub mod retained;
pub mod subscriptions;
pub mod topic;

pub use engine::{Broker, host_manifest};
pub use interceptor::{Interceptor, InterceptorChain, Next};
pub use message::{
    Headers, Intent, IntentMessage, IntentSelector, ReplyStatus, TopicMessage,
};
pub use topic::{TopicMatch, TopicMatcher, TopicParams};
