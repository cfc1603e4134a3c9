//! The `client` module is the application side of the bus.
//!
//! It provides [`AppClient`], which wraps one peer connection to the broker,
//! and the streams its subscriptions and observations are delivered on.

pub mod app_client;
pub mod streams;

pub use app_client::AppClient;
pub use streams::{IntentStream, MessageStream, ReplyStream, SnapshotStream};

#[cfg(test)]
mod tests;
