//! # AppBus
//!
//! `appbus` is an in-process message bus for applications sharing one host.
//! Applications exchange topic messages (publish/subscribe with wildcard
//! topics, retained messages and request/reply) and intents, which the
//! broker resolves against the capabilities applications declared in the
//! manifest registry.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: topic matching, subscriptions, interceptors, and topic and intent routing.
//! - `client`: the application-side API and its delivery streams.
//! - `config`: loading settings and application manifests.
//! - `manifest`: capabilities, intentions, qualifiers and the registry enforcing visibility.
//! - `transport`: the frame protocol and the in-process host binding.
//! - `utils`: error taxonomy and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod manifest;
pub mod transport;
pub mod utils;
