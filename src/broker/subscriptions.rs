//! Subscription tables
//!
//! A `SubscriptionTable` holds the active subscriptions of one broker kind
//! (topic or intent) in insertion order. Each subscription belongs to one
//! peer connection of one application and is removed on unsubscribe or when
//! that peer goes away. Subscription ids are chosen by the peer, so an entry
//! is identified by its peer and id together.
//!
//! Concurrency note: the broker keeps its tables behind its state lock and
//! resolves and delivers a publish while holding it, so every publish sees a
//! single snapshot of the table.

use tracing::debug;

use super::message::{Intent, IntentSelector};
use super::topic::{PublishedTopic, TopicMatcher, TopicParams};
use crate::transport::PeerId;

pub type SubscriptionId = String;

/// Decides whether a published key reaches a subscription.
pub trait Selector {
    type Key;
    type Params;

    fn select(&self, key: &Self::Key) -> Option<Self::Params>;
}

impl Selector for TopicMatcher {
    type Key = PublishedTopic;
    type Params = TopicParams;

    fn select(&self, key: &PublishedTopic) -> Option<TopicParams> {
        self.match_published(key)
    }
}

impl Selector for IntentSelector {
    type Key = Intent;
    type Params = ();

    fn select(&self, key: &Intent) -> Option<()> {
        self.accepts(key).then_some(())
    }
}

#[derive(Debug, Clone)]
pub struct Subscription<S> {
    pub id: SubscriptionId,
    pub peer: PeerId,
    pub app_symbolic_name: String,
    pub selector: S,
}

#[derive(Debug, Clone)]
pub struct SubscriptionTable<S> {
    entries: Vec<Subscription<S>>,
}

impl<S> Default for SubscriptionTable<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S: Selector> SubscriptionTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription. An entry of the same peer with the same id is
    /// replaced.
    pub fn add(&mut self, subscription: Subscription<S>) {
        self.entries
            .retain(|s| !(s.peer == subscription.peer && s.id == subscription.id));
        self.entries.push(subscription);
    }

    pub fn remove(&mut self, peer: &str, id: &str) -> Option<Subscription<S>> {
        let index = self
            .entries
            .iter()
            .position(|s| s.peer == peer && s.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn remove_all_for_peer(&mut self, peer: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|s| s.peer != peer);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Removed {removed} subscriptions of peer {peer}");
        }
        removed
    }

    /// Matching subscriptions with their extracted params, in subscription order.
    pub fn find_matching(&self, key: &S::Key) -> Vec<(&Subscription<S>, S::Params)> {
        self.entries
            .iter()
            .filter_map(|s| s.selector.select(key).map(|params| (s, params)))
            .collect()
    }

    pub fn count_matching(&self, key: &S::Key) -> usize {
        self.entries
            .iter()
            .filter(|s| s.selector.select(key).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
