//! Retained messages
//!
//! At most one message is retained per exact topic: the latest one published
//! with `retain` set. A retained publish with an empty body clears the entry.

use std::collections::BTreeMap;

use tracing::debug;

use super::message::TopicMessage;
use super::topic::{PublishedTopic, TopicMatcher, TopicParams};

#[derive(Debug, Default)]
pub struct RetainedStore {
    messages: BTreeMap<String, (PublishedTopic, TopicMessage)>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or clears the retained message for the message's topic.
    /// Messages without `retain` leave the store untouched.
    pub fn apply(&mut self, topic: &PublishedTopic, message: &TopicMessage) {
        if !message.retain {
            return;
        }
        if message.has_empty_body() {
            if self.messages.remove(topic.as_str()).is_some() {
                debug!("Cleared retained message on '{}'", topic.as_str());
            }
        } else {
            self.messages.insert(
                topic.as_str().to_string(),
                (topic.clone(), message.clone()),
            );
        }
    }

    pub fn get(&self, topic: &str) -> Option<&TopicMessage> {
        self.messages.get(topic).map(|(_, message)| message)
    }

    /// Retained messages a new subscription with `matcher` should receive.
    pub fn matching(&self, matcher: &TopicMatcher) -> Vec<(&TopicMessage, TopicParams)> {
        self.messages
            .values()
            .filter_map(|(topic, message)| {
                matcher.match_published(topic).map(|params| (message, params))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
