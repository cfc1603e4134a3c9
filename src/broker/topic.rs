//! Topic parsing and matching
//!
//! A topic is one or more `/`-separated segments. Subscription patterns may
//! contain wildcard segments of the form `:name`, each binding the segment
//! found at the same position of a published topic to `name`. Published
//! topics must not contain wildcards.
//!
//! Matching is positional and all-or-nothing: segment counts must be equal
//! and every literal segment must be equal.

use std::collections::BTreeMap;

use crate::utils::error::{Result, RouteError};

pub type TopicParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

/// Outcome of matching a published topic against a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMatch {
    pub matches: bool,
    pub params: TopicParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl TopicMatcher {
    /// Parses a subscription pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let segments = split_segments(pattern)?
            .into_iter()
            .map(|segment| match wildcard_name(segment) {
                Some(name) => Segment::Wildcard(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Wildcard(_)))
    }

    /// Matches a published topic, validating it first.
    pub fn matches(&self, topic: &str) -> Result<TopicMatch> {
        let topic = PublishedTopic::parse(topic)?;
        Ok(match self.match_published(&topic) {
            Some(params) => TopicMatch {
                matches: true,
                params,
            },
            None => TopicMatch::default(),
        })
    }

    /// Matches an already validated topic.
    pub fn match_published(&self, topic: &PublishedTopic) -> Option<TopicParams> {
        let candidate = &topic.segments;
        if candidate.len() != self.segments.len() {
            return None;
        }

        let mut params = TopicParams::new();
        for (segment, actual) in self.segments.iter().zip(candidate) {
            match segment {
                Segment::Literal(expected) if expected == actual => {}
                Segment::Literal(_) => return None,
                Segment::Wildcard(name) => {
                    params.insert(name.clone(), actual.clone());
                }
            }
        }
        Some(params)
    }
}

/// A topic validated for publishing: non-empty and free of wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedTopic {
    topic: String,
    segments: Vec<String>,
}

impl PublishedTopic {
    pub fn parse(topic: &str) -> Result<Self> {
        let segments = split_segments(topic)?;
        if segments.iter().any(|s| wildcard_name(s).is_some()) {
            return Err(RouteError::topic_format(format!(
                "topic '{topic}' must not contain wildcard segments"
            )));
        }
        Ok(Self {
            topic: topic.to_string(),
            segments: segments.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.topic
    }
}

fn split_segments(topic: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = topic.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(RouteError::topic_format(format!(
            "topic '{topic}' must have at least one segment"
        )));
    }
    Ok(segments)
}

fn wildcard_name(segment: &str) -> Option<&str> {
    segment.strip_prefix(':').filter(|name| !name.is_empty())
}
