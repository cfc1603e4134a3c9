//! Qualifiers and qualifier matching.
//!
//! A qualifier is a flat string map used to tell apart capabilities and
//! intentions of the same type. Matching is asymmetric: the pattern is a
//! subset filter over the candidate, so a candidate may carry keys the
//! pattern never mentions.
//!
//! Wildcard values in a pattern:
//! - `*`: the candidate must have the key, with any value
//! - `?`: the candidate may have the key, with any value
//!
//! The qualifier `{'*': '*'}` is the catch-all for any present, non-empty
//! candidate. Next to other keys the `'*'` entry only requires a non-empty
//! candidate; the other keys still apply.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const ANY_VALUE: &str = "*";
pub const OPTIONAL_VALUE: &str = "?";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qualifier(BTreeMap<String, String>);

impl Qualifier {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The catch-all qualifier `{'*': '*'}`.
    pub fn any() -> Self {
        Self::from([(ANY_VALUE, ANY_VALUE)])
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn has_any_entry(&self) -> bool {
        self.get(ANY_VALUE) == Some(ANY_VALUE)
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Qualifier {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Qualifier {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

/// Renders an optional qualifier for log and error messages.
pub fn describe(qualifier: Option<&Qualifier>) -> String {
    qualifier.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

pub struct QualifierMatcher;

impl QualifierMatcher {
    /// Does `candidate` satisfy `pattern`?
    ///
    /// An absent pattern admits only an absent candidate, and a present
    /// pattern never admits an absent one.
    pub fn matches(pattern: Option<&Qualifier>, candidate: Option<&Qualifier>) -> bool {
        match (pattern, candidate) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(pattern), Some(candidate)) => Self::matches_present(pattern, candidate),
        }
    }

    /// Matches in both directions; either side's wildcards may admit the other.
    pub fn matches_either(a: Option<&Qualifier>, b: Option<&Qualifier>) -> bool {
        Self::matches(a, b) || Self::matches(b, a)
    }

    fn matches_present(pattern: &Qualifier, candidate: &Qualifier) -> bool {
        if pattern.is_empty() {
            return candidate.is_empty();
        }
        if pattern.has_any_entry() && candidate.is_empty() {
            return false;
        }

        pattern
            .iter()
            .filter(|&(key, value)| !(key == ANY_VALUE && value == ANY_VALUE))
            .all(|(key, expected)| match candidate.get(key) {
                None => expected == OPTIONAL_VALUE,
                Some(_) if expected == ANY_VALUE || expected == OPTIONAL_VALUE => true,
                Some(actual) => actual == expected,
            })
    }
}
