//! Manifest objects: capabilities, intentions and the filter used to select them.

use serde::{Deserialize, Serialize};

use super::qualifier::{Qualifier, QualifierMatcher};

/// An addressable unit of functionality owned by one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    #[serde(rename = "type")]
    pub capability_type: String,
    pub qualifier: Option<Qualifier>,
    pub app_symbolic_name: String,
    pub private: bool,
    pub description: Option<String>,
    /// Free-form provider data handed to consumers, e.g. a path to render.
    pub properties: Option<serde_json::Value>,
}

/// Declares that an application wants to interact with capabilities of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    pub id: String,
    #[serde(rename = "type")]
    pub intention_type: String,
    pub qualifier: Option<Qualifier>,
    pub app_symbolic_name: String,
}

/// Registration input for a capability; the registry assigns id and owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDecl {
    #[serde(rename = "type")]
    pub capability_type: String,
    #[serde(default)]
    pub qualifier: Option<Qualifier>,
    /// Capabilities are private unless declared otherwise.
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
}

impl CapabilityDecl {
    pub fn new(capability_type: impl Into<String>) -> Self {
        Self {
            capability_type: capability_type.into(),
            qualifier: None,
            private: None,
            description: None,
            properties: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn public(mut self) -> Self {
        self.private = Some(false);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionDecl {
    #[serde(rename = "type")]
    pub intention_type: String,
    #[serde(default)]
    pub qualifier: Option<Qualifier>,
}

impl IntentionDecl {
    pub fn new(intention_type: impl Into<String>) -> Self {
        Self {
            intention_type: intention_type.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }
}

/// Selects manifest objects; every field that is set must match.
///
/// The qualifier is applied as a pattern, so wildcards are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestObjectFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub object_type: Option<String>,
    #[serde(default)]
    pub qualifier: Option<Qualifier>,
    #[serde(default)]
    pub app_symbolic_name: Option<String>,
}

impl ManifestObjectFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn by_type(object_type: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type.into()),
            ..Self::default()
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn with_app(mut self, app_symbolic_name: impl Into<String>) -> Self {
        self.app_symbolic_name = Some(app_symbolic_name.into());
        self
    }

    pub fn accepts(&self, object: &impl ManifestObject) -> bool {
        self.id.as_deref().is_none_or(|id| id == object.id())
            && self
                .object_type
                .as_deref()
                .is_none_or(|t| t == object.object_type())
            && self
                .app_symbolic_name
                .as_deref()
                .is_none_or(|app| app == object.app_symbolic_name())
            && self.qualifier.as_ref().is_none_or(|pattern| {
                QualifierMatcher::matches(Some(pattern), object.qualifier())
            })
    }
}

/// Common view over capabilities and intentions.
pub trait ManifestObject {
    fn id(&self) -> &str;
    fn object_type(&self) -> &str;
    fn qualifier(&self) -> Option<&Qualifier>;
    fn app_symbolic_name(&self) -> &str;
}

impl ManifestObject for Capability {
    fn id(&self) -> &str {
        &self.id
    }

    fn object_type(&self) -> &str {
        &self.capability_type
    }

    fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    fn app_symbolic_name(&self) -> &str {
        &self.app_symbolic_name
    }
}

impl ManifestObject for Intention {
    fn id(&self) -> &str {
        &self.id
    }

    fn object_type(&self) -> &str {
        &self.intention_type
    }

    fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    fn app_symbolic_name(&self) -> &str {
        &self.app_symbolic_name
    }
}
