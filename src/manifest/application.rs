//! Application manifests.
//!
//! An application must be known to the registry before it may register,
//! look up or dispatch anything. Its manifest carries the permission flags
//! that relax the registry's visibility and intention rules, plus the
//! capabilities and intentions it declares up front.

use serde::{Deserialize, Serialize};

use super::model::{CapabilityDecl, IntentionDecl};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationManifest {
    pub symbolic_name: String,
    /// Refuses `registerIntention` / `unregisterIntentions` for this application.
    #[serde(default)]
    pub intention_register_api_disabled: bool,
    /// Lets this application see other applications' private capabilities.
    #[serde(default)]
    pub scope_check_disabled: bool,
    /// Treats this application as holding an intention for everything.
    #[serde(default)]
    pub intention_check_disabled: bool,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDecl>,
    #[serde(default)]
    pub intentions: Vec<IntentionDecl>,
}

impl ApplicationManifest {
    pub fn new(symbolic_name: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            intention_register_api_disabled: false,
            scope_check_disabled: false,
            intention_check_disabled: false,
            capabilities: Vec::new(),
            intentions: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: CapabilityDecl) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_intention(mut self, intention: IntentionDecl) -> Self {
        self.intentions.push(intention);
        self
    }

    pub fn without_intention_register_api(mut self) -> Self {
        self.intention_register_api_disabled = true;
        self
    }

    pub fn without_scope_check(mut self) -> Self {
        self.scope_check_disabled = true;
        self
    }

    pub fn without_intention_check(mut self) -> Self {
        self.intention_check_disabled = true;
        self
    }
}

/// Permission flags the registry keeps per registered application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub symbolic_name: String,
    pub intention_register_api_disabled: bool,
    pub scope_check_disabled: bool,
    pub intention_check_disabled: bool,
}

impl From<&ApplicationManifest> for Application {
    fn from(manifest: &ApplicationManifest) -> Self {
        Self {
            symbolic_name: manifest.symbolic_name.clone(),
            intention_register_api_disabled: manifest.intention_register_api_disabled,
            scope_check_disabled: manifest.scope_check_disabled,
            intention_check_disabled: manifest.intention_check_disabled,
        }
    }
}
