//! The `manifest` module holds what applications declare about themselves:
//! capabilities they provide, intentions they hold, and the registry that
//! enforces who may see and reach what.

pub mod application;
pub mod model;
pub mod qualifier;
pub mod registry;

pub use application::{Application, ApplicationManifest};
pub use model::{Capability, CapabilityDecl, Intention, IntentionDecl, ManifestObjectFilter};
pub use qualifier::{Qualifier, QualifierMatcher};
pub use registry::{ManifestRegistry, ObserverId, SnapshotSink};
