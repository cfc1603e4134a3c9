//! Capability and intention registry.
//!
//! The registry is the single owner of every manifest object. Callers go
//! through its operations and receive clones; nothing outside holds a
//! reference into the internal collections.
//!
//! Visibility: a capability is always visible to its owner. Any other
//! application sees it only if the capability is public (or the requester
//! has scope checks disabled) and the requester holds an intention of the
//! same type whose qualifier matches the capability's qualifier.
//!
//! Observers receive a fresh full snapshot after every mutation that
//! changed the registry, in mutation order. Callers serialize access (the
//! broker keeps the registry behind its state lock), so a snapshot always
//! reflects exactly one post-mutation state.

use std::collections::{BTreeMap, HashSet};
use std::mem;

use tracing::{debug, info};
use uuid::Uuid;

use super::application::{Application, ApplicationManifest};
use super::model::{
    Capability, CapabilityDecl, Intention, IntentionDecl, ManifestObject, ManifestObjectFilter,
};
use super::qualifier::{Qualifier, QualifierMatcher, describe};
use crate::utils::error::{Result, RouteError};

pub type ObserverId = String;

/// Receives registry snapshots; returns `false` once it no longer wants any.
pub type SnapshotSink<T> = Box<dyn FnMut(Vec<T>) -> bool + Send>;

struct Observer<T> {
    id: ObserverId,
    requester: String,
    filter: ManifestObjectFilter,
    sink: SnapshotSink<T>,
}

#[derive(Default)]
pub struct ManifestRegistry {
    applications: BTreeMap<String, Application>,
    capabilities: Vec<Capability>,
    intentions: Vec<Intention>,
    /// Ids of objects declared in application manifests.
    declared: HashSet<String>,
    capability_observers: Vec<Observer<Capability>>,
    intention_observers: Vec<Observer<Intention>>,
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an application together with the objects its manifest declares.
    ///
    /// Re-registering an application replaces its flags and its declared
    /// objects; dynamically registered objects are kept.
    pub fn register_application(&mut self, manifest: &ApplicationManifest) -> Result<()> {
        let app = manifest.symbolic_name.as_str();
        if app.trim().is_empty() {
            return Err(RouteError::not_qualified(
                "application symbolic name must not be empty",
            ));
        }
        if let Some(cap) = manifest.capabilities.iter().find(|c| c.capability_type.is_empty()) {
            return Err(RouteError::capability_register(format!(
                "capability declared by '{app}' has no type (qualifier {})",
                describe(cap.qualifier.as_ref())
            )));
        }
        if manifest.intentions.iter().any(|i| i.intention_type.is_empty()) {
            return Err(RouteError::intention_register(format!(
                "intention declared by '{app}' has no type"
            )));
        }

        let declared = &self.declared;
        self.capabilities
            .retain(|c| !(c.app_symbolic_name == app && declared.contains(&c.id)));
        self.intentions
            .retain(|i| !(i.app_symbolic_name == app && declared.contains(&i.id)));

        self.applications
            .insert(app.to_string(), Application::from(manifest));

        for decl in &manifest.capabilities {
            let capability = new_capability(app, decl.clone());
            self.declared.insert(capability.id.clone());
            self.capabilities.push(capability);
        }
        for decl in &manifest.intentions {
            let intention = new_intention(app, decl.clone());
            self.declared.insert(intention.id.clone());
            self.intentions.push(intention);
        }

        info!(
            "Registered application '{app}' ({} capabilities, {} intentions)",
            manifest.capabilities.len(),
            manifest.intentions.len()
        );
        self.notify();
        Ok(())
    }

    pub fn is_registered(&self, app: &str) -> bool {
        self.applications.contains_key(app)
    }

    /// Looks up a registered application, or fails with `NotQualifiedError`.
    pub fn application(&self, app: &str) -> Result<&Application> {
        self.applications.get(app).ok_or_else(|| {
            RouteError::not_qualified(format!("application '{app}' is not registered"))
        })
    }

    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        self.applications.values()
    }

    pub fn register_capability(&mut self, app: &str, decl: CapabilityDecl) -> Result<String> {
        self.application(app)?;
        if decl.capability_type.trim().is_empty() {
            return Err(RouteError::capability_register(
                "capability type must not be empty",
            ));
        }

        let capability = new_capability(app, decl);
        let id = capability.id.clone();
        debug!(
            "'{app}' registered capability {id} of type '{}' {}",
            capability.capability_type,
            describe(capability.qualifier.as_ref())
        );
        self.capabilities.push(capability);
        self.notify();
        Ok(id)
    }

    /// Removes the caller's own capabilities matching `filter`.
    ///
    /// A filter naming another application matches nothing; unregistering
    /// someone else's capabilities is a silent no-op.
    pub fn unregister_capabilities(
        &mut self,
        app: &str,
        filter: &ManifestObjectFilter,
    ) -> Result<usize> {
        self.application(app)?;
        let declared = &mut self.declared;
        let removed = retain_counting(&mut self.capabilities, |c| {
            let hit = c.app_symbolic_name == app && filter.accepts(c);
            if hit {
                declared.remove(&c.id);
            }
            !hit
        });

        if removed > 0 {
            debug!("'{app}' unregistered {removed} capabilities");
            self.notify();
        }
        Ok(removed)
    }

    pub fn register_intention(&mut self, app: &str, decl: IntentionDecl) -> Result<String> {
        self.ensure_intention_register_api(app)?;
        if decl.intention_type.trim().is_empty() {
            return Err(RouteError::intention_register(
                "intention type must not be empty",
            ));
        }

        let intention = new_intention(app, decl);
        let id = intention.id.clone();
        debug!(
            "'{app}' registered intention {id} of type '{}' {}",
            intention.intention_type,
            describe(intention.qualifier.as_ref())
        );
        self.intentions.push(intention);
        self.notify();
        Ok(id)
    }

    /// Removes the caller's own intentions matching `filter`.
    pub fn unregister_intentions(
        &mut self,
        app: &str,
        filter: &ManifestObjectFilter,
    ) -> Result<usize> {
        self.ensure_intention_register_api(app)?;
        let declared = &mut self.declared;
        let removed = retain_counting(&mut self.intentions, |i| {
            let hit = i.app_symbolic_name == app && filter.accepts(i);
            if hit {
                declared.remove(&i.id);
            }
            !hit
        });

        if removed > 0 {
            debug!("'{app}' unregistered {removed} intentions");
            self.notify();
        }
        Ok(removed)
    }

    /// Capabilities matching `filter` that `requester` is allowed to see.
    pub fn lookup_capabilities(
        &self,
        requester: &str,
        filter: &ManifestObjectFilter,
    ) -> Result<Vec<Capability>> {
        let requester = self.application(requester)?;
        Ok(self.visible_capabilities(requester, filter))
    }

    /// Intentions of all applications matching `filter`.
    pub fn lookup_intentions(
        &self,
        requester: &str,
        filter: &ManifestObjectFilter,
    ) -> Result<Vec<Intention>> {
        self.application(requester)?;
        Ok(self.matching_intentions(filter))
    }

    /// Starts observing capabilities. The sink receives the current
    /// snapshot right away and a new one after every mutation.
    pub fn observe_capabilities(
        &mut self,
        requester: &str,
        filter: ManifestObjectFilter,
        mut sink: SnapshotSink<Capability>,
    ) -> Result<ObserverId> {
        let app = self.application(requester)?;
        let id = Uuid::new_v4().to_string();
        if sink(self.visible_capabilities(app, &filter)) {
            self.capability_observers.push(Observer {
                id: id.clone(),
                requester: requester.to_string(),
                filter,
                sink,
            });
        }
        Ok(id)
    }

    pub fn observe_intentions(
        &mut self,
        requester: &str,
        filter: ManifestObjectFilter,
        mut sink: SnapshotSink<Intention>,
    ) -> Result<ObserverId> {
        self.application(requester)?;
        let id = Uuid::new_v4().to_string();
        if sink(self.matching_intentions(&filter)) {
            self.intention_observers.push(Observer {
                id: id.clone(),
                requester: requester.to_string(),
                filter,
                sink,
            });
        }
        Ok(id)
    }

    /// Stops an observation. Returns whether it was still active.
    pub fn cancel_observer(&mut self, id: &str) -> bool {
        let before = self.capability_observers.len() + self.intention_observers.len();
        self.capability_observers.retain(|o| o.id != id);
        self.intention_observers.retain(|o| o.id != id);
        before != self.capability_observers.len() + self.intention_observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.capability_observers.len() + self.intention_observers.len()
    }

    /// Removes every capability and intention `app` registered at runtime.
    ///
    /// Objects declared in the application's manifest stay registered.
    pub fn remove_all_for_app(&mut self, app: &str) -> (usize, usize) {
        let declared = &self.declared;
        let capabilities = retain_counting(&mut self.capabilities, |c| {
            c.app_symbolic_name != app || declared.contains(&c.id)
        });
        let intentions = retain_counting(&mut self.intentions, |i| {
            i.app_symbolic_name != app || declared.contains(&i.id)
        });

        if capabilities + intentions > 0 {
            info!(
                "Removed {capabilities} capabilities and {intentions} intentions of '{app}'"
            );
            self.notify();
        }
        (capabilities, intentions)
    }

    /// Whether `app` holds an intention admitting `qualifier` for `intent_type`.
    pub fn holds_intention(
        &self,
        app: &Application,
        intent_type: &str,
        qualifier: Option<&Qualifier>,
    ) -> bool {
        app.intention_check_disabled
            || self.intentions.iter().any(|i| {
                i.app_symbolic_name == app.symbolic_name
                    && i.intention_type == intent_type
                    && QualifierMatcher::matches_either(i.qualifier.as_ref(), qualifier)
            })
    }

    pub fn is_visible(&self, requester: &Application, capability: &Capability) -> bool {
        if capability.app_symbolic_name == requester.symbolic_name {
            return true;
        }
        if capability.private && !requester.scope_check_disabled {
            return false;
        }
        requester.intention_check_disabled
            || self.intentions.iter().any(|i| {
                i.app_symbolic_name == requester.symbolic_name
                    && i.intention_type == capability.capability_type
                    && QualifierMatcher::matches_either(
                        i.qualifier.as_ref(),
                        capability.qualifier.as_ref(),
                    )
            })
    }

    /// Capabilities of `capability_type` visible to `requester`, in registration order.
    pub(crate) fn visible_of_type<'a>(
        &'a self,
        requester: &'a Application,
        capability_type: &'a str,
    ) -> impl Iterator<Item = &'a Capability> + 'a {
        self.capabilities.iter().filter(move |c| {
            c.capability_type == capability_type && self.is_visible(requester, c)
        })
    }

    fn visible_capabilities(
        &self,
        requester: &Application,
        filter: &ManifestObjectFilter,
    ) -> Vec<Capability> {
        self.capabilities
            .iter()
            .filter(|c| filter.accepts(*c) && self.is_visible(requester, c))
            .cloned()
            .collect()
    }

    fn matching_intentions(&self, filter: &ManifestObjectFilter) -> Vec<Intention> {
        self.intentions
            .iter()
            .filter(|i| filter.accepts(*i))
            .cloned()
            .collect()
    }

    fn ensure_intention_register_api(&self, app: &str) -> Result<()> {
        let application = self.application(app)?;
        if application.intention_register_api_disabled {
            return Err(RouteError::intention_register(format!(
                "application '{app}' is not allowed to register or unregister intentions"
            )));
        }
        Ok(())
    }

    fn notify(&mut self) {
        let mut observers = mem::take(&mut self.capability_observers);
        observers.retain_mut(|o| match self.applications.get(&o.requester) {
            Some(app) => (o.sink)(self.visible_capabilities(app, &o.filter)),
            None => false,
        });
        self.capability_observers = observers;

        let mut observers = mem::take(&mut self.intention_observers);
        observers.retain_mut(|o| (o.sink)(self.matching_intentions(&o.filter)));
        self.intention_observers = observers;
    }
}

fn new_capability(app: &str, decl: CapabilityDecl) -> Capability {
    Capability {
        id: Uuid::new_v4().to_string(),
        capability_type: decl.capability_type,
        qualifier: decl.qualifier,
        app_symbolic_name: app.to_string(),
        private: decl.private.unwrap_or(true),
        description: decl.description,
        properties: decl.properties,
    }
}

fn new_intention(app: &str, decl: IntentionDecl) -> Intention {
    Intention {
        id: Uuid::new_v4().to_string(),
        intention_type: decl.intention_type,
        qualifier: decl.qualifier,
        app_symbolic_name: app.to_string(),
    }
}

fn retain_counting<T>(items: &mut Vec<T>, keep: impl FnMut(&T) -> bool) -> usize {
    let before = items.len();
    items.retain(keep);
    before - items.len()
}
