//! Catalog resolvers used by selectors.

use crate::scheduler::cluster::ClusterSnapshot;

/// Resolves names and capabilities against a scoped slice of the catalog.
pub trait Resolver {
    /// The named resource exists in scope.
    fn find(&self, name: &str) -> bool;
    /// Names of in-scope resources advertising the capability.
    fn match_capability(&self, capability: &str) -> Vec<String>;
}

/// Resolves addons scoped to a task kind.
pub struct AddonResolver<'a> {
    addons: Vec<(&'a str, &'a str)>,
}

impl<'a> AddonResolver<'a> {
    /// Addons serving `task`, in catalog (name) order.
    pub fn new(snapshot: &'a ClusterSnapshot, task: &str) -> Self {
        let addons = snapshot
            .addons
            .iter()
            .filter(|(_, addon)| addon.spec.task == task)
            .map(|(name, addon)| (name.as_str(), addon.spec.capability.as_str()))
            .collect();
        Self { addons }
    }
}

impl Resolver for AddonResolver<'_> {
    fn find(&self, name: &str) -> bool {
        self.addons.iter().any(|(n, _)| *n == name)
    }

    fn match_capability(&self, capability: &str) -> Vec<String> {
        self.addons
            .iter()
            .filter(|(_, c)| *c == capability)
            .map(|(n, _)| n.to_string())
            .collect()
    }
}

/// Resolves extensions scoped to an addon.
pub struct ExtensionResolver<'a> {
    extensions: Vec<(&'a str, &'a str)>,
}

impl<'a> ExtensionResolver<'a> {
    /// Extensions declaring `addon`, in catalog (name) order.
    pub fn new(snapshot: &'a ClusterSnapshot, addon: &str) -> Self {
        let extensions = snapshot
            .extensions
            .iter()
            .filter(|(_, extension)| extension.spec.addon == addon)
            .map(|(name, extension)| (name.as_str(), extension.spec.capability.as_str()))
            .collect();
        Self { extensions }
    }
}

impl Resolver for ExtensionResolver<'_> {
    fn find(&self, name: &str) -> bool {
        self.extensions.iter().any(|(n, _)| *n == name)
    }

    fn match_capability(&self, capability: &str) -> Vec<String> {
        self.extensions
            .iter()
            .filter(|(_, c)| *c == capability)
            .map(|(n, _)| n.to_string())
            .collect()
    }
}
