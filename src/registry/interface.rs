//! Interface type registry.
//!
//! Entries are kept sorted by identity so lookups are a binary search. Several
//! entries may share an identity; they stay in registration order, `lookup`
//! returns the first one (earliest registrant wins) and `unregister` removes the
//! first one.
//!
//! Values come back wrapped in [`Shared`] or [`Instance`], which keep the
//! registering plugin's library mapped for as long as they live.

use crate::plugins::PluginId;
use crate::registry::handle::{Instance, KeepAlive, Shared};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identity of an interface type
pub type InterfaceId = Uuid;

/// Returns the shared interface object
pub type Accessor = Box<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// Creates a new instance owned by the caller
pub type Factory = Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

pub struct InterfaceTypeEntry {
    identity: InterfaceId,
    owner: Option<PluginId>,
    accessor: Accessor,
    factory: Option<Factory>,
    // Dropped after the closures above
    library: KeepAlive,
}

impl InterfaceTypeEntry {
    pub fn new<F>(identity: InterfaceId, accessor: F) -> Self
    where
        F: Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync + 'static,
    {
        Self {
            identity,
            owner: None,
            accessor: Box::new(accessor),
            factory: None,
            library: None,
        }
    }

    /// Entry whose accessor always hands out `instance`
    pub fn singleton<T: Any + Send + Sync>(identity: InterfaceId, instance: Arc<T>) -> Self {
        Self::new(identity, move || Arc::clone(&instance) as Arc<dyn Any + Send + Sync>)
    }

    #[must_use]
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Any + Send> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    pub(crate) fn owned_by(mut self, owner: PluginId, library: KeepAlive) -> Self {
        self.owner = Some(owner);
        self.library = library;
        self
    }

    #[must_use]
    pub fn identity(&self) -> InterfaceId {
        self.identity
    }

    /// Plugin that registered this entry, `None` for host registrations
    #[must_use]
    pub fn owner(&self) -> Option<PluginId> {
        self.owner
    }

    #[must_use]
    pub fn get(&self) -> Shared<dyn Any + Send + Sync> {
        Shared::new((self.accessor)(), self.library.clone())
    }

    #[must_use]
    pub fn get_as<T: Any + Send + Sync>(&self) -> Option<Shared<T>> {
        self.get().downcast().ok()
    }

    #[must_use]
    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    #[must_use]
    pub fn create(&self) -> Option<Instance<dyn Any + Send>> {
        self.factory
            .as_ref()
            .map(|factory| Instance::new(factory(), self.library.clone()))
    }
}

impl fmt::Debug for InterfaceTypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceTypeEntry")
            .field("identity", &self.identity)
            .field("owner", &self.owner)
            .field("factory", &self.has_factory())
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct InterfaceTypeRegistry {
    entries: Vec<InterfaceTypeEntry>,
}

impl InterfaceTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first entry with this identity, or where it would go
    fn lower_bound(&self, identity: InterfaceId) -> usize {
        self.entries.partition_point(|e| e.identity < identity)
    }

    /// Insert after any entries with the same identity
    pub fn register(&mut self, entry: InterfaceTypeEntry) {
        let at = self.entries.partition_point(|e| e.identity <= entry.identity);
        self.entries.insert(at, entry);
    }

    /// Remove the first entry with this identity
    pub fn unregister(&mut self, identity: InterfaceId) -> Option<InterfaceTypeEntry> {
        let at = self.lower_bound(identity);
        match self.entries.get(at) {
            Some(entry) if entry.identity == identity => Some(self.entries.remove(at)),
            _ => None,
        }
    }

    /// Remove the first entry with this identity registered by `owner`
    pub(crate) fn unregister_owned(
        &mut self,
        identity: InterfaceId,
        owner: PluginId,
    ) -> Option<InterfaceTypeEntry> {
        let start = self.lower_bound(identity);
        let offset = self.entries[start..]
            .iter()
            .take_while(|e| e.identity == identity)
            .position(|e| e.owner == Some(owner))?;
        Some(self.entries.remove(start + offset))
    }

    /// Remove everything `owner` left behind
    pub(crate) fn remove_owned_by(&mut self, owner: PluginId) -> Vec<InterfaceTypeEntry> {
        let (removed, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.owner == Some(owner));
        self.entries = kept;
        removed
    }

    #[must_use]
    pub fn lookup(&self, identity: InterfaceId) -> Option<&InterfaceTypeEntry> {
        self.entries
            .get(self.lower_bound(identity))
            .filter(|entry| entry.identity == identity)
    }

    /// All entries, sorted by identity
    #[must_use]
    pub fn entries(&self) -> &[InterfaceTypeEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
