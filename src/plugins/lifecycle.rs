//! Plugin lifecycle: load in dependency order, reference-counted unload.

use crate::config::Config;
use crate::error::{RegistryError, Result};
use crate::plugins::descriptor::{PluginContext, PluginDescriptor, PluginId};
use crate::plugins::discovery::{Candidate, DynamicPluginSource, PluginSource, StaticPluginSource};
use crate::plugins::loader::LibraryHandle;
use crate::plugins::resolver::resolve;
use crate::registry::{
    CategoryId, Instance, InterfaceId, InterfaceTypeEntry, InterfaceTypeRegistry, ListenerId,
    Registrar, Shared, TypeInfo, TypeInfoListener, TypeInfoRegistry,
};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A plugin that is currently loaded
struct LoadedEntry {
    descriptor: Arc<PluginDescriptor>,
    /// Taken when the plugin is unregistered
    context: Option<PluginContext>,
    /// Explicit pin plus one per loaded dependent
    refcount: i32,
    pinned: bool,
    library: Option<Arc<dyn LibraryHandle>>,
}

impl LoadedEntry {
    fn identity(&self) -> PluginId {
        self.descriptor.identity()
    }
}

/// Snapshot of a loaded plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedPlugin {
    pub identity: PluginId,
    pub name: String,
    pub version: String,
    pub refcount: i32,
    pub dynamic: bool,
}

/// Outcome of a successful [`PluginRegistry::try_load`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Newly loaded, in load order
    pub loaded: Vec<PluginId>,
    /// Skipped because a plugin with the same name is already loaded
    pub duplicates: Vec<PluginId>,
    /// Skipped because their callback failed or a dependency did not load
    pub failed: Vec<PluginId>,
}

impl LoadReport {
    /// Whether every scheduled plugin made it
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.duplicates.is_empty() && self.failed.is_empty()
    }
}

/// The plugin registry.
///
/// Owned by the host and passed to whoever needs it; there is no global instance.
/// Not synchronized: loading and unloading must happen from one thread at a time.
pub struct PluginRegistry {
    sources: Vec<Box<dyn PluginSource>>,
    loaded: Vec<LoadedEntry>,
    interfaces: InterfaceTypeRegistry,
    type_info: TypeInfoRegistry,
}

impl PluginRegistry {
    /// Create a registry without plugin sources
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            loaded: Vec::new(),
            interfaces: InterfaceTypeRegistry::new(),
            type_info: TypeInfoRegistry::new(),
        }
    }

    /// Create a registry with the sources enabled in `config`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        if config.include_static {
            registry.add_source(Box::new(StaticPluginSource::linked()));
        }
        if config.scan_dynamic {
            registry.add_source(Box::new(DynamicPluginSource::from_directory(
                config.plugins_dir(),
            )));
        }
        registry
    }

    /// Add a candidate source. Sources are consulted in the order they were added.
    pub fn add_source(&mut self, source: Box<dyn PluginSource>) {
        self.sources.push(source);
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn PluginSource>) -> Self {
        self.add_source(source);
        self
    }

    /// Load the given plugins and everything they depend on.
    ///
    /// An empty set loads every discovered plugin that can be loaded. Returns
    /// false if the request could not be resolved, in which case nothing changed.
    pub fn load(&mut self, identities: &[PluginId]) -> bool {
        self.try_load(identities).is_ok()
    }

    /// Like [`load`](Self::load), reporting what happened.
    ///
    /// # Errors
    /// Returns the first resolution failure: [`RegistryError::MissingPlugin`],
    /// [`RegistryError::MissingDependency`] or [`RegistryError::DependencyCycle`].
    /// Callback failures do not fail the call; they show up in [`LoadReport::failed`].
    pub fn try_load(&mut self, identities: &[PluginId]) -> Result<LoadReport> {
        let candidates = self.gather();
        let order = {
            let available: Vec<&PluginDescriptor> =
                candidates.iter().map(|c| c.descriptor.as_ref()).collect();
            resolve(identities, &available, &self.list_loaded())?
        };

        for &identity in identities {
            if let Some(entry) = self.entry_mut(identity) {
                if !entry.pinned {
                    entry.pinned = true;
                    entry.refcount += 1;
                    debug!("Pinned already loaded plugin '{}'", entry.descriptor.name());
                }
            }
        }

        let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
        let mut report = LoadReport::default();
        let first_new = self.loaded.len();

        self.type_info.begin_batch();
        for identity in order {
            let Some(candidate) = slots
                .iter_mut()
                .find(|slot| {
                    slot.as_ref()
                        .is_some_and(|c| c.descriptor.identity() == identity)
                })
                .and_then(Option::take)
            else {
                continue;
            };

            if let Some(existing) = self
                .loaded
                .iter()
                .find(|e| e.descriptor.name() == candidate.descriptor.name())
            {
                let duplicate = RegistryError::DuplicatePlugin {
                    name: candidate.descriptor.name().to_string(),
                    identity: existing.identity(),
                };
                warn!("Skipping plugin {}: {}", identity, duplicate);
                report.duplicates.push(identity);
                continue;
            }

            if let Some(missing) = candidate
                .descriptor
                .dependencies()
                .iter()
                .find(|dependency| !self.is_loaded(**dependency))
            {
                warn!(
                    "Skipping plugin '{}': dependency {} did not load",
                    candidate.descriptor.name(),
                    missing
                );
                report.failed.push(identity);
                continue;
            }

            let pinned = identities.contains(&identity);
            match self.register(candidate, pinned) {
                Ok(()) => report.loaded.push(identity),
                Err(e) => {
                    error!("{}", e);
                    report.failed.push(identity);
                }
            }
        }

        for index in first_new..self.loaded.len() {
            let dependencies = self.loaded[index].descriptor.dependencies().to_vec();
            for dependency in dependencies {
                if let Some(entry) = self.entry_mut(dependency) {
                    entry.refcount += 1;
                }
            }
        }
        self.type_info.flush_batch();

        if !report.loaded.is_empty() {
            info!("Loaded {} plugin(s)", report.loaded.len());
        }
        Ok(report)
    }

    /// Release plugins.
    ///
    /// An empty set unloads everything in reverse load order, ignoring reference
    /// counts. Otherwise each listed plugin loses its pin; a plugin whose count
    /// drops to zero releases its dependencies in turn, and everything left at
    /// zero is unloaded, dependents first.
    pub fn unload(&mut self, identities: &[PluginId]) {
        if identities.is_empty() {
            self.unload_all();
            return;
        }

        for &identity in identities {
            if self.entry_mut(identity).is_none() {
                warn!("Cannot unload plugin {}: not loaded", identity);
                continue;
            }
            self.release(identity);
        }

        for index in (0..self.loaded.len()).rev() {
            if self.loaded[index].refcount <= 0 {
                let entry = self.loaded.remove(index);
                self.teardown(entry);
            }
        }
    }

    fn release(&mut self, identity: PluginId) {
        let mut stack = vec![(identity, true)];
        while let Some((identity, explicit)) = stack.pop() {
            let Some(entry) = self.entry_mut(identity) else {
                continue;
            };
            if explicit {
                entry.pinned = false;
            }
            let was_held = entry.refcount > 0;
            entry.refcount -= 1;
            debug!(
                "Released plugin '{}', refcount now {}",
                entry.descriptor.name(),
                entry.refcount
            );
            if was_held && entry.refcount <= 0 {
                stack.extend(
                    entry
                        .descriptor
                        .dependencies()
                        .iter()
                        .rev()
                        .map(|&dependency| (dependency, false)),
                );
            }
        }
    }

    fn unload_all(&mut self) {
        while let Some(entry) = self.loaded.pop() {
            self.teardown(entry);
        }
    }

    fn register(&mut self, candidate: Candidate, pinned: bool) -> Result<()> {
        let Candidate {
            descriptor,
            library,
        } = candidate;
        let identity = descriptor.identity();

        let result = {
            let mut registrar = Registrar::new(
                identity,
                library.clone(),
                &mut self.interfaces,
                &mut self.type_info,
            );
            descriptor.register(&mut registrar)
        };

        match result {
            Ok(context) => {
                info!(
                    "Loaded plugin '{}' v{} ({})",
                    descriptor.name(),
                    descriptor.version(),
                    identity
                );
                self.loaded.push(LoadedEntry {
                    descriptor,
                    context: Some(context),
                    refcount: i32::from(pinned),
                    pinned,
                    library,
                });
                Ok(())
            }
            Err(source) => {
                let name = descriptor.name().to_string();
                self.purge(identity, &name);
                drop(descriptor);
                drop(library);
                Err(RegistryError::Callback { name, source })
            }
        }
    }

    fn teardown(&mut self, mut entry: LoadedEntry) {
        let identity = entry.identity();
        let name = entry.descriptor.name().to_string();
        let context = entry.context.take().unwrap_or_default();
        let result = {
            let mut registrar = Registrar::new(
                identity,
                entry.library.clone(),
                &mut self.interfaces,
                &mut self.type_info,
            );
            entry.descriptor.unregister(&mut registrar, context)
        };
        if let Err(e) = result {
            error!("Plugin '{}' failed to unregister: {:#}", name, e);
        }
        self.purge(identity, &name);

        // No code from the plugin may run once its library is unmapped. Handles
        // given out earlier hold their own reference and keep it mapped.
        let LoadedEntry {
            descriptor,
            library,
            ..
        } = entry;
        drop(descriptor);
        if let Some(library) = library {
            let holders = Arc::strong_count(&library) - 1;
            if holders > 0 {
                debug!(
                    "Library of plugin '{}' stays mapped for {} outstanding handle(s)",
                    name, holders
                );
            }
        }
        info!("Unloaded plugin '{}' ({})", name, identity);
    }

    /// Drop whatever `identity` still has registered
    fn purge(&mut self, identity: PluginId, name: &str) {
        let interfaces = self.interfaces.remove_owned_by(identity).len();
        let type_info = self.type_info.remove_owned_by(identity);
        if interfaces + type_info > 0 {
            warn!(
                "Plugin '{}' left {} interface type(s) and {} type info entr(ies) registered; removed",
                name, interfaces, type_info
            );
        }
    }

    fn gather(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for source in &self.sources {
            let found = source.gather();
            debug!("Source {} offered {} plugin(s)", source.label(), found.len());
            candidates.extend(found);
        }
        candidates
    }

    fn entry(&self, identity: PluginId) -> Option<&LoadedEntry> {
        self.loaded.iter().find(|e| e.identity() == identity)
    }

    fn entry_mut(&mut self, identity: PluginId) -> Option<&mut LoadedEntry> {
        self.loaded.iter_mut().find(|e| e.identity() == identity)
    }

    /// Identities of the loaded plugins, in load order
    #[must_use]
    pub fn list_loaded(&self) -> Vec<PluginId> {
        self.loaded.iter().map(LoadedEntry::identity).collect()
    }

    #[must_use]
    pub fn loaded_plugins(&self) -> Vec<LoadedPlugin> {
        self.loaded
            .iter()
            .map(|entry| LoadedPlugin {
                identity: entry.identity(),
                name: entry.descriptor.name().to_string(),
                version: entry.descriptor.version().to_string(),
                refcount: entry.refcount,
                dynamic: entry.library.is_some(),
            })
            .collect()
    }

    #[must_use]
    pub fn is_loaded(&self, identity: PluginId) -> bool {
        self.entry(identity).is_some()
    }

    #[must_use]
    pub fn refcount(&self, identity: PluginId) -> Option<i32> {
        self.entry(identity).map(|e| e.refcount)
    }

    pub fn register_interface_type(&mut self, entry: InterfaceTypeEntry) {
        self.interfaces.register(entry);
    }

    pub fn unregister_interface_type(&mut self, identity: InterfaceId) -> bool {
        self.interfaces.unregister(identity).is_some()
    }

    #[must_use]
    pub fn lookup_interface(&self, identity: InterfaceId) -> Option<&InterfaceTypeEntry> {
        self.interfaces.lookup(identity)
    }

    #[must_use]
    pub fn get_interface<T: Any + Send + Sync>(&self, identity: InterfaceId) -> Option<Shared<T>> {
        self.lookup_interface(identity)?.get_as()
    }

    /// Create a new instance through the interface's factory
    #[must_use]
    pub fn create_instance(&self, identity: InterfaceId) -> Option<Instance<dyn Any + Send>> {
        self.lookup_interface(identity)?.create()
    }

    #[must_use]
    pub fn create_instance_as<T: Any + Send>(&self, identity: InterfaceId) -> Option<Instance<T>> {
        self.create_instance(identity)?.downcast().ok()
    }

    /// All interface types, sorted by identity
    #[must_use]
    pub fn interface_types(&self) -> &[InterfaceTypeEntry] {
        self.interfaces.entries()
    }

    pub fn register_type_info(&mut self, category: CategoryId, info: Arc<TypeInfo>) {
        self.type_info.register(category, info);
    }

    pub fn unregister_type_info(&mut self, category: CategoryId, info: &TypeInfo) -> bool {
        self.type_info.unregister(category, info)
    }

    #[must_use]
    pub fn query_type_info(&self, category: CategoryId) -> Vec<Shared<TypeInfo>> {
        self.type_info.query(category)
    }

    pub fn add_listener<L>(&mut self, listener: &Arc<L>) -> ListenerId
    where
        L: TypeInfoListener + 'static,
    {
        self.type_info.add_listener(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.type_info.remove_listener(id)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.unload_all();
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("sources", &self.sources.len())
            .field("loaded", &self.list_loaded())
            .field("interfaces", &self.interfaces.len())
            .field("type_info", &self.type_info)
            .finish()
    }
}
