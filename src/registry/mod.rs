//! Interface and type info registries, and the [`Registrar`] plugins use to reach them.

pub mod handle;
pub mod interface;
pub mod type_info;

pub use handle::{Instance, Shared};
pub use interface::{InterfaceId, InterfaceTypeEntry, InterfaceTypeRegistry};
pub use type_info::{
    CategoryId, ListenerId, TypeInfo, TypeInfoEvent, TypeInfoEventKind, TypeInfoListener,
    TypeInfoRecord, TypeInfoRegistry,
};

use crate::plugins::PluginId;
use handle::KeepAlive;
use std::any::Any;
use std::sync::Arc;

/// Handed to a plugin's lifecycle callbacks.
///
/// Everything registered through it is tagged with the plugin's identity, so the
/// registry can clean up whatever the plugin forgets to unregister, and with the
/// plugin's library, so handles to it keep that library mapped.
pub struct Registrar<'a> {
    plugin: PluginId,
    library: KeepAlive,
    interfaces: &'a mut InterfaceTypeRegistry,
    type_info: &'a mut TypeInfoRegistry,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(
        plugin: PluginId,
        library: KeepAlive,
        interfaces: &'a mut InterfaceTypeRegistry,
        type_info: &'a mut TypeInfoRegistry,
    ) -> Self {
        Self {
            plugin,
            library,
            interfaces,
            type_info,
        }
    }

    /// Identity of the plugin being registered or unregistered
    #[must_use]
    pub fn plugin(&self) -> PluginId {
        self.plugin
    }

    pub fn register_interface_type(&mut self, entry: InterfaceTypeEntry) {
        self.interfaces
            .register(entry.owned_by(self.plugin, self.library.clone()));
    }

    /// Remove the first entry with this identity that this plugin registered
    pub fn unregister_interface_type(&mut self, identity: InterfaceId) -> bool {
        self.interfaces
            .unregister_owned(identity, self.plugin)
            .is_some()
    }

    #[must_use]
    pub fn lookup_interface(&self, identity: InterfaceId) -> Option<&InterfaceTypeEntry> {
        self.interfaces.lookup(identity)
    }

    /// Typed access to an interface, typically one provided by a dependency
    #[must_use]
    pub fn get_interface<T: Any + Send + Sync>(&self, identity: InterfaceId) -> Option<Shared<T>> {
        self.lookup_interface(identity)?.get_as()
    }

    pub fn register_type_info(&mut self, category: CategoryId, info: Arc<TypeInfo>) {
        self.type_info
            .register_owned(category, info, Some(self.plugin), self.library.clone());
    }

    /// Remove an entry this plugin registered
    pub fn unregister_type_info(&mut self, category: CategoryId, info: &TypeInfo) -> bool {
        self.type_info
            .unregister_owned(category, info, self.plugin)
    }

    #[must_use]
    pub fn query_type_info(&self, category: CategoryId) -> Vec<Shared<TypeInfo>> {
        self.type_info.query(category)
    }
}
