//! Plugin descriptor and the exported declaration ABI

use crate::registry::Registrar;
use anyhow::{anyhow, Result};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

/// Stable identity of a plugin
pub type PluginId = Uuid;

/// Marker every [`PluginDeclaration`] must carry.
///
/// Bumped whenever the layout of `PluginDeclaration` or `PluginDescriptor` changes,
/// so binaries built against another version are rejected before any of their code runs.
pub const PLUGIN_MARKER: Uuid = uuid::uuid!("8d2f4c1e-5b7a-4e0c-9f63-1a2b3c4d5e01");

/// Symbol name under which a dynamic library exports its declaration
pub const PLUGIN_SYMBOL: &[u8] = b"MODLOADER_PLUGIN\0";

/// Callback run when a plugin transitions to loaded
pub type RegisterFn = Box<dyn Fn(&mut Registrar<'_>) -> Result<PluginContext> + Send + Sync>;

/// Callback run when a plugin transitions to unloaded
pub type UnregisterFn = Box<dyn Fn(&mut Registrar<'_>, PluginContext) + Send + Sync>;

/// Describes one loadable unit: identity, dependencies and lifecycle callbacks.
///
/// Descriptors are shared through `Arc` and never copied by the registry. A
/// descriptor that came out of a dynamic library is dropped before that library's
/// handle.
pub struct PluginDescriptor {
    identity: PluginId,
    name: String,
    version: String,
    dependencies: Vec<PluginId>,
    on_register: RegisterFn,
    on_unregister: UnregisterFn,
}

impl PluginDescriptor {
    /// Create a descriptor with no dependencies and no-op callbacks
    #[must_use]
    pub fn new(identity: PluginId, name: impl Into<String>) -> Self {
        Self {
            identity,
            name: name.into(),
            version: "0.0.0".to_string(),
            dependencies: Vec::new(),
            on_register: Box::new(|_| Ok(PluginContext::empty())),
            on_unregister: Box::new(|_, _| {}),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add a dependency; repeated identities are kept once
    #[must_use]
    pub fn depends_on(mut self, dependency: PluginId) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    #[must_use]
    pub fn with_dependencies(self, dependencies: impl IntoIterator<Item = PluginId>) -> Self {
        dependencies.into_iter().fold(self, Self::depends_on)
    }

    #[must_use]
    pub fn on_register<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Registrar<'_>) -> Result<PluginContext> + Send + Sync + 'static,
    {
        self.on_register = Box::new(callback);
        self
    }

    #[must_use]
    pub fn on_unregister<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Registrar<'_>, PluginContext) + Send + Sync + 'static,
    {
        self.on_unregister = Box::new(callback);
        self
    }

    #[must_use]
    pub fn identity(&self) -> PluginId {
        self.identity
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn dependencies(&self) -> &[PluginId] {
        &self.dependencies
    }

    pub(crate) fn register(&self, registrar: &mut Registrar<'_>) -> Result<PluginContext> {
        guarded(|| (self.on_register)(registrar))?
    }

    pub(crate) fn unregister(
        &self,
        registrar: &mut Registrar<'_>,
        context: PluginContext,
    ) -> Result<()> {
        guarded(|| (self.on_unregister)(registrar, context))
    }
}

/// Run plugin code, turning a panic into an error
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        anyhow!("panicked: {message}")
    })
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("identity", &self.identity)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Value returned by `on_register` and handed back to `on_unregister`.
///
/// Move-only: the registry owns it while the plugin is loaded and gives it back
/// exactly once.
#[derive(Default)]
pub struct PluginContext(Option<Box<dyn Any + Send>>);

impl PluginContext {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|value| value.downcast_ref())
    }

    /// Take the stored value out, or get the context back if the type does not match
    pub fn downcast<T: Any>(self) -> std::result::Result<Box<T>, Self> {
        match self.0 {
            Some(value) => value.downcast().map_err(|value| Self(Some(value))),
            None => Err(self),
        }
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginContext")
            .field(&if self.is_empty() { "empty" } else { "set" })
            .finish()
    }
}

/// Value a plugin exports at [`PLUGIN_SYMBOL`], or submits to the static registry.
///
/// The loader checks `marker` against [`PLUGIN_MARKER`] before calling `create`.
/// Dynamic plugins must be built with the same toolchain and `modloader` version
/// as the host, since `create` returns a Rust type.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginDeclaration {
    pub marker: Uuid,
    pub create: fn() -> PluginDescriptor,
}

impl PluginDeclaration {
    #[must_use]
    pub const fn new(create: fn() -> PluginDescriptor) -> Self {
        Self {
            marker: PLUGIN_MARKER,
            create,
        }
    }

    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.marker == PLUGIN_MARKER
    }
}

impl fmt::Debug for PluginDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDeclaration")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

/// Export a plugin from a `cdylib` crate.
///
/// ```ignore
/// fn create() -> modloader::plugins::PluginDescriptor {
///     modloader::plugins::PluginDescriptor::new(MY_ID, "ImgPng")
/// }
/// modloader::export_plugin!(create);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($create:path) => {
        #[no_mangle]
        pub static MODLOADER_PLUGIN: $crate::plugins::PluginDeclaration =
            $crate::plugins::PluginDeclaration::new($create);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create() -> PluginDescriptor {
        PluginDescriptor::new(Uuid::from_u128(7), "Example")
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let descriptor = PluginDescriptor::new(Uuid::from_u128(3), "Resources")
            .depends_on(a)
            .with_dependencies([b, a]);
        assert_eq!(descriptor.dependencies(), &[a, b]);
        assert_eq!(descriptor.version(), "0.0.0");
    }

    #[test]
    fn test_context_downcast() {
        let context = PluginContext::new(42u32);
        assert_eq!(context.downcast_ref::<u32>(), Some(&42));
        let context = context.downcast::<String>().unwrap_err();
        assert_eq!(*context.downcast::<u32>().unwrap(), 42);

        let empty = PluginContext::empty();
        assert!(empty.is_empty());
        assert!(empty.downcast::<u32>().is_err());
    }

    #[test]
    fn test_declaration_marker() {
        let declaration = PluginDeclaration::new(create);
        assert!(declaration.is_compatible());
        assert_eq!((declaration.create)().name(), "Example");

        let foreign = PluginDeclaration {
            marker: Uuid::nil(),
            create,
        };
        assert!(!foreign.is_compatible());
    }

    #[test]
    fn test_guarded_catches_panics() {
        assert_eq!(guarded(|| 7).unwrap(), 7);

        let err = guarded(|| -> u32 { panic!("device lost") }).unwrap_err();
        assert!(err.to_string().contains("device lost"));

        let code = 3;
        let err = guarded(|| -> u32 { panic!("exit code {code}") }).unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }
}
