// Plugin discovery, dependency resolution and lifecycle management:
// - Static (linked) and dynamic (libloading) plugin sources
// - Marker check on every exported declaration before any plugin code runs
// - Dependency-ordered loading with reference-counted release
pub mod descriptor;
pub mod discovery;
pub mod lifecycle;
pub mod loader;
pub mod resolver;
pub mod vfs;

pub use descriptor::{
    PluginContext, PluginDeclaration, PluginDescriptor, PluginId, PLUGIN_MARKER, PLUGIN_SYMBOL,
};
pub use discovery::{
    submit_static_plugin, Candidate, DynamicPluginSource, PluginSource, StaticPluginSource,
};
pub use lifecycle::{LoadReport, LoadedPlugin, PluginRegistry};
pub use loader::{LibraryHandle, LibraryLoader, NativeLibraryLoader};
pub use vfs::{DirEntry, MountedFileSystem, VirtualFileSystem, PLUGINS_ROOT};
