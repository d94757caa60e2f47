//! Candidate discovery.
//!
//! Two kinds of sources feed the resolver:
//!
//! - [`StaticPluginSource`]: plugins compiled into the host, submitted through
//!   [`submit_static_plugin`] during startup or handed over explicitly.
//! - [`DynamicPluginSource`]: shared libraries found under `plugins://`.
//!
//! Discovery never fails as a whole. A candidate that cannot be read is logged
//! and skipped.

use crate::error::{RegistryError, Result};
use crate::plugins::descriptor::{guarded, PluginDeclaration, PluginDescriptor};
use crate::plugins::loader::{LibraryHandle, LibraryLoader, NativeLibraryLoader};
use crate::plugins::vfs::{MountedFileSystem, VirtualFileSystem, PLUGINS_ROOT};
use once_cell::sync::Lazy;
use std::env::consts::DLL_SUFFIX;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Declarations linked into this process
static LINKED_PLUGINS: Lazy<Mutex<Vec<PluginDeclaration>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Add a plugin compiled into the binary to the process-wide static registry
pub fn submit_static_plugin(declaration: PluginDeclaration) {
    LINKED_PLUGINS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(declaration);
}

/// Snapshot of the process-wide static registry
#[must_use]
pub fn linked_plugins() -> Vec<PluginDeclaration> {
    LINKED_PLUGINS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// A discovered plugin, ready to be resolved and registered
pub struct Candidate {
    // Field order matters: the descriptor holds code from the library and must
    // drop first.
    pub(crate) descriptor: Arc<PluginDescriptor>,
    pub(crate) library: Option<Arc<dyn LibraryHandle>>,
}

impl Candidate {
    /// A plugin compiled into the host
    #[must_use]
    pub fn linked(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            library: None,
        }
    }

    /// A plugin whose code lives in `library`
    #[must_use]
    pub fn dynamic(descriptor: PluginDescriptor, library: Arc<dyn LibraryHandle>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            library: Some(library),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("descriptor", &self.descriptor)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

/// Something that can produce plugin candidates
pub trait PluginSource {
    /// Short label used in log output
    fn label(&self) -> &str;

    /// Collect every readable candidate
    fn gather(&self) -> Vec<Candidate>;
}

enum StaticEntries {
    Linked,
    Declarations(Vec<PluginDeclaration>),
    Descriptors(Vec<Arc<PluginDescriptor>>),
}

/// Plugins compiled into the host
pub struct StaticPluginSource {
    entries: StaticEntries,
}

impl StaticPluginSource {
    /// Read the process-wide registry filled by [`submit_static_plugin`]
    #[must_use]
    pub fn linked() -> Self {
        Self {
            entries: StaticEntries::Linked,
        }
    }

    /// Use an explicit declaration table instead of the process-wide registry
    #[must_use]
    pub fn from_declarations(declarations: Vec<PluginDeclaration>) -> Self {
        Self {
            entries: StaticEntries::Declarations(declarations),
        }
    }

    /// Use already-built descriptors, e.g. ones whose callbacks capture host state
    #[must_use]
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = PluginDescriptor>) -> Self {
        Self {
            entries: StaticEntries::Descriptors(descriptors.into_iter().map(Arc::new).collect()),
        }
    }

    fn from_table(declarations: &[PluginDeclaration]) -> Vec<Candidate> {
        declarations
            .iter()
            .filter(|declaration| {
                let compatible = declaration.is_compatible();
                if !compatible {
                    warn!(
                        "Ignoring static plugin entry with foreign marker {}",
                        declaration.marker
                    );
                }
                compatible
            })
            .filter_map(|declaration| match guarded(declaration.create) {
                Ok(descriptor) => Some(Candidate::linked(descriptor)),
                Err(e) => {
                    warn!("Ignoring static plugin entry: create {:#}", e);
                    None
                }
            })
            .collect()
    }
}

impl PluginSource for StaticPluginSource {
    fn label(&self) -> &str {
        "static"
    }

    fn gather(&self) -> Vec<Candidate> {
        match &self.entries {
            StaticEntries::Linked => Self::from_table(&linked_plugins()),
            StaticEntries::Declarations(declarations) => Self::from_table(declarations),
            StaticEntries::Descriptors(descriptors) => descriptors
                .iter()
                .map(|descriptor| Candidate {
                    descriptor: Arc::clone(descriptor),
                    library: None,
                })
                .collect(),
        }
    }
}

/// Shared libraries found in a virtual directory
pub struct DynamicPluginSource {
    vfs: Box<dyn VirtualFileSystem>,
    loader: Box<dyn LibraryLoader>,
    root: String,
}

impl DynamicPluginSource {
    #[must_use]
    pub fn new(vfs: Box<dyn VirtualFileSystem>, loader: Box<dyn LibraryLoader>) -> Self {
        Self {
            vfs,
            loader,
            root: PLUGINS_ROOT.to_string(),
        }
    }

    /// Scan `dir` through the platform dynamic linker
    #[must_use]
    pub fn from_directory(dir: impl Into<PathBuf>) -> Self {
        let mut vfs = MountedFileSystem::new();
        vfs.mount(PLUGINS_ROOT, dir);
        Self::new(Box::new(vfs), Box::new(NativeLibraryLoader))
    }

    /// Scan another virtual directory than `plugins://`
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    fn open(&self, path: &Path) -> Result<Candidate> {
        let library: Arc<dyn LibraryHandle> = Arc::from(self.loader.load(path)?);
        let declaration = *library.declaration();
        if !declaration.is_compatible() {
            return Err(RegistryError::unreadable(
                path,
                format!("marker {} does not match this host", declaration.marker),
            ));
        }

        let descriptor = guarded(declaration.create)
            .map_err(|e| RegistryError::unreadable(path, format!("create {e:#}")))?;
        Ok(Candidate::dynamic(descriptor, library))
    }
}

impl PluginSource for DynamicPluginSource {
    fn label(&self) -> &str {
        &self.root
    }

    fn gather(&self) -> Vec<Candidate> {
        let entries = match self.vfs.open_directory(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Plugin location {} does not exist, skipping", self.root);
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to list plugin location {}: {}", self.root, e);
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for entry in entries
            .into_iter()
            .filter(|entry| entry.is_file && entry.name.ends_with(DLL_SUFFIX))
        {
            let uri = format!("{}{}", self.root, entry.name);
            let Some(path) = self.vfs.get_entry(&uri) else {
                warn!("Skipping plugin candidate {}: cannot resolve path", uri);
                continue;
            };

            match self.open(&path) {
                Ok(candidate) => {
                    debug!(
                        "Discovered dynamic plugin '{}' ({}) at {}",
                        candidate.descriptor.name(),
                        candidate.descriptor.identity(),
                        path.display()
                    );
                    candidates.push(candidate);
                }
                Err(e) => warn!("Skipping plugin candidate: {}", e),
            }
        }
        candidates
    }
}
