use crate::error::{RegistryError, Result};
use crate::plugins::descriptor::{PluginDeclaration, PLUGIN_SYMBOL};
use libloading::{Library, Symbol};
use std::path::Path;
use tracing::debug;

/// An opened plugin library.
///
/// Owns the mapping of the shared object; the declaration it hands out is only
/// valid while the handle is alive. The registry shares it through an `Arc` with
/// every value the plugin registered.
pub trait LibraryHandle: Send + Sync {
    /// The declaration exported by the library
    fn declaration(&self) -> &PluginDeclaration;
}

/// Opens plugin libraries
pub trait LibraryLoader {
    /// Open the library at `path` and resolve its exported declaration
    ///
    /// # Errors
    /// Returns [`RegistryError::UnreadableCandidate`] if the library cannot be
    /// opened or does not export [`PLUGIN_SYMBOL`]
    fn load(&self, path: &Path) -> Result<Box<dyn LibraryHandle>>;
}

/// Loader backed by the platform dynamic linker
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLibraryLoader;

/// A shared library opened through [`NativeLibraryLoader`]
pub struct NativeLibrary {
    /// Points into `library`'s data segment
    declaration: *const PluginDeclaration,
    #[allow(dead_code)]
    library: Library,
}

// Safety: the declaration is a `static` inside the library and is only read;
// the pointer stays valid for as long as `library` is mapped, which is the
// lifetime of this value.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl LibraryHandle for NativeLibrary {
    fn declaration(&self) -> &PluginDeclaration {
        // Safety: checked non-null in `NativeLibraryLoader::load`, and the
        // library outlives the returned borrow
        unsafe { &*self.declaration }
    }
}

impl LibraryLoader for NativeLibraryLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn LibraryHandle>> {
        // Safety: opening a library runs its initializers. Plugins are trusted
        // to be built against the same modloader version; the marker check in
        // discovery rejects foreign binaries before `create` is called.
        unsafe {
            let library =
                Library::new(path).map_err(|e| RegistryError::unreadable(path, e))?;

            let declaration = {
                let symbol: Symbol<*const PluginDeclaration> = library
                    .get(PLUGIN_SYMBOL)
                    .map_err(|e| RegistryError::unreadable(path, e))?;
                *symbol
            };

            if declaration.is_null() {
                return Err(RegistryError::unreadable(
                    path,
                    "exported declaration is a null pointer",
                ));
            }

            debug!("Opened plugin library {}", path.display());
            Ok(Box::new(NativeLibrary {
                declaration,
                library,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_unreadable() {
        let loader = NativeLibraryLoader;
        let result = loader.load(Path::new("/nonexistent/libnothing.so"));
        match result {
            Err(RegistryError::UnreadableCandidate { path, .. }) => {
                assert_eq!(path, Path::new("/nonexistent/libnothing.so"));
            }
            _ => panic!("expected an unreadable candidate"),
        }
    }

    #[test]
    fn test_non_library_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("libfake{}", std::env::consts::DLL_SUFFIX));
        std::fs::write(&path, b"not a shared object").unwrap();

        let result = NativeLibraryLoader.load(&path);
        assert!(matches!(
            result,
            Err(RegistryError::UnreadableCandidate { .. })
        ));
    }
}
