//! Handles to values that may have been built by plugin code.
//!
//! A value created inside a plugin library carries that library's vtables and
//! drop glue. Every handle the registry gives out holds the library alongside the
//! value, so the library stays mapped until the last handle is gone, even after
//! the plugin itself was unloaded. Host-provided values carry no library.
//!
//! Handles only lend the value out. Anything the caller copies out of it (an
//! `Arc` stored inside the payload, a `&'static str` pointing into the library)
//! is not covered.

use crate::plugins::loader::LibraryHandle;
use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// The library a value's code lives in, `None` for the host
pub(crate) type KeepAlive = Option<Arc<dyn LibraryHandle>>;

/// Shared, read-only access to a registered value
pub struct Shared<T: ?Sized> {
    // Field order matters: the value drops before the library
    value: Arc<T>,
    library: KeepAlive,
}

impl<T: ?Sized> Shared<T> {
    pub(crate) fn new(value: Arc<T>, library: KeepAlive) -> Self {
        Self { value, library }
    }

    /// Whether the value came out of a dynamically loaded library
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    /// Whether both handles point at the same value
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.value, &other.value)
    }
}

impl Shared<dyn Any + Send + Sync> {
    /// Recover the concrete type
    ///
    /// # Errors
    /// Returns the handle unchanged if the value is not a `T`
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<Shared<T>, Self> {
        let Self { value, library } = self;
        match value.downcast() {
            Ok(value) => Ok(Shared { value, library }),
            Err(value) => Err(Self { value, library }),
        }
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            library: self.library.clone(),
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &&*self.value)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

/// A fresh instance made by an interface factory, owned by the caller
pub struct Instance<T: ?Sized> {
    value: Box<T>,
    library: KeepAlive,
}

impl<T: ?Sized> Instance<T> {
    pub(crate) fn new(value: Box<T>, library: KeepAlive) -> Self {
        Self { value, library }
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl Instance<dyn Any + Send> {
    /// Recover the concrete type
    ///
    /// # Errors
    /// Returns the instance unchanged if it is not a `T`
    pub fn downcast<T: Any + Send>(self) -> Result<Instance<T>, Self> {
        let Self { value, library } = self;
        match value.downcast() {
            Ok(value) => Ok(Instance { value, library }),
            Err(value) => Err(Self { value, library }),
        }
    }
}

impl<T: ?Sized> Deref for Instance<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized> DerefMut for Instance<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("value", &&*self.value)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::descriptor::{PluginDeclaration, PluginDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn create() -> PluginDescriptor {
        PluginDescriptor::new(Uuid::from_u128(1), "Counted")
    }

    struct CountedLibrary {
        declaration: PluginDeclaration,
        drops: Arc<AtomicUsize>,
    }

    impl LibraryHandle for CountedLibrary {
        fn declaration(&self) -> &PluginDeclaration {
            &self.declaration
        }
    }

    impl Drop for CountedLibrary {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn library(drops: &Arc<AtomicUsize>) -> KeepAlive {
        Some(Arc::new(CountedLibrary {
            declaration: PluginDeclaration::new(create),
            drops: Arc::clone(drops),
        }))
    }

    #[test]
    fn test_last_handle_releases_library() {
        let drops = Arc::new(AtomicUsize::new(0));
        let shared = Shared::new(Arc::new(5u32) as Arc<dyn Any + Send + Sync>, library(&drops));
        let typed = shared.clone().downcast::<u32>().unwrap();
        drop(shared);
        assert_eq!(*typed, 5);
        assert!(typed.is_dynamic());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(typed);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_downcast_keeps_library() {
        let drops = Arc::new(AtomicUsize::new(0));
        let instance = Instance::new(Box::new(vec![1u8]) as Box<dyn Any + Send>, library(&drops));
        let mut instance = instance.downcast::<String>().unwrap_err().downcast::<Vec<u8>>().unwrap();
        instance.push(2);
        assert_eq!(*instance, vec![1, 2]);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(instance);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_host_values_carry_no_library() {
        let a = Shared::new(Arc::new("host"), None);
        let b = a.clone();
        assert!(!a.is_dynamic());
        assert!(Shared::ptr_eq(&a, &b));
        assert!(!Shared::ptr_eq(&a, &Shared::new(Arc::new("host"), None)));
    }
}
