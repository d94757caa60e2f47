//! Type info registry: plugin-contributed descriptors grouped by category, with
//! change notifications.
//!
//! Listeners are held weakly. Removing a listener leaves an empty slot behind
//! instead of shifting the others, and a slot whose listener has been dropped is
//! cleared after the next notification.

use crate::plugins::PluginId;
use crate::registry::handle::{KeepAlive, Shared};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::ptr;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// Identity of a type info category, e.g. "image codecs"
pub type CategoryId = Uuid;

/// A descriptor contributed by a plugin.
///
/// The registry only holds `Arc`s to it; it never copies the payload. Readers get
/// it back as a [`Shared`] handle.
pub struct TypeInfo {
    name: String,
    payload: Box<dyn Any + Send + Sync>,
}

impl TypeInfo {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, payload: T) -> Self {
        Self {
            name: name.into(),
            payload: Box::new(payload),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One affected entry of a change event
#[derive(Debug, Clone)]
pub struct TypeInfoRecord {
    pub category: CategoryId,
    pub info: Shared<TypeInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeInfoEventKind {
    Added,
    Removed,
}

#[derive(Debug)]
pub struct TypeInfoEvent<'a> {
    pub kind: TypeInfoEventKind,
    pub records: &'a [TypeInfoRecord],
}

/// Observer of type info changes
pub trait TypeInfoListener: Send + Sync {
    fn on_type_info_changed(&self, event: &TypeInfoEvent<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Slot {
    id: ListenerId,
    listener: Weak<dyn TypeInfoListener>,
}

struct Registered {
    owner: Option<PluginId>,
    info: Shared<TypeInfo>,
}

#[derive(Default)]
pub struct TypeInfoRegistry {
    categories: BTreeMap<CategoryId, Vec<Registered>>,
    listeners: Vec<Option<Slot>>,
    next_listener: u64,
    /// `Some` while a load call is collecting ADDED events
    batch: Option<Vec<TypeInfoRecord>>,
}

impl TypeInfoRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, category: CategoryId, info: Arc<TypeInfo>) {
        self.register_owned(category, info, None, None);
    }

    pub(crate) fn register_owned(
        &mut self,
        category: CategoryId,
        info: Arc<TypeInfo>,
        owner: Option<PluginId>,
        library: KeepAlive,
    ) {
        let info = Shared::new(info, library);
        self.categories.entry(category).or_default().push(Registered {
            owner,
            info: info.clone(),
        });

        let record = TypeInfoRecord { category, info };
        match &mut self.batch {
            Some(batch) => batch.push(record),
            None => self.notify(TypeInfoEventKind::Added, &[record]),
        }
    }

    /// Remove `info` from `category`. Entries are matched by address, not by
    /// value.
    pub fn unregister(&mut self, category: CategoryId, info: &TypeInfo) -> bool {
        self.remove_first(category, |e| ptr::eq(&*e.info, info))
    }

    /// Like [`unregister`](Self::unregister), but only entries registered by `owner`
    pub(crate) fn unregister_owned(
        &mut self,
        category: CategoryId,
        info: &TypeInfo,
        owner: PluginId,
    ) -> bool {
        self.remove_first(category, |e| {
            e.owner == Some(owner) && ptr::eq(&*e.info, info)
        })
    }

    fn remove_first(
        &mut self,
        category: CategoryId,
        matches: impl Fn(&Registered) -> bool,
    ) -> bool {
        let Some(entries) = self.categories.get_mut(&category) else {
            return false;
        };
        let Some(at) = entries.iter().position(matches) else {
            return false;
        };

        let removed = entries.remove(at);
        if entries.is_empty() {
            self.categories.remove(&category);
        }
        if !self.cancel_pending(category, &removed.info) {
            self.notify(
                TypeInfoEventKind::Removed,
                &[TypeInfoRecord {
                    category,
                    info: removed.info,
                }],
            );
        }
        true
    }

    /// Drop a batched ADDED record for `info`. Returns false if the addition was
    /// already announced.
    fn cancel_pending(&mut self, category: CategoryId, info: &TypeInfo) -> bool {
        let Some(batch) = &mut self.batch else {
            return false;
        };
        match batch
            .iter()
            .position(|r| r.category == category && ptr::eq(&*r.info, info))
        {
            Some(at) => {
                batch.remove(at);
                true
            }
            None => false,
        }
    }

    /// Remove everything `owner` left registered. Returns how many entries went.
    pub(crate) fn remove_owned_by(&mut self, owner: PluginId) -> usize {
        let mut removed = Vec::new();
        for (category, entries) in &mut self.categories {
            entries.retain(|e| {
                if e.owner == Some(owner) {
                    removed.push(TypeInfoRecord {
                        category: *category,
                        info: e.info.clone(),
                    });
                    false
                } else {
                    true
                }
            });
        }
        self.categories.retain(|_, entries| !entries.is_empty());

        let count = removed.len();
        for record in removed {
            if !self.cancel_pending(record.category, &record.info) {
                self.notify(TypeInfoEventKind::Removed, std::slice::from_ref(&record));
            }
        }
        count
    }

    /// Entries of `category` in registration order
    #[must_use]
    pub fn query(&self, category: CategoryId) -> Vec<Shared<TypeInfo>> {
        self.categories
            .get(&category)
            .map(|entries| entries.iter().map(|e| e.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Categories with at least one entry
    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.categories.keys().copied()
    }

    /// Subscribe to changes. Only a weak reference is kept.
    pub fn add_listener<L>(&mut self, listener: &Arc<L>) -> ListenerId
    where
        L: TypeInfoListener + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;

        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn TypeInfoListener> = weak;
        let slot = Some(Slot { id, listener: weak });
        match self.listeners.iter_mut().find(|slot| slot.is_none()) {
            Some(free) => *free = slot,
            None => self.listeners.push(slot),
        }
        id
    }

    /// Unsubscribe; the slot becomes a tombstone
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        for slot in &mut self.listeners {
            if slot.as_ref().is_some_and(|s| s.id == id) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Number of live listener slots
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .iter()
            .flatten()
            .filter(|slot| slot.listener.strong_count() > 0)
            .count()
    }

    /// Start collecting ADDED events instead of sending them
    pub(crate) fn begin_batch(&mut self) {
        if self.batch.is_none() {
            self.batch = Some(Vec::new());
        }
    }

    /// Send everything collected since `begin_batch` as one ADDED event
    pub(crate) fn flush_batch(&mut self) {
        if let Some(records) = self.batch.take() {
            if !records.is_empty() {
                debug!("Flushing {} batched type info additions", records.len());
                self.notify(TypeInfoEventKind::Added, &records);
            }
        }
    }

    fn notify(&mut self, kind: TypeInfoEventKind, records: &[TypeInfoRecord]) {
        let event = TypeInfoEvent { kind, records };
        for slot in &mut self.listeners {
            let Some(listener) = slot.as_ref().map(|s| s.listener.upgrade()) else {
                continue;
            };
            match listener {
                Some(listener) => listener.on_type_info_changed(&event),
                None => *slot = None,
            }
        }
    }
}

impl fmt::Debug for TypeInfoRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfoRegistry")
            .field("categories", &self.categories.len())
            .field("listeners", &self.listener_count())
            .field("batching", &self.batch.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(TypeInfoEventKind, Vec<String>)>>,
    }

    impl TypeInfoListener for Recorder {
        fn on_type_info_changed(&self, event: &TypeInfoEvent<'_>) {
            let names = event
                .records
                .iter()
                .map(|r| r.info.name().to_string())
                .collect();
            self.events.lock().unwrap().push((event.kind, names));
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<(TypeInfoEventKind, Vec<String>)> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn codecs() -> CategoryId {
        Uuid::from_u128(0xC0DEC)
    }

    fn info(name: &str) -> Arc<TypeInfo> {
        Arc::new(TypeInfo::new(name, name.len()))
    }

    #[test]
    fn test_query_preserves_registration_order() {
        let mut registry = TypeInfoRegistry::new();
        let png = info("png");
        registry.register(codecs(), Arc::clone(&png));
        registry.register(codecs(), info("jpeg"));
        registry.register(codecs(), Arc::clone(&png));

        let names: Vec<_> = registry
            .query(codecs())
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["png", "jpeg", "png"]);
        assert_eq!(registry.query(codecs())[1].payload::<usize>(), Some(&4));
        assert!(registry.query(Uuid::nil()).is_empty());
    }

    #[test]
    fn test_unregister_matches_by_handle() {
        let mut registry = TypeInfoRegistry::new();
        let png = info("png");
        let lookalike = info("png");
        registry.register(codecs(), Arc::clone(&png));

        assert!(!registry.unregister(codecs(), &lookalike));
        assert!(registry.unregister(codecs(), &png));
        assert!(!registry.unregister(codecs(), &png));
        assert_eq!(registry.categories().count(), 0);
    }

    #[test]
    fn test_unbatched_events_are_individual() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = TypeInfoRegistry::new();
        registry.add_listener(&recorder);

        let png = info("png");
        registry.register(codecs(), Arc::clone(&png));
        registry.register(codecs(), info("jpeg"));
        registry.unregister(codecs(), &png);

        let events = recorder.take();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], (TypeInfoEventKind::Added, vec!["png".to_string()]));
        assert_eq!(events[2], (TypeInfoEventKind::Removed, vec!["png".to_string()]));
    }

    #[test]
    fn test_batch_flushes_once() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = TypeInfoRegistry::new();
        registry.add_listener(&recorder);

        registry.begin_batch();
        registry.register(codecs(), info("png"));
        registry.register(codecs(), info("jpeg"));
        registry.register(codecs(), info("webp"));
        assert!(recorder.take().is_empty());

        registry.flush_batch();
        let events = recorder.take();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            (
                TypeInfoEventKind::Added,
                vec!["png".to_string(), "jpeg".to_string(), "webp".to_string()]
            )
        );

        // Empty batches stay silent
        registry.begin_batch();
        registry.flush_batch();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_removals_are_never_batched() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = TypeInfoRegistry::new();
        let announced = info("png");
        registry.register(codecs(), Arc::clone(&announced));
        registry.add_listener(&recorder);

        registry.begin_batch();
        let pending = info("jpeg");
        registry.register(codecs(), Arc::clone(&pending));
        registry.register(codecs(), info("webp"));
        registry.unregister(codecs(), &announced);
        assert_eq!(
            recorder.take(),
            vec![(TypeInfoEventKind::Removed, vec!["png".to_string()])]
        );

        // Removing an addition nobody has heard of yet cancels it silently
        registry.unregister(codecs(), &pending);
        assert!(recorder.take().is_empty());

        registry.flush_batch();
        assert_eq!(
            recorder.take(),
            vec![(TypeInfoEventKind::Added, vec!["webp".to_string()])]
        );
    }

    #[test]
    fn test_removed_listener_leaves_tombstone() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut registry = TypeInfoRegistry::new();
        let first_id = registry.add_listener(&first);
        registry.add_listener(&second);

        assert!(registry.remove_listener(first_id));
        assert!(!registry.remove_listener(first_id));
        assert_eq!(registry.listeners.len(), 2);
        assert_eq!(registry.listener_count(), 1);

        registry.register(codecs(), info("png"));
        assert!(first.take().is_empty());
        assert_eq!(second.take().len(), 1);

        // Tombstone is reused
        let third = Arc::new(Recorder::default());
        registry.add_listener(&third);
        assert_eq!(registry.listeners.len(), 2);
    }

    #[test]
    fn test_dropped_listener_goes_stale() {
        let mut registry = TypeInfoRegistry::new();
        {
            let short_lived = Arc::new(Recorder::default());
            registry.add_listener(&short_lived);
            assert_eq!(registry.listener_count(), 1);
        }
        assert_eq!(registry.listener_count(), 0);
        registry.register(codecs(), info("png"));
        assert!(registry.listeners[0].is_none());
    }

    #[test]
    fn test_remove_owned_by_emits_removals() {
        let recorder = Arc::new(Recorder::default());
        let owner = Uuid::from_u128(1);
        let mut registry = TypeInfoRegistry::new();
        registry.register_owned(codecs(), info("png"), Some(owner), None);
        registry.register(codecs(), info("host"));
        registry.add_listener(&recorder);

        assert_eq!(registry.remove_owned_by(owner), 1);
        assert_eq!(
            recorder.take(),
            vec![(TypeInfoEventKind::Removed, vec!["png".to_string()])]
        );
        assert_eq!(registry.query(codecs()).len(), 1);
    }

    #[test]
    fn test_owned_unregister_ignores_other_owners() {
        let owner = Uuid::from_u128(1);
        let intruder = Uuid::from_u128(2);
        let host = info("host");
        let png = info("png");
        let mut registry = TypeInfoRegistry::new();
        registry.register(codecs(), Arc::clone(&host));
        registry.register_owned(codecs(), Arc::clone(&png), Some(owner), None);

        assert!(!registry.unregister_owned(codecs(), &host, owner));
        assert!(!registry.unregister_owned(codecs(), &png, intruder));
        assert!(registry.unregister_owned(codecs(), &png, owner));
        assert_eq!(registry.query(codecs()).len(), 1);
        assert_eq!(registry.query(codecs())[0].name(), "host");
    }
}
