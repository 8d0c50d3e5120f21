//! Host closures reachable from the page.
//!
//! Closures marshalled as arguments are transient: they belong to the current document and
//! are dropped when the page navigates. Closures installed through bindings are pinned and
//! survive navigation.

use dashmap::DashMap;
use tetherpack::Handle;

use crate::value::Callback;

struct Entry {
    callback: Callback,
    pinned: bool,
}

#[derive(Default)]
pub struct CallbackRegistry {
    entries: DashMap<Handle, Entry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transient closure.
    pub fn register(&self, callback: Callback) -> Handle {
        self.insert(callback, false)
    }

    /// Registers a closure that survives navigation.
    pub fn register_pinned(&self, callback: Callback) -> Handle {
        self.insert(callback, true)
    }

    fn insert(&self, callback: Callback, pinned: bool) -> Handle {
        let handle = Handle::new();
        self.entries.insert(handle, Entry { callback, pinned });
        handle
    }

    pub fn get(&self, handle: &Handle) -> Option<Callback> {
        self.entries.get(handle).map(|e| e.callback.clone())
    }

    /// Drops a transient closure. Pinned closures stay until the registry is dropped.
    pub fn release(&self, handle: &Handle) -> bool {
        self.entries.remove_if(handle, |_, entry| !entry.pinned).is_some()
    }

    /// Drops every transient closure.
    pub fn clear_transient(&self) {
        self.entries.retain(|_, entry| entry.pinned);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
