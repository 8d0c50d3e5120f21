//! Host values and functions exposed in the page's global scope.
//!
//! A `BindingsBuilder` collects entries; `rebind` freezes them into an immutable `Bindings`
//! snapshot that is installed on every page load. To expose more, build a new snapshot from
//! `to_builder` and hand it to a new bridge.

use std::sync::Arc;

use tetherpack::Handle;
use tetherpack::WireValue;

use crate::callbacks::CallbackRegistry;
use crate::error::Result;
use crate::value::Callback;
use crate::value::Value;

#[derive(Clone)]
enum Binding {
    Property(WireValue),
    Function(Callback),
}

#[derive(Default)]
pub struct BindingsBuilder {
    entries: Vec<(String, Binding)>,
}

impl BindingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes a plain value under `name`. A later entry with the same name replaces it.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.set(name.into(), Binding::Property(value.into()));
        self
    }

    /// Exposes a host function. Page code calls it like any function and receives a promise.
    pub fn function(
        mut self,
        name: impl Into<String>,
        f: impl Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.set(name.into(), Binding::Function(Arc::new(f)));
        self
    }

    fn set(&mut self, name: String, binding: Binding) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = binding,
            None => self.entries.push((name, binding)),
        }
    }

    pub fn rebind(self) -> Bindings {
        Bindings { entries: Arc::new(self.entries) }
    }
}

/// An immutable set of bindings.
#[derive(Clone, Default)]
pub struct Bindings {
    entries: Arc<Vec<(String, Binding)>>,
}

/// One binding as the page engine installs it.
#[derive(Debug, Clone)]
pub(crate) enum PageBinding {
    Property { name: String, value: WireValue },
    Function { name: String, callback: Handle },
}

impl Bindings {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts a new snapshot from this one.
    pub fn to_builder(&self) -> BindingsBuilder {
        BindingsBuilder { entries: self.entries.to_vec() }
    }

    /// Registers every function as a pinned callback so it survives navigation.
    pub(crate) fn install(&self, callbacks: &CallbackRegistry) -> Vec<PageBinding> {
        self.entries
            .iter()
            .map(|(name, binding)| match binding {
                Binding::Property(value) => {
                    PageBinding::Property { name: name.clone(), value: value.clone() }
                }
                Binding::Function(f) => PageBinding::Function {
                    name: name.clone(),
                    callback: callbacks.register_pinned(f.clone()),
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_frozen() {
        let first = BindingsBuilder::new()
            .property("version", 1)
            .function("ping", |_| Ok(Value::from("pong")))
            .rebind();
        let second = first.to_builder().property("version", 2).property("extra", true).rebind();

        assert_eq!(first.names().collect::<Vec<_>>(), ["version", "ping"]);
        assert_eq!(second.names().collect::<Vec<_>>(), ["version", "ping", "extra"]);

        let registry = CallbackRegistry::new();
        let installed = second.install(&registry);
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            &installed[0],
            PageBinding::Property { value, .. } if *value == WireValue::from(2)
        ));

        registry.clear_transient();
        let PageBinding::Function { callback, .. } = &installed[1] else {
            panic!("expected a function")
        };
        assert!(registry.get(callback).is_some());
    }
}
