//! # Value Marshaller
//!
//! Converts host values into wire values addressed to one page registry.
//!
//! ## Invariants
//! - **One Round Trip**: Composite values are emitted as nested `List`/`Pairs` nodes that the
//!   far side assembles while decoding the request that carries them. Marshalling never issues
//!   a request of its own, except to materialize a proxy that belongs to another registry.
//! - **Nothing Is Dropped**: A leaf that cannot be converted becomes `Undefined` in place and a
//!   `MarshalError` is logged. Conversion itself never fails.

use tetherpack::WireValue;
use tracing::warn;

use crate::proxy::Proxy;
use crate::proxy::RemoteObjectManager;
use crate::value::Value;

/// A leaf that was replaced by `Undefined`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarshalError {
    /// Location of the leaf inside the marshalled value, e.g. `$[2].name`.
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for MarshalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cannot marshal {}: {}", self.path, self.reason)
    }
}

impl std::error::Error for MarshalError {}

pub struct Marshaller<'a> {
    objects: &'a RemoteObjectManager,
}

impl<'a> Marshaller<'a> {
    pub fn new(objects: &'a RemoteObjectManager) -> Self {
        Self { objects }
    }

    pub fn to_wire(&self, value: &Value) -> WireValue {
        if self.objects.config().fast_path {
            if let Some(native) = value.to_native() {
                return native;
            }
        }
        self.convert(value, "$")
    }

    fn convert(&self, value: &Value, path: &str) -> WireValue {
        match value {
            Value::List(items) => WireValue::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.convert(item, &format!("{}[{}]", path, i)))
                    .collect(),
            ),
            Value::Map(entries) => {
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (i, (k, v)) in entries.iter().enumerate() {
                    let entry_path = match k.as_str() {
                        Some(name) => format!("{}.{}", path, name),
                        None => format!("{}<{}>", path, i),
                    };
                    keys.push(self.convert(k, &format!("{}<key>", entry_path)));
                    values.push(self.convert(v, &entry_path));
                }
                WireValue::Pairs(keys, values)
            }
            Value::Remote(proxy) => self.convert_proxy(proxy, path),
            Value::Callable(callback) => {
                WireValue::Callable(self.objects.callbacks().register(callback.clone()))
            }
            other => other.to_native().unwrap_or(WireValue::Undefined),
        }
    }

    fn convert_proxy(&self, proxy: &Proxy, path: &str) -> WireValue {
        let Some(handle) = proxy.handle() else {
            return placeholder(path, "reference was destroyed");
        };
        if proxy.manager_id() == self.objects.id() {
            return WireValue::Handle(handle);
        }
        // Handles are only meaningful to the registry that issued them.
        match proxy.materialize() {
            Ok(value) => self.convert(&value, path),
            Err(e) => {
                placeholder(path, &format!("materializing {} failed: {}", proxy.manager_id(), e))
            }
        }
    }
}

fn placeholder(path: &str, reason: &str) -> WireValue {
    let error = MarshalError { path: path.to_owned(), reason: reason.to_owned() };
    warn!(%error, "substituting undefined");
    WireValue::Undefined
}
