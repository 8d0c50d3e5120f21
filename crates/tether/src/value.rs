//! Host-side values.

use std::sync::Arc;

use tetherpack::WireValue;

use crate::error::Result;
use crate::proxy::Proxy;
use crate::proxy::RemoteObjectManager;

/// A host closure callable from the page.
pub type Callback = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

/// A value the host hands to, or receives from, a page.
///
/// `Remote` carries a proxy to a value that lives on the page; the page sees the original
/// value, not a copy. `Callable` is a host closure the page can invoke.
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Remote(Proxy),
    Callable(Callback),
}

impl Value {
    pub fn callable(f: impl Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self::Callable(Arc::new(f))
    }

    /// Builds a map with string keys.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (Value::String(k.into()), v)).collect())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Self::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Looks up a string key in a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// The wire form, if the value is natively representable: primitives, lists of natives,
    /// and maps whose keys are strings and whose values are natives.
    pub fn to_native(&self) -> Option<WireValue> {
        match self {
            Self::Undefined => Some(WireValue::Undefined),
            Self::Null => Some(WireValue::Null),
            Self::Bool(b) => Some(WireValue::Bool(*b)),
            Self::Number(n) => Some(WireValue::Number(*n)),
            Self::String(s) => Some(WireValue::String(s.clone())),
            Self::List(items) => {
                items.iter().map(Value::to_native).collect::<Option<Vec<_>>>().map(WireValue::List)
            }
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| Some((k.as_str()?.to_owned(), v.to_native()?)))
                .collect::<Option<Vec<_>>>()
                .map(WireValue::Map),
            Self::Remote(_) | Self::Callable(_) => None,
        }
    }

    /// Converts a received wire value. Handles become non-owning proxies when `objects` is
    /// given; host callables cannot round-trip and arrive as `Undefined`.
    pub fn from_wire(value: WireValue, objects: Option<&Arc<RemoteObjectManager>>) -> Self {
        match value {
            WireValue::Undefined => Self::Undefined,
            WireValue::Null => Self::Null,
            WireValue::Bool(b) => Self::Bool(b),
            WireValue::Number(n) => Self::Number(n),
            WireValue::String(s) => Self::String(s),
            WireValue::List(items) => {
                Self::List(items.into_iter().map(|v| Self::from_wire(v, objects)).collect())
            }
            WireValue::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (Self::String(k), Self::from_wire(v, objects)))
                    .collect(),
            ),
            WireValue::Pairs(keys, values) => Self::Map(
                keys.into_iter()
                    .zip(values)
                    .map(|(k, v)| (Self::from_wire(k, objects), Self::from_wire(v, objects)))
                    .collect(),
            ),
            WireValue::Handle(handle) => match objects {
                Some(objects) => Self::Remote(objects.borrow(handle)),
                None => Self::Undefined,
            },
            WireValue::Callable(_) => Self::Undefined,
        }
    }

    /// The type name the page would report for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::List(_) | Self::Map(_) | Self::Remote(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Callable(_) => "function",
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "Undefined"),
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => {
                f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish()
            }
            Self::Remote(proxy) => write!(f, "Remote({:?})", proxy),
            Self::Callable(_) => write!(f, "Callable"),
        }
    }
}

/// Structural equality. Remote values compare by handle; callables never compare equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Remote(a), Self::Remote(b)) => a.handle().is_some() && a.handle() == b.handle(),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<Proxy> for Value {
    fn from(v: Proxy) -> Self {
        Self::Remote(v)
    }
}

/// Passes a reference without giving up ownership of the handle.
impl From<&Proxy> for Value {
    fn from(v: &Proxy) -> Self {
        Self::Remote(v.share())
    }
}

impl From<WireValue> for Value {
    fn from(v: WireValue) -> Self {
        Self::from_wire(v, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_detection() {
        let nested = Value::List(vec![Value::from(1), Value::map([("a", Value::from("b"))])]);
        assert_eq!(
            nested.to_native(),
            Some(WireValue::List(vec![
                WireValue::from(1),
                WireValue::Map(vec![("a".into(), WireValue::from("b"))]),
            ]))
        );

        let numeric_keys = Value::Map(vec![(Value::from(1), Value::Null)]);
        assert_eq!(numeric_keys.to_native(), None);

        let with_callable = Value::List(vec![Value::callable(|_| Ok(Value::Null))]);
        assert_eq!(with_callable.to_native(), None);
    }

    #[test]
    fn test_from_wire_without_registry() {
        let handle = WireValue::Handle(tetherpack::Handle::new());
        let wire = WireValue::Pairs(vec![WireValue::from(2)], vec![handle]);
        let value = Value::from(wire);
        assert_eq!(value, Value::Map(vec![(Value::from(2), Value::Undefined)]));
    }

    #[test]
    fn test_map_lookup() {
        let value = Value::map([("x", Value::from(3)), ("y", Value::from(true))]);
        assert_eq!(value.get("y").and_then(Value::as_bool), Some(true));
        assert!(value.get("z").is_none());
        assert_eq!(value.type_name(), "object");
    }
}
