use tetherpack::Handle;
use tetherpack::WireValue;

use crate::Error;
use crate::Result;

/// Named call arguments, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<(String, WireValue)>);

impl Args {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<WireValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn take(&mut self, key: &str) -> Option<WireValue> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    /// Required string field.
    pub fn str(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(WireValue::String(s)) => Ok(s),
            Some(_) => Err(mismatch(key, "string")),
            None => Err(Error::MissingField(key.into())),
        }
    }

    /// Optional string field; `null` and `undefined` count as absent.
    pub fn opt_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            Some(WireValue::String(s)) => Ok(Some(s)),
            Some(v) if v.is_nullish() => Ok(None),
            None => Ok(None),
            Some(_) => Err(mismatch(key, "string")),
        }
    }

    /// Boolean field with a default for absent or nullish values.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            Some(WireValue::Bool(b)) => Ok(*b),
            Some(v) if v.is_nullish() => Ok(default),
            None => Ok(default),
            Some(_) => Err(mismatch(key, "boolean")),
        }
    }

    /// Handle field, accepted either as a handle or in its text form.
    pub fn handle(&self, key: &str) -> Result<Handle> {
        match self.get(key) {
            Some(WireValue::Handle(h)) | Some(WireValue::Callable(h)) => Ok(*h),
            Some(WireValue::String(s)) => Handle::parse(s).ok_or_else(|| mismatch(key, "handle")),
            Some(_) => Err(mismatch(key, "handle")),
            None => Err(Error::MissingField(key.into())),
        }
    }

    /// List field; absent or nullish yields an empty list.
    pub fn list(&self, key: &str) -> Result<&[WireValue]> {
        match self.get(key) {
            Some(WireValue::List(items)) => Ok(items),
            Some(v) if v.is_nullish() => Ok(&[]),
            None => Ok(&[]),
            Some(_) => Err(mismatch(key, "list")),
        }
    }

    /// Map field; absent or nullish yields an empty map.
    pub fn map(&self, key: &str) -> Result<&[(String, WireValue)]> {
        match self.get(key) {
            Some(WireValue::Map(entries)) => Ok(entries),
            Some(v) if v.is_nullish() => Ok(&[]),
            None => Ok(&[]),
            Some(_) => Err(mismatch(key, "map")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WireValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, WireValue)> {
        self.0
    }
}

impl From<Vec<(String, WireValue)>> for Args {
    fn from(entries: Vec<(String, WireValue)>) -> Self {
        Self(entries)
    }
}

fn mismatch(field: &str, expected: &'static str) -> Error {
    Error::TypeMismatch { field: field.into(), expected }
}
