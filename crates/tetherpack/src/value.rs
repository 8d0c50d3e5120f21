//! Wire values and handles.

use uuid::Uuid;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::MAX_DEPTH;
use crate::Result;
use crate::Tag;

/// Opaque reference to a value held in the other side's registry.
///
/// Handles are random UUIDs. The side that *requests* a new remote value allocates the handle,
/// so a request and the value it creates can be correlated without an extra round trip.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Handle(pub Uuid);

impl Handle {
    /// Allocates a fresh random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Parses the hyphenated text form produced by `Display`.
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A value in transit.
///
/// `Map` is the native mapping (string keys, insertion order preserved). `Pairs` is a mapping
/// assembled on the receiving side from parallel key and value lists, so its keys may be any
/// value.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<WireValue>),
    Map(Vec<(String, WireValue)>),
    Pairs(Vec<WireValue>, Vec<WireValue>),
    Handle(Handle),
    Callable(Handle),
}

impl WireValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Looks up a key in a `Map` value.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Encodes this value tree.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Self::Undefined => enc.undefined(),
            Self::Null => enc.null(),
            Self::Bool(b) => enc.bool(*b),
            Self::Number(n) => enc.f64(*n),
            Self::String(s) => enc.str(s),
            Self::Handle(h) => enc.handle(*h),
            Self::Callable(h) => enc.callable(*h),
            Self::List(items) => {
                enc.list_begin()?;
                for item in items {
                    item.encode(enc)?;
                }
                enc.list_end()
            }
            Self::Map(entries) => {
                enc.map_begin()?;
                for (key, value) in entries {
                    enc.entry_begin(key)?;
                    value.encode(enc)?;
                    enc.entry_end()?;
                }
                enc.map_end()
            }
            Self::Pairs(keys, values) => {
                if keys.len() != values.len() {
                    let (keys, values) = (keys.len(), values.len());
                    return Err(Error::PairsLengthMismatch { keys, values });
                }
                enc.pairs_begin()?;
                for part in [keys, values] {
                    enc.list_begin()?;
                    for item in part {
                        item.encode(enc)?;
                    }
                    enc.list_end()?;
                }
                enc.pairs_end()
            }
        }
    }

    /// Encodes this value as a standalone buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        enc.into_bytes()
    }

    /// Decodes one value tree, enforcing `MAX_DEPTH`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Self::decode_at(dec, 0)
    }

    fn decode_at(dec: &mut Decoder<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded);
        }
        match dec.peek_tag()? {
            Tag::Undefined => {
                dec.undefined()?;
                Ok(Self::Undefined)
            }
            Tag::Null => {
                dec.null()?;
                Ok(Self::Null)
            }
            Tag::True | Tag::False => Ok(Self::Bool(dec.bool()?)),
            Tag::F64 => Ok(Self::Number(dec.f64()?)),
            Tag::U64 => Ok(Self::Number(dec.u64()? as f64)),
            Tag::String => Ok(Self::String(dec.str()?.to_owned())),
            Tag::Handle => Ok(Self::Handle(dec.handle()?)),
            Tag::Callable => Ok(Self::Callable(dec.callable()?)),
            Tag::List => {
                let mut iter = dec.list()?;
                Ok(Self::List(collect_list(&mut iter, depth)?))
            }
            Tag::Map => {
                let mut iter = dec.map()?;
                let mut entries = Vec::new();
                while let Some((key, mut value)) = iter.next()? {
                    entries.push((key.to_owned(), Self::decode_at(&mut value, depth + 1)?));
                }
                Ok(Self::Map(entries))
            }
            Tag::Pairs => {
                let (mut keys, mut values) = dec.pairs()?;
                let keys = collect_list(&mut keys, depth)?;
                let values = collect_list(&mut values, depth)?;
                if keys.len() != values.len() {
                    let (keys, values) = (keys.len(), values.len());
                    return Err(Error::PairsLengthMismatch { keys, values });
                }
                Ok(Self::Pairs(keys, values))
            }
            tag @ (Tag::Pad | Tag::Entry) => Err(Error::InvalidTag(tag as u8)),
        }
    }

    /// Decodes a standalone buffer holding exactly one value.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        Self::decode(&mut dec)
    }
}

fn collect_list(iter: &mut crate::ListIter<'_>, depth: usize) -> Result<Vec<WireValue>> {
    let mut items = Vec::new();
    while let Some(mut item) = iter.next()? {
        items.push(WireValue::decode_at(&mut item, depth + 1)?);
    }
    Ok(items)
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<u32> for WireValue {
    fn from(v: u32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Handle> for WireValue {
    fn from(v: Handle) -> Self {
        Self::Handle(v)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(v: Vec<WireValue>) -> Self {
        Self::List(v)
    }
}

impl<T: Into<WireValue>> From<Option<T>> for WireValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}
