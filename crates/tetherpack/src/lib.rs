//! # Tetherpack
//!
//! A small, bounded TLV encoding for values that cross between the host and a page.
//!
//! ## Philosophy
//!
//! - **Skippable**: every item starts with a one byte tag, and everything of variable size
//!   carries its length, so a reader can step over fields it does not understand.
//! - **Checked While Writing**: the `Encoder` keeps a stack of open containers and refuses
//!   writes that would produce a malformed tree. Container lengths are patched on close.
//! - **Handles Are Values**: remote object references and host callables are 16 byte
//!   scalars with their own tags, so they can never be confused with strings.
//!
//! ## Layout
//!
//! ```text
//! bool, null, undefined   [tag]
//! u64, f64                [tag][8 bytes]
//! handle, callable        [tag][16 bytes]
//! string                  [tag][u32 len][utf-8]
//! list, map, entry, pairs [tag][u32 len][body]
//! ```
//!
//! Multi-byte numbers are little-endian. An entry body is a string key followed by exactly one
//! value; a map body holds only entries; a pairs body holds exactly two lists (keys, values).

mod decoder;
mod encoder;
mod value;

pub use decoder::Decoder;
pub use decoder::ListIter;
pub use decoder::MapIter;
pub use encoder::Encoder;
pub use value::Handle;
pub use value::WireValue;

#[cfg(test)]
mod tests;

/// Maximum container nesting accepted when decoding a `WireValue` tree.
pub const MAX_DEPTH: usize = 128;

/// Width of the length prefix on strings and containers.
const LEN_WIDTH: usize = 4;

/// Encoding and decoding errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A byte that is not a known tag, or a tag where another was required.
    InvalidTag(u8),
    InvalidUtf8,
    /// Input ended in the middle of an item.
    UnexpectedEnd,
    /// A string or container body does not fit a `u32` length.
    BlobTooLarge(usize),
    /// `*_end` called for a container other than the innermost open one.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// `*_end` called with no container open.
    ScopeUnderflow,
    /// `into_bytes` called while containers are still open.
    ScopeStillOpen,
    /// An entry already has its value, or pairs already has both lists.
    TooManyItems(Scope),
    /// An entry or pairs container closed short.
    MissingItems(Scope),
    /// Something other than an entry written directly into a map.
    InvalidMapEntry,
    /// Something other than a list written directly into pairs.
    InvalidPairsPart,
    PairsLengthMismatch { keys: usize, values: usize },
    DepthExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "unexpected tag byte {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::UnexpectedEnd => write!(f, "input ended inside an item"),
            Error::BlobTooLarge(n) => write!(f, "{} bytes does not fit a length prefix", n),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "tried to close {:?} but {:?} is open", expected, actual)
            }
            Error::ScopeUnderflow => write!(f, "no open container to close"),
            Error::ScopeStillOpen => write!(f, "containers left open at the end of encoding"),
            Error::TooManyItems(s) => write!(f, "{:?} is already full", s),
            Error::MissingItems(s) => write!(f, "{:?} closed before it was complete", s),
            Error::InvalidMapEntry => write!(f, "maps only hold entries"),
            Error::InvalidPairsPart => write!(f, "pairs only hold a key list and a value list"),
            Error::PairsLengthMismatch { keys, values } => {
                write!(f, "pairs has {} keys but {} values", keys, values)
            }
            Error::DepthExceeded => write!(f, "nested deeper than {} containers", MAX_DEPTH),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The leading byte of every encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Filler; occupies one byte and carries nothing.
    Pad = 0x00,
    True = 0x01,
    False = 0x02,
    U64 = 0x06,
    F64 = 0x0C,
    Null = 0x0E,
    Undefined = 0x0F,
    String = 0x10,
    List = 0x20,
    Map = 0x21,
    Pairs = 0x22,
    Entry = 0x33,
    Handle = 0x40,
    Callable = 0x41,
}

const TAGS: [Tag; 14] = [
    Tag::Pad,
    Tag::True,
    Tag::False,
    Tag::U64,
    Tag::F64,
    Tag::Null,
    Tag::Undefined,
    Tag::String,
    Tag::List,
    Tag::Map,
    Tag::Pairs,
    Tag::Entry,
    Tag::Handle,
    Tag::Callable,
];

impl TryFrom<u8> for Tag {
    type Error = Error;

    fn try_from(b: u8) -> Result<Self> {
        TAGS.iter().copied().find(|t| *t as u8 == b).ok_or(Error::InvalidTag(b))
    }
}

impl Tag {
    /// Bytes that follow the tag for fixed-width items, `None` for length-prefixed ones.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Pad | Tag::True | Tag::False | Tag::Null | Tag::Undefined => Some(0),
            Tag::U64 | Tag::F64 => Some(8),
            Tag::Handle | Tag::Callable => Some(16),
            Tag::String | Tag::List | Tag::Map | Tag::Pairs | Tag::Entry => None,
        }
    }
}

/// The kind of container an `Encoder` is currently writing into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Top level, outside any container.
    Root,
    List,
    /// Accepts only entries.
    Map,
    /// Accepts exactly one value after its key.
    Entry,
    /// Accepts exactly two lists.
    Pairs,
}
