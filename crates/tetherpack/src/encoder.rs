use crate::Error;
use crate::Handle;
use crate::LEN_WIDTH;
use crate::Result;
use crate::Scope;
use crate::Tag;

/// A container that has been opened but not yet closed.
struct Open {
    scope: Scope,
    /// Offset of the first body byte; the length prefix sits just before it.
    body_at: usize,
    items: usize,
}

/// Writes one value tree into a growable buffer.
///
/// Every write is checked against the innermost open container:
/// maps take entries only, an entry takes one value, pairs take two lists.
/// `into_bytes` fails unless every container has been closed.
pub struct Encoder {
    buf: Vec<u8>,
    open: Vec<Open>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256), open: Vec::new() }
    }

    /// Finishes encoding.
    ///
    /// # Errors
    /// `Error::ScopeStillOpen` if a container was never closed.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self.open.is_empty() {
            true => Ok(self.buf),
            false => Err(Error::ScopeStillOpen),
        }
    }

    fn innermost(&self) -> (Scope, usize) {
        self.open.last().map_or((Scope::Root, 0), |o| (o.scope, o.items))
    }

    /// Checks that an item starting with `tag` may be written here.
    fn admit(&self, tag: Tag) -> Result<()> {
        let (scope, items) = self.innermost();
        match (scope, tag) {
            (Scope::Root | Scope::List, _) => Ok(()),
            (Scope::Map, Tag::Entry) => Ok(()),
            (Scope::Map, _) => Err(Error::InvalidMapEntry),
            (Scope::Entry, _) if items == 0 => Ok(()),
            (Scope::Entry, _) => Err(Error::TooManyItems(scope)),
            (Scope::Pairs, Tag::List) if items < 2 => Ok(()),
            (Scope::Pairs, Tag::List) => Err(Error::TooManyItems(scope)),
            (Scope::Pairs, _) => Err(Error::InvalidPairsPart),
        }
    }

    fn counted(&mut self) {
        if let Some(open) = self.open.last_mut() {
            open.items += 1;
        }
    }

    /// Writes a complete fixed-width item.
    fn scalar(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(payload);
        self.counted();
        Ok(())
    }

    fn length(n: usize) -> Result<[u8; LEN_WIDTH]> {
        u32::try_from(n).map(u32::to_le_bytes).map_err(|_| Error::BlobTooLarge(n))
    }

    fn push(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0; LEN_WIDTH]);
        self.open.push(Open { scope, body_at: self.buf.len(), items: 0 });
        Ok(())
    }

    fn pop(&mut self, expected: Scope) -> Result<()> {
        let Some(open) = self.open.last() else {
            return Err(Error::ScopeUnderflow);
        };
        if open.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: open.scope });
        }
        let complete = match open.scope {
            Scope::Entry => open.items == 1,
            Scope::Pairs => open.items == 2,
            _ => true,
        };
        if !complete {
            return Err(Error::MissingItems(open.scope));
        }

        let body_at = open.body_at;
        let len = Self::length(self.buf.len() - body_at)?;
        self.buf[body_at - LEN_WIDTH..body_at].copy_from_slice(&len);
        self.open.pop();
        self.counted();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.scalar(if v { Tag::True } else { Tag::False }, &[])
    }

    /// Used for protocol header fields such as sequence numbers.
    pub fn u64(&mut self, v: u64) -> Result<()> {
        self.scalar(Tag::U64, &v.to_le_bytes())
    }

    pub fn f64(&mut self, v: f64) -> Result<()> {
        self.scalar(Tag::F64, &v.to_le_bytes())
    }

    pub fn null(&mut self) -> Result<()> {
        self.scalar(Tag::Null, &[])
    }

    pub fn undefined(&mut self) -> Result<()> {
        self.scalar(Tag::Undefined, &[])
    }

    pub fn str(&mut self, v: &str) -> Result<()> {
        let len = Self::length(v.len())?;
        self.admit(Tag::String)?;
        self.buf.push(Tag::String as u8);
        self.buf.extend_from_slice(&len);
        self.buf.extend_from_slice(v.as_bytes());
        self.counted();
        Ok(())
    }

    /// A value held in the other side's object registry.
    pub fn handle(&mut self, v: Handle) -> Result<()> {
        self.scalar(Tag::Handle, v.as_bytes())
    }

    /// A callable held in the host callback registry.
    pub fn callable(&mut self, v: Handle) -> Result<()> {
        self.scalar(Tag::Callable, v.as_bytes())
    }

    pub fn list_begin(&mut self) -> Result<()> {
        self.push(Tag::List, Scope::List)
    }

    pub fn list_end(&mut self) -> Result<()> {
        self.pop(Scope::List)
    }

    /// Opens a map. Only `entry_begin` may follow directly.
    pub fn map_begin(&mut self) -> Result<()> {
        self.push(Tag::Map, Scope::Map)
    }

    pub fn map_end(&mut self) -> Result<()> {
        self.pop(Scope::Map)
    }

    /// Opens an entry and writes its key. Exactly one value must follow before `entry_end`.
    pub fn entry_begin(&mut self, key: &str) -> Result<()> {
        self.push(Tag::Entry, Scope::Entry)?;
        self.str(key)?;
        // the key does not count towards the entry's single value
        if let Some(open) = self.open.last_mut() {
            open.items = 0;
        }
        Ok(())
    }

    pub fn entry_end(&mut self) -> Result<()> {
        self.pop(Scope::Entry)
    }

    /// Opens a pairs container: a key list, then a value list.
    pub fn pairs_begin(&mut self) -> Result<()> {
        self.push(Tag::Pairs, Scope::Pairs)
    }

    pub fn pairs_end(&mut self) -> Result<()> {
        self.pop(Scope::Pairs)
    }
}
