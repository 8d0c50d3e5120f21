use crate::Error;
use crate::Handle;
use crate::LEN_WIDTH;
use crate::Result;
use crate::Tag;

/// A read cursor over encoded bytes. Borrowed strings point into the input.
///
/// Reads past the end fail with `Error::UnexpectedEnd`; nothing panics on malformed input.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    rest: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { rest: buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    /// The tag of the next item, without consuming it.
    pub fn peek_tag(&self) -> Result<Tag> {
        let &b = self.rest.first().ok_or(Error::UnexpectedEnd)?;
        Tag::try_from(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let rest = self.rest;
        if n > rest.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (taken, rest) = rest.split_at(n);
        self.rest = rest;
        Ok(taken)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn length(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.fixed::<LEN_WIDTH>()?) as usize)
    }

    /// Consumes the next tag, which must be `tag`.
    fn eat(&mut self, tag: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != tag {
            return Err(Error::InvalidTag(found as u8));
        }
        self.take(1).map(drop)
    }

    /// Consumes a length-prefixed item tagged `tag` and returns a cursor over its body.
    fn body(&mut self, tag: Tag) -> Result<Decoder<'a>> {
        self.eat(tag)?;
        let len = self.length()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Steps over the next item, children included.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        let width = match tag.fixed_width() {
            Some(width) => width,
            None => self.length()?,
        };
        self.take(width).map(drop)
    }

    /// Splits the next whole item off into its own cursor.
    fn split_item(&mut self) -> Result<Decoder<'a>> {
        let mut ahead = self.clone();
        ahead.skip()?;
        let used = self.remaining() - ahead.remaining();
        Ok(Decoder::new(self.take(used)?))
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => self.take(1).map(|_| true),
            Tag::False => self.take(1).map(|_| false),
            other => Err(Error::InvalidTag(other as u8)),
        }
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.eat(Tag::U64)?;
        self.fixed().map(u64::from_le_bytes)
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.eat(Tag::F64)?;
        self.fixed().map(f64::from_le_bytes)
    }

    pub fn null(&mut self) -> Result<()> {
        self.eat(Tag::Null)
    }

    pub fn undefined(&mut self) -> Result<()> {
        self.eat(Tag::Undefined)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        let body = self.body(Tag::String)?;
        std::str::from_utf8(body.rest).map_err(|_| Error::InvalidUtf8)
    }

    pub fn handle(&mut self) -> Result<Handle> {
        self.eat(Tag::Handle)?;
        self.fixed().map(Handle::from_bytes)
    }

    pub fn callable(&mut self) -> Result<Handle> {
        self.eat(Tag::Callable)?;
        self.fixed().map(Handle::from_bytes)
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { body: self.body(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { body: self.body(Tag::Map)? })
    }

    /// Returns the key list and the value list of a pairs container.
    pub fn pairs(&mut self) -> Result<(ListIter<'a>, ListIter<'a>)> {
        let mut body = self.body(Tag::Pairs)?;
        Ok((body.list()?, body.list()?))
    }

    /// Returns an entry's key and a cursor positioned on its value.
    pub fn entry(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut body = self.body(Tag::Entry)?;
        let key = body.str()?;
        Ok((key, body))
    }
}

/// Items of a list, each as its own cursor.
#[derive(Debug)]
pub struct ListIter<'a> {
    body: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.body.remaining() {
            0 => Ok(None),
            _ => self.body.split_item().map(Some),
        }
    }
}

/// Entries of a map as `(key, value cursor)`.
#[derive(Debug)]
pub struct MapIter<'a> {
    body: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        match self.body.remaining() {
            0 => Ok(None),
            _ => self.body.entry().map(Some),
        }
    }
}
