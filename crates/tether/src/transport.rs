//! # Transport
//!
//! Moves opaque byte buffers between the host and a page.
//!
//! ## Invariants
//!
//! - Buffers arrive whole and in send order. Framing and correlation belong to `Peer`.
//! - Either end may send at any time.
//! - Once `recv` yields `None` the link is gone for good; nothing reconnects.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The other end dropped or stopped reading.
    Closed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(why) => write!(f, "link closed: {}", why),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One end of a duplex byte link. Object safe, so peers hold it as `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// The next buffer, or `None` after the other end has closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
