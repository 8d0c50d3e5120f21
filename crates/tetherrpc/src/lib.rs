//! # Tetherrpc
//!
//! The request/reply envelope spoken between a host and a page.
//!
//! A `Call` names an operation and carries its arguments as a keyed map. A `Reply` echoes the
//! call's sequence number and carries either a value or an `ErrorPayload`. Sequence number `0`
//! is reserved for notifications: the receiver performs the operation but never replies.

mod args;
mod error;
mod frame;

pub use args::Args;
pub use error::Error;
pub use error::ErrorPayload;
pub use error::Result;
pub use frame::CallFrame;
pub use frame::Frame;
pub use frame::ReplyFrame;
pub use frame::decode_seq;

/// Sequence number used for calls that expect no reply.
pub const NOTIFY_SEQ: u64 = 0;
