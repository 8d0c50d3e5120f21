//! # Frames
//!
//! Every message on the link is one map: a `kind` of `call` or `reply`, a `seq`, and either
//! `op` + `args` or `ok` / `err`.
//!
//! ## Invariants
//! - Malformed input is an `Err`, never a panic.
//! - Fields a reader does not know are skipped, so either side may add fields.

use tetherpack::Decoder;
use tetherpack::Encoder;
use tetherpack::WireValue;

use crate::Args;
use crate::Error;
use crate::ErrorPayload;
use crate::Result;

/// A request to perform `op` with named `args`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub seq: u64,
    pub op: String,
    pub args: Args,
}

/// The answer to the call with the same `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub seq: u64,
    pub status: std::result::Result<WireValue, ErrorPayload>,
}

/// Top-level frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(CallFrame),
    Reply(ReplyFrame),
}

impl Frame {
    /// Encode this frame into a standalone buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.map_begin()?;
        match self {
            Frame::Call(call) => {
                put_str(&mut enc, "kind", "call")?;
                put_u64(&mut enc, "seq", call.seq)?;
                put_str(&mut enc, "op", &call.op)?;
                enc.entry_begin("args")?;
                enc.map_begin()?;
                for (key, value) in call.args.iter() {
                    enc.entry_begin(key)?;
                    value.encode(&mut enc)?;
                    enc.entry_end()?;
                }
                enc.map_end()?;
                enc.entry_end()?;
            }
            Frame::Reply(reply) => {
                put_str(&mut enc, "kind", "reply")?;
                put_u64(&mut enc, "seq", reply.seq)?;
                match &reply.status {
                    Ok(value) => {
                        enc.entry_begin("ok")?;
                        value.encode(&mut enc)?;
                        enc.entry_end()?;
                    }
                    Err(payload) => {
                        enc.entry_begin("err")?;
                        enc.map_begin()?;
                        put_str(&mut enc, "name", &payload.name)?;
                        put_str(&mut enc, "message", &payload.message)?;
                        put_str(&mut enc, "stack", &payload.stack)?;
                        enc.map_end()?;
                        enc.entry_end()?;
                    }
                }
            }
        }
        enc.map_end()?;
        Ok(enc.into_bytes()?)
    }

    /// Decode a frame from a standalone buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let mut map = dec.map()?;

        let mut kind = None;
        let mut seq = None;
        let mut op = None;
        let mut args = None;
        let mut status = None;

        while let Some((key, mut field)) = map.next()? {
            match key {
                "kind" => kind = Some(field.str()?),
                "seq" => seq = Some(field.u64()?),
                "op" => op = Some(field.str()?.to_owned()),
                "args" => args = Some(decode_args(&mut field)?),
                "ok" => status = Some(Ok(WireValue::decode(&mut field)?)),
                "err" => status = Some(Err(decode_payload(&mut field)?)),
                _ => field.skip()?,
            }
        }

        let seq = seq.ok_or_else(|| Error::MissingField("seq".into()))?;
        match kind.ok_or_else(|| Error::MissingField("kind".into()))? {
            "call" => Ok(Frame::Call(CallFrame {
                seq,
                op: op.ok_or_else(|| Error::MissingField("op".into()))?,
                args: args.unwrap_or_default(),
            })),
            "reply" => Ok(Frame::Reply(ReplyFrame {
                seq,
                status: status.ok_or_else(|| Error::MissingField("ok".into()))?,
            })),
            other => Err(Error::UnknownFrame(other.into())),
        }
    }
}

/// Pulls only `seq` out of a frame, so a reply whose body fails to decode can still
/// fail the right caller.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let mut map = dec.map()?;
    while let Some((key, mut field)) = map.next()? {
        if key == "seq" {
            return Ok(field.u64()?);
        }
        field.skip()?;
    }
    Err(Error::MissingField("seq".into()))
}

fn decode_args(dec: &mut Decoder<'_>) -> Result<Args> {
    let WireValue::Map(entries) = WireValue::decode(dec)? else {
        return Err(Error::TypeMismatch { field: "args".into(), expected: "map" });
    };
    Ok(Args::from(entries))
}

fn decode_payload(dec: &mut Decoder<'_>) -> Result<ErrorPayload> {
    let mut map = dec.map()?;
    let mut payload = ErrorPayload::default();
    while let Some((key, mut field)) = map.next()? {
        match key {
            "name" => payload.name = field.str()?.to_owned(),
            "message" => payload.message = field.str()?.to_owned(),
            "stack" => payload.stack = field.str()?.to_owned(),
            _ => field.skip()?,
        }
    }
    Ok(payload)
}

fn put_u64(enc: &mut Encoder, key: &str, val: u64) -> Result<()> {
    enc.entry_begin(key)?;
    enc.u64(val)?;
    enc.entry_end()?;
    Ok(())
}

fn put_str(enc: &mut Encoder, key: &str, val: &str) -> Result<()> {
    enc.entry_begin(key)?;
    enc.str(val)?;
    enc.entry_end()?;
    Ok(())
}
