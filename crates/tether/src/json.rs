//! The script-engine side of the wire.
//!
//! Script engines exchange values as JSON text. Values JSON cannot carry natively travel as
//! tagged objects: `{"$t": "undefined"}`, `{"$t": "number", "v": "NaN"}`,
//! `{"$t": "handle", "id": ...}`, `{"$t": "callable", "id": ...}` and
//! `{"$t": "pairs", "keys": [...], "values": [...]}`. A map that itself contains a `$t` key is
//! sent in pairs form so it can never be mistaken for a tag.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value as Json;
use serde_json::json;
use tetherpack::Handle;
use tetherpack::WireValue;
use tetherrpc::Args;
use tetherrpc::ErrorPayload;

use crate::error::Error;
use crate::error::Result;

const TAG: &str = "$t";

/// Error shape produced by the glue scripts.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ErrorJson {
    name: String,
    message: String,
    stack: String,
}

impl From<ErrorJson> for ErrorPayload {
    fn from(e: ErrorJson) -> Self {
        ErrorPayload { name: e.name, message: e.message, stack: e.stack }
    }
}

impl From<&ErrorPayload> for ErrorJson {
    fn from(e: &ErrorPayload) -> Self {
        ErrorJson { name: e.name.clone(), message: e.message.clone(), stack: e.stack.clone() }
    }
}

pub fn to_json(value: &WireValue) -> Json {
    match value {
        WireValue::Undefined => json!({ "$t": "undefined" }),
        WireValue::Null => Json::Null,
        WireValue::Bool(b) => Json::Bool(*b),
        WireValue::Number(n) => match serde_json::Number::from_f64(*n) {
            Some(number) => Json::Number(number),
            None => json!({ "$t": "number", "v": non_finite_text(*n) }),
        },
        WireValue::String(s) => Json::String(s.clone()),
        WireValue::List(items) => Json::Array(items.iter().map(to_json).collect()),
        WireValue::Map(entries) if entries.iter().any(|(k, _)| k == TAG) => json!({
            "$t": "pairs",
            "keys": entries.iter().map(|(k, _)| Json::String(k.clone())).collect::<Vec<_>>(),
            "values": entries.iter().map(|(_, v)| to_json(v)).collect::<Vec<_>>(),
        }),
        WireValue::Map(entries) => Json::Object(
            entries.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        ),
        WireValue::Pairs(keys, values) => json!({
            "$t": "pairs",
            "keys": keys.iter().map(to_json).collect::<Vec<_>>(),
            "values": values.iter().map(to_json).collect::<Vec<_>>(),
        }),
        WireValue::Handle(h) => json!({ "$t": "handle", "id": h.to_string() }),
        WireValue::Callable(h) => json!({ "$t": "callable", "id": h.to_string() }),
    }
}

fn non_finite_text(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

pub fn from_json(json: Json) -> WireValue {
    match json {
        Json::Null => WireValue::Null,
        Json::Bool(b) => WireValue::Bool(b),
        Json::Number(n) => WireValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => WireValue::String(s),
        Json::Array(items) => WireValue::List(items.into_iter().map(from_json).collect()),
        Json::Object(map) => from_object(map),
    }
}

fn from_object(mut map: Map<String, Json>) -> WireValue {
    let tag = map.get(TAG).and_then(Json::as_str).map(str::to_owned);
    match tag.as_deref() {
        Some("undefined") => WireValue::Undefined,
        Some("number") => match map.get("v").and_then(Json::as_str) {
            Some("Infinity") => WireValue::Number(f64::INFINITY),
            Some("-Infinity") => WireValue::Number(f64::NEG_INFINITY),
            _ => WireValue::Number(f64::NAN),
        },
        Some(kind @ ("handle" | "callable")) => {
            let handle = map.get("id").and_then(Json::as_str).and_then(Handle::parse);
            match (kind, handle) {
                ("handle", Some(h)) => WireValue::Handle(h),
                (_, Some(h)) => WireValue::Callable(h),
                (_, None) => WireValue::Undefined,
            }
        }
        Some("pairs") => {
            let keys = list_field(map.remove("keys"));
            let mut values = list_field(map.remove("values"));
            values.resize(keys.len(), WireValue::Undefined);
            WireValue::Pairs(keys, values)
        }
        _ => WireValue::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect()),
    }
}

fn list_field(json: Option<Json>) -> Vec<WireValue> {
    match json {
        Some(Json::Array(items)) => items.into_iter().map(from_json).collect(),
        _ => Vec::new(),
    }
}

/// Serializes named arguments as one JSON object.
pub fn args_to_json(args: &Args) -> Json {
    Json::Object(args.iter().map(|(k, v)| (k.to_owned(), to_json(v))).collect())
}

/// Parses a JSON object of named arguments.
pub fn args_from_json(json: Json) -> Result<Args> {
    match from_json(json) {
        WireValue::Map(entries) => Ok(Args::from(entries)),
        WireValue::Pairs(keys, values) => {
            let mut args = Args::new();
            for (key, value) in keys.into_iter().zip(values) {
                let WireValue::String(key) = key else {
                    return Err(Error::Protocol("argument names must be strings".into()));
                };
                args.insert(key, value);
            }
            Ok(args)
        }
        _ => Err(Error::Protocol("arguments must be an object".into())),
    }
}

/// Serializes a completed call as the `{ok}` / `{err}` envelope understood by the glue.
pub fn outcome_to_json(status: &std::result::Result<WireValue, ErrorPayload>) -> String {
    let envelope = match status {
        Ok(value) => json!({ "ok": to_json(value) }),
        Err(payload) => json!({ "err": ErrorJson::from(payload) }),
    };
    envelope.to_string()
}

/// Parses the `{ok}` / `{err}` envelope returned by the glue.
pub fn outcome_from_json(text: &str) -> Result<std::result::Result<WireValue, ErrorPayload>> {
    let mut envelope: Json = serde_json::from_str(text)?;
    if let Some(err) = envelope.get_mut("err") {
        let err: ErrorJson = serde_json::from_value(err.take())?;
        return Ok(Err(err.into()));
    }
    match envelope.get_mut("ok") {
        Some(ok) => Ok(Ok(from_json(ok.take()))),
        None => Err(Error::Protocol(format!("reply envelope has neither ok nor err: {}", text))),
    }
}
