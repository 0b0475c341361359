//! Value exchange between Rust and the script engine.
//!
//! Values cross the engine boundary as JSON text in a tagged form that keeps
//! the types plain JSON cannot express. Tagged nodes are objects with a `"$"`
//! member; plain objects are always wrapped so a user key named `$` can never
//! be mistaken for a tag:
//!
//! | value            | bridge JSON                                   |
//! |------------------|-----------------------------------------------|
//! | object           | `{"$":"object","v":{...}}`                    |
//! | undefined        | `{"$":"undefined"}`                           |
//! | NaN / ±Inf / -0  | `{"$":"number","v":"NaN"}`                    |
//! | bigint           | `{"$":"bigint","v":"123"}`                    |
//! | Date             | `{"$":"date","v":1700000000000}`              |
//! | RegExp           | `{"$":"regexp","source":"a+","flags":"g"}`   |
//! | Set              | `{"$":"set","v":[...]}`                       |
//! | Map              | `{"$":"map","v":[[k, v], ...]}`               |

use crate::codec::value::{number_to_json, special_number_text};
use crate::codec::WireValue;
use crate::error::CodecError;
use chrono::DateTime;
use serde_json::{json, Map, Value as JsonValue};

/// Installs `__abledev_encode`, `__abledev_decode` and `__abledev_invoke` as
/// globals. Evaluated in every engine context before the module.
///
/// `__abledev_invoke` adds `context.response` with `setHeader(name, value)`
/// and `appendHeader(name, value)`, and settles with
/// `{"value": <bridge JSON>, "headers": [["set" | "append", name, value], ...]}`.
pub const BRIDGE_PRELUDE: &str = r#"
(function (global) {
  function enc(v) {
    if (v === null) return null;
    switch (typeof v) {
      case "undefined": return { $: "undefined" };
      case "boolean":
      case "string": return v;
      case "number":
        if (Object.is(v, -0)) return { $: "number", v: "-0" };
        if (Number.isFinite(v)) return v;
        return { $: "number", v: Number.isNaN(v) ? "NaN" : (v > 0 ? "Infinity" : "-Infinity") };
      case "bigint": return { $: "bigint", v: v.toString() };
      case "function":
      case "symbol": return { $: "undefined" };
    }
    if (v instanceof Date) {
      const t = v.getTime();
      if (Number.isNaN(t)) throw new TypeError("Invalid Date cannot be sent");
      return { $: "date", v: t };
    }
    if (v instanceof RegExp) return { $: "regexp", source: v.source, flags: v.flags };
    if (v instanceof Set) return { $: "set", v: Array.from(v, enc) };
    if (v instanceof Map) return { $: "map", v: Array.from(v, function (e) { return [enc(e[0]), enc(e[1])]; }) };
    if (Array.isArray(v)) {
      const out = new Array(v.length);
      for (let i = 0; i < v.length; i++) out[i] = enc(v[i]);
      return out;
    }
    if (typeof v.toJSON === "function") return enc(v.toJSON());
    const obj = {};
    for (const k of Object.keys(v)) {
      const item = v[k];
      if (typeof item === "function" || typeof item === "symbol") continue;
      obj[k] = enc(item);
    }
    return { $: "object", v: obj };
  }

  function dec(v) {
    if (v === null || typeof v !== "object") return v;
    if (Array.isArray(v)) return v.map(dec);
    switch (v.$) {
      case "undefined": return undefined;
      case "number": return Number(v.v);
      case "bigint": return BigInt(v.v);
      case "date": return new Date(v.v);
      case "regexp": return new RegExp(v.source, v.flags);
      case "set": return new Set(v.v.map(dec));
      case "map": return new Map(v.v.map(function (e) { return [dec(e[0]), dec(e[1])]; }));
      case "object": {
        const obj = {};
        for (const k of Object.keys(v.v)) obj[k] = dec(v.v[k]);
        return obj;
      }
    }
    throw new TypeError("Unknown bridge tag: " + String(v.$));
  }

  function message(e) {
    if (e instanceof Error) return e.name + ": " + e.message;
    return String(e);
  }

  function responseHandle(ops) {
    return {
      setHeader: function (name, value) { ops.push(["set", String(name), String(value)]); },
      appendHeader: function (name, value) { ops.push(["append", String(name), String(value)]); }
    };
  }

  global.__abledev_encode = function (v) { return JSON.stringify(enc(v)); };
  global.__abledev_decode = function (text) { return dec(JSON.parse(text)); };
  global.__abledev_invoke = function (fn, argsText, contextText) {
    const ops = [];
    return Promise.resolve()
      .then(function () {
        const context = dec(JSON.parse(contextText));
        context.response = responseHandle(ops);
        return fn(dec(JSON.parse(argsText)), context);
      })
      .then(function (result) { return JSON.stringify({ value: enc(result), headers: ops }); },
            function (e) { throw message(e); });
  };
})(globalThis);
"#;

/// Convert a wire value into bridge JSON.
pub fn to_bridge_json(value: &WireValue) -> JsonValue {
    match value {
        WireValue::Undefined => json!({ "$": "undefined" }),
        WireValue::Null => JsonValue::Null,
        WireValue::Bool(b) => JsonValue::Bool(*b),
        WireValue::Number(n) => match special_number_text(*n) {
            Some(text) => json!({ "$": "number", "v": text }),
            None => number_to_json(*n),
        },
        WireValue::BigInt(n) => json!({ "$": "bigint", "v": n.to_string() }),
        WireValue::String(s) => JsonValue::String(s.clone()),
        WireValue::Date(d) => json!({ "$": "date", "v": d.timestamp_millis() }),
        WireValue::RegExp { source, flags } => {
            json!({ "$": "regexp", "source": source, "flags": flags })
        }
        WireValue::Array(items) => JsonValue::Array(items.iter().map(to_bridge_json).collect()),
        WireValue::Set(items) => json!({
            "$": "set",
            "v": items.iter().map(to_bridge_json).collect::<Vec<_>>(),
        }),
        WireValue::Map(entries) => json!({
            "$": "map",
            "v": entries
                .iter()
                .map(|(k, v)| JsonValue::Array(vec![to_bridge_json(k), to_bridge_json(v)]))
                .collect::<Vec<_>>(),
        }),
        WireValue::Object(map) => {
            let inner: Map<String, JsonValue> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_bridge_json(v)))
                .collect();
            json!({ "$": "object", "v": inner })
        }
    }
}

/// Convert bridge JSON produced by the prelude back into a wire value.
pub fn from_bridge_json(value: JsonValue) -> Result<WireValue, CodecError> {
    match value {
        JsonValue::Null => Ok(WireValue::Null),
        JsonValue::Bool(b) => Ok(WireValue::Bool(b)),
        JsonValue::Number(n) => Ok(WireValue::Number(n.as_f64().unwrap_or(f64::NAN))),
        JsonValue::String(s) => Ok(WireValue::String(s)),
        JsonValue::Array(items) => items
            .into_iter()
            .map(from_bridge_json)
            .collect::<Result<Vec<_>, _>>()
            .map(WireValue::Array),
        JsonValue::Object(mut node) => {
            let tag = match node.remove("$") {
                Some(JsonValue::String(tag)) => tag,
                _ => return Err(invalid("tagged node", "missing '$' tag")),
            };
            let payload = node.remove("v");
            match tag.as_str() {
                "undefined" => Ok(WireValue::Undefined),
                "object" => match payload {
                    Some(JsonValue::Object(fields)) => fields
                        .into_iter()
                        .map(|(k, v)| from_bridge_json(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()
                        .map(WireValue::Object),
                    _ => Err(invalid("object", "payload must be an object")),
                },
                "number" => match payload.as_ref().and_then(JsonValue::as_str) {
                    Some("NaN") => Ok(WireValue::Number(f64::NAN)),
                    Some("Infinity") => Ok(WireValue::Number(f64::INFINITY)),
                    Some("-Infinity") => Ok(WireValue::Number(f64::NEG_INFINITY)),
                    Some("-0") => Ok(WireValue::Number(-0.0)),
                    _ => Err(invalid("number", "unexpected special number")),
                },
                "bigint" => payload
                    .as_ref()
                    .and_then(JsonValue::as_str)
                    .and_then(|s| s.parse::<i128>().ok())
                    .map(WireValue::BigInt)
                    .ok_or_else(|| invalid("bigint", "out of range or malformed")),
                "date" => payload
                    .as_ref()
                    .and_then(JsonValue::as_f64)
                    .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
                    .map(WireValue::Date)
                    .ok_or_else(|| invalid("Date", "timestamp out of range")),
                "regexp" => {
                    let text = |field: &str| {
                        node.get(field)
                            .and_then(JsonValue::as_str)
                            .map(str::to_string)
                    };
                    match (text("source"), text("flags")) {
                        (Some(source), Some(flags)) => Ok(WireValue::RegExp { source, flags }),
                        _ => Err(invalid("regexp", "missing source or flags")),
                    }
                }
                "set" => match payload {
                    Some(JsonValue::Array(items)) => items
                        .into_iter()
                        .map(from_bridge_json)
                        .collect::<Result<Vec<_>, _>>()
                        .map(WireValue::Set),
                    _ => Err(invalid("set", "payload must be an array")),
                },
                "map" => match payload {
                    Some(JsonValue::Array(items)) => items
                        .into_iter()
                        .map(|entry| match entry {
                            JsonValue::Array(pair) if pair.len() == 2 => {
                                let mut pair = pair.into_iter();
                                let key = from_bridge_json(pair.next().unwrap_or_default())?;
                                let value = from_bridge_json(pair.next().unwrap_or_default())?;
                                Ok((key, value))
                            }
                            _ => Err(invalid("map", "entries must be [key, value] pairs")),
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(WireValue::Map),
                    _ => Err(invalid("map", "payload must be an array")),
                },
                other => Err(CodecError::UnknownType {
                    annotation: other.to_string(),
                    path: String::new(),
                }),
            }
        }
    }
}

fn invalid(expected: &'static str, message: &str) -> CodecError {
    CodecError::InvalidValue {
        expected,
        path: String::new(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    #[test]
    fn test_plain_objects_are_wrapped() {
        let value = WireValue::object([("$", WireValue::from("user data"))]);
        let bridged = to_bridge_json(&value);
        assert_eq!(bridged, json!({ "$": "object", "v": { "$": "user data" } }));
        assert_eq!(from_bridge_json(bridged).unwrap(), value);
    }

    #[test]
    fn test_rich_values_survive_the_bridge() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let value = WireValue::object([
            ("when", WireValue::Date(when)),
            ("missing", WireValue::Undefined),
            ("big", WireValue::BigInt(9_007_199_254_740_993)),
            ("tags", WireValue::Set(vec![WireValue::from("a")])),
            (
                "lookup",
                WireValue::Map(vec![(WireValue::from(1), WireValue::from("one"))]),
            ),
            (
                "pattern",
                WireValue::RegExp {
                    source: "^a+$".into(),
                    flags: "i".into(),
                },
            ),
            ("inf", WireValue::Number(f64::NEG_INFINITY)),
        ]);
        let back = from_bridge_json(to_bridge_json(&value)).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_negative_zero_is_tagged() {
        let bridged = to_bridge_json(&WireValue::Number(-0.0));
        assert_eq!(bridged, json!({ "$": "number", "v": "-0" }));
        let back = from_bridge_json(bridged).unwrap();
        assert!(back.as_f64().map(f64::is_sign_negative).unwrap_or(false));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = from_bridge_json(json!({ "$": "symbol" })).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType { annotation, .. } if annotation == "symbol"));
    }

    #[test]
    fn test_untagged_object_is_rejected() {
        assert!(from_bridge_json(json!({ "a": 1 })).is_err());
    }
}
