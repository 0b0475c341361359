//! Wire codec: extended JSON that keeps dates, sets, maps and friends.
//!
//! The encoded text is a superjson envelope:
//!
//! ```json
//! {"json": {"when": "2024-05-01T12:00:00Z"}, "meta": {"values": {"when": ["Date"]}}}
//! ```
//!
//! `json` is the plain-JSON rendition of the value. `meta.values` is an
//! annotation tree for every value plain JSON cannot express:
//!
//! - `["<tag>"]` annotates the node itself;
//! - `["<tag>", {children}]` annotates a set or map whose elements carry
//!   annotations of their own;
//! - `{children}` holds the annotations below a plain object or array.
//!
//! Children are keyed by dotted paths relative to their parent, so plain
//! containers are flattened into the nearest annotated ancestor. A
//! non-JSON root is therefore written as `"values": ["<tag>", ...]`.

mod path;
pub(crate) mod value;

pub use value::WireValue;

use crate::error::CodecError;
use serde_json::{json, Map, Value as JsonValue};
use value::{format_date, format_regexp, number_to_json, parse_date, special_number_text};

/// Type tags written in `meta.values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeTag {
    Date,
    Set,
    Map,
    BigInt,
    Undefined,
    RegExp,
    Number,
}

impl TypeTag {
    fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Date => "Date",
            TypeTag::Set => "set",
            TypeTag::Map => "map",
            TypeTag::BigInt => "bigint",
            TypeTag::Undefined => "undefined",
            TypeTag::RegExp => "regexp",
            TypeTag::Number => "number",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "Date" => Some(TypeTag::Date),
            "set" => Some(TypeTag::Set),
            "map" => Some(TypeTag::Map),
            "bigint" => Some(TypeTag::BigInt),
            "undefined" => Some(TypeTag::Undefined),
            "regexp" => Some(TypeTag::RegExp),
            "number" => Some(TypeTag::Number),
            _ => None,
        }
    }
}

/// Encode a value into wire text.
pub fn encode(value: &WireValue) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&encode_to_json(value))?)
}

/// Encode a value into the envelope as a JSON tree.
pub fn encode_to_json(value: &WireValue) -> JsonValue {
    let (plain, annotations) = walk(value);

    let mut envelope = Map::new();
    envelope.insert("json".to_string(), plain);
    if let Some(values) = annotations {
        envelope.insert("meta".to_string(), json!({ "values": values }));
    }
    JsonValue::Object(envelope)
}

fn leaf(tag: TypeTag) -> Option<JsonValue> {
    Some(json!([tag.as_str()]))
}

/// Plain JSON rendition of `value` plus its annotation tree, if any.
fn walk(value: &WireValue) -> (JsonValue, Option<JsonValue>) {
    match value {
        WireValue::Undefined => (JsonValue::Null, leaf(TypeTag::Undefined)),
        WireValue::Null => (JsonValue::Null, None),
        WireValue::Bool(b) => (JsonValue::Bool(*b), None),
        WireValue::Number(n) => match special_number_text(*n) {
            Some(text) => (JsonValue::String(text.to_string()), leaf(TypeTag::Number)),
            None => (number_to_json(*n), None),
        },
        WireValue::BigInt(n) => (JsonValue::String(n.to_string()), leaf(TypeTag::BigInt)),
        WireValue::String(s) => (JsonValue::String(s.clone()), None),
        WireValue::Date(d) => (JsonValue::String(format_date(d)), leaf(TypeTag::Date)),
        WireValue::RegExp { source, flags } => (
            JsonValue::String(format_regexp(source, flags)),
            leaf(TypeTag::RegExp),
        ),
        WireValue::Array(items) => {
            let mut children = Children::default();
            let plain = children.visit_items(items);
            (JsonValue::Array(plain), children.into_tree(None))
        }
        WireValue::Set(items) => {
            let mut children = Children::default();
            let plain = children.visit_items(items);
            (JsonValue::Array(plain), children.into_tree(Some(TypeTag::Set)))
        }
        WireValue::Map(entries) => {
            let mut children = Children::default();
            let mut pairs = Vec::with_capacity(entries.len());
            for (index, (key, entry_value)) in entries.iter().enumerate() {
                let mut pair = Children::default();
                let key_json = pair.visit("0", key);
                let value_json = pair.visit("1", entry_value);
                children.nest(&index.to_string(), pair.into_tree(None));
                pairs.push(JsonValue::Array(vec![key_json, value_json]));
            }
            (JsonValue::Array(pairs), children.into_tree(Some(TypeTag::Map)))
        }
        WireValue::Object(map) => {
            let mut children = Children::default();
            let object = map
                .iter()
                .map(|(key, entry_value)| (key.clone(), children.visit(key, entry_value)))
                .collect();
            (JsonValue::Object(object), children.into_tree(None))
        }
    }
}

/// Annotations collected below one container, keyed by relative path.
#[derive(Default)]
struct Children(Map<String, JsonValue>);

impl Children {
    fn visit(&mut self, key: &str, value: &WireValue) -> JsonValue {
        let (plain, tree) = walk(value);
        self.nest(key, tree);
        plain
    }

    fn visit_items(&mut self, items: &[WireValue]) -> Vec<JsonValue> {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| self.visit(&index.to_string(), item))
            .collect()
    }

    /// Plain containers have no node of their own: their children move up
    /// with the key prefixed.
    fn nest(&mut self, key: &str, tree: Option<JsonValue>) {
        let key = path::escape(key);
        match tree {
            None => {}
            Some(JsonValue::Object(inner)) => {
                for (child, subtree) in inner {
                    self.0.insert(format!("{}.{}", key, child), subtree);
                }
            }
            Some(node) => {
                self.0.insert(key, node);
            }
        }
    }

    fn into_tree(self, tag: Option<TypeTag>) -> Option<JsonValue> {
        match (tag, self.0.is_empty()) {
            (None, true) => None,
            (None, false) => Some(JsonValue::Object(self.0)),
            (Some(tag), true) => leaf(tag),
            (Some(tag), false) => Some(json!([tag.as_str(), self.0])),
        }
    }
}

/// Decode wire text into a value.
pub fn decode(text: &str) -> Result<WireValue, CodecError> {
    let parsed: JsonValue = serde_json::from_str(text)?;
    decode_json(parsed)
}

/// Decode an already parsed envelope.
///
/// Anything that is not an envelope (an object with a `json` key and at most
/// a `meta` key besides it) is taken as plain JSON.
pub fn decode_json(parsed: JsonValue) -> Result<WireValue, CodecError> {
    let (plain, meta) = match split_envelope(parsed) {
        Ok(parts) => parts,
        Err(plain) => return Ok(WireValue::from(plain)),
    };

    let mut value = WireValue::from(plain);
    let Some(tree) = meta.and_then(|mut meta| meta.remove("values")) else {
        return Ok(value);
    };
    if tree.is_null() {
        return Ok(value);
    }

    // Children come out before their parent, so a set or map is still a
    // plain array while its elements are rebuilt.
    let mut annotations = Vec::new();
    collect_annotations(&tree, &[], &mut annotations)?;
    for (segments, tag) in annotations {
        let raw_path = path::join(&segments);
        let node = node_at(&mut value, &segments, &raw_path)?;
        let current = std::mem::take(node);
        *node = apply_tag(current, tag, &raw_path)?;
    }

    Ok(value)
}

fn split_envelope(parsed: JsonValue) -> Result<(JsonValue, Option<Map<String, JsonValue>>), JsonValue> {
    let mut map = match parsed {
        JsonValue::Object(map) if is_envelope(&map) => map,
        other => return Err(other),
    };
    let plain = map.remove("json").unwrap_or(JsonValue::Null);
    let meta = match map.remove("meta") {
        Some(JsonValue::Object(meta)) => Some(meta),
        _ => None,
    };
    Ok((plain, meta))
}

fn is_envelope(map: &Map<String, JsonValue>) -> bool {
    map.contains_key("json")
        && map.keys().all(|k| k == "json" || k == "meta")
        && map
            .get("meta")
            .map_or(true, |meta| meta.is_object() || meta.is_null())
}

fn collect_annotations(
    tree: &JsonValue,
    origin: &[String],
    out: &mut Vec<(Vec<String>, TypeTag)>,
) -> Result<(), CodecError> {
    match tree {
        JsonValue::Object(children) => {
            for (key, subtree) in children {
                let mut segments = origin.to_vec();
                segments.extend(path::split(key));
                collect_annotations(subtree, &segments, out)?;
            }
            Ok(())
        }
        JsonValue::Array(node) => {
            let raw_path = || path::join(origin);
            let name = node
                .first()
                .and_then(JsonValue::as_str)
                .ok_or_else(|| CodecError::InvalidValue {
                    expected: "type annotation",
                    path: raw_path(),
                    message: "expected [\"<type>\"] or [\"<type>\", {...}]".to_string(),
                })?;
            let tag = TypeTag::parse(name).ok_or_else(|| CodecError::UnknownType {
                annotation: name.to_string(),
                path: raw_path(),
            })?;
            match node.get(1) {
                None | Some(JsonValue::Null) => {}
                Some(children @ JsonValue::Object(_)) => collect_annotations(children, origin, out)?,
                Some(_) => {
                    return Err(CodecError::InvalidValue {
                        expected: "annotation children",
                        path: raw_path(),
                        message: "expected an object".to_string(),
                    })
                }
            }
            out.push((origin.to_vec(), tag));
            Ok(())
        }
        _ => Err(CodecError::InvalidValue {
            expected: "annotation tree",
            path: path::join(origin),
            message: "expected an object or an array".to_string(),
        }),
    }
}

fn node_at<'a>(
    root: &'a mut WireValue,
    segments: &[String],
    raw_path: &str,
) -> Result<&'a mut WireValue, CodecError> {
    let mut node = root;
    for segment in segments {
        node = match node {
            WireValue::Object(map) => map.get_mut(segment),
            WireValue::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(move |index| items.get_mut(index)),
            _ => None,
        }
        .ok_or_else(|| CodecError::InvalidPath(raw_path.to_string()))?;
    }
    Ok(node)
}

fn apply_tag(current: WireValue, tag: TypeTag, raw_path: &str) -> Result<WireValue, CodecError> {
    let invalid = |expected: &'static str, message: String| CodecError::InvalidValue {
        expected,
        path: raw_path.to_string(),
        message,
    };

    match (tag, current) {
        (TypeTag::Undefined, _) => Ok(WireValue::Undefined),
        (TypeTag::Date, WireValue::String(text)) => parse_date(&text)
            .map(WireValue::Date)
            .map_err(|e| invalid("Date", e)),
        (TypeTag::BigInt, WireValue::String(text)) => text
            .parse::<i128>()
            .map(WireValue::BigInt)
            .map_err(|e| invalid("bigint", e.to_string())),
        (TypeTag::Number, WireValue::String(text)) => match text.as_str() {
            "NaN" => Ok(WireValue::Number(f64::NAN)),
            "Infinity" => Ok(WireValue::Number(f64::INFINITY)),
            "-Infinity" => Ok(WireValue::Number(f64::NEG_INFINITY)),
            "-0" => Ok(WireValue::Number(-0.0)),
            other => Err(invalid("number", format!("unexpected '{}'", other))),
        },
        (TypeTag::RegExp, WireValue::String(text)) => parse_regexp(&text)
            .ok_or_else(|| invalid("regexp", format!("malformed literal '{}'", text))),
        (TypeTag::Set, WireValue::Array(items)) => Ok(WireValue::Set(items)),
        (TypeTag::Map, WireValue::Array(items)) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    WireValue::Array(mut pair) if pair.len() == 2 => {
                        let value = pair.pop().unwrap_or_default();
                        let key = pair.pop().unwrap_or_default();
                        entries.push((key, value));
                    }
                    _ => return Err(invalid("map", "entries must be [key, value] pairs".into())),
                }
            }
            Ok(WireValue::Map(entries))
        }
        (tag, other) => Err(invalid(
            tag.as_str(),
            format!("cannot rebuild from {}", variant_name(&other)),
        )),
    }
}

fn parse_regexp(literal: &str) -> Option<WireValue> {
    let body = literal.strip_prefix('/')?;
    let end = body.rfind('/')?;
    Some(WireValue::RegExp {
        source: body[..end].to_string(),
        flags: body[end + 1..].to_string(),
    })
}

fn variant_name(value: &WireValue) -> &'static str {
    match value {
        WireValue::Undefined => "undefined",
        WireValue::Null => "null",
        WireValue::Bool(_) => "boolean",
        WireValue::Number(_) => "number",
        WireValue::BigInt(_) => "bigint",
        WireValue::String(_) => "string",
        WireValue::Date(_) => "Date",
        WireValue::RegExp { .. } => "regexp",
        WireValue::Array(_) => "array",
        WireValue::Set(_) => "set",
        WireValue::Map(_) => "map",
        WireValue::Object(_) => "object",
    }
}
