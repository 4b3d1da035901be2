//! Patch operations, JSON pointers and stream frames.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A parsed RFC 6901 JSON pointer.
///
/// Both `""` and `"/"` address the document root.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct JsonPointer {
    tokens: Vec<String>,
}

impl JsonPointer {
    pub fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() || path == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(SyncError::InvalidPointer(path.to_string()));
        };

        let tokens = rest
            .split('/')
            .map(|raw| unescape(raw).ok_or_else(|| SyncError::InvalidPointer(path.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tokens })
    }

    /// Pointer from unescaped segments, e.g. `["tasks", id]`.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Parent tokens and the final token. `None` for the root.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.tokens
            .split_last()
            .map(|(last, parent)| (parent, last.as_str()))
    }
}

fn unescape(raw: &str) -> Option<String> {
    if !raw.contains('~') {
        return Some(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl fmt::Debug for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonPointer({:?})", self.to_string())
    }
}

/// One instruction against a projected document.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchOp {
    /// Discard the document and install this value.
    ReplaceRoot(Value),
    /// Upsert into an object, or insert into an array.
    Add { path: JsonPointer, value: Value },
    /// Overwrite an object key or existing array slot.
    Replace { path: JsonPointer, value: Value },
    /// Delete. Missing targets are not an error.
    Remove { path: JsonPointer },
}

impl PatchOp {
    pub fn add(path: &str, value: Value) -> Result<Self> {
        Self::from_raw(RawPatchOp::new("add", path, Some(value)))
    }

    pub fn replace(path: &str, value: Value) -> Result<Self> {
        Self::from_raw(RawPatchOp::new("replace", path, Some(value)))
    }

    pub fn remove(path: &str) -> Result<Self> {
        Self::from_raw(RawPatchOp::new("remove", path, None))
    }

    /// Interpret one wire operation.
    pub fn from_raw(raw: RawPatchOp) -> Result<Self> {
        let op = raw
            .op
            .ok_or_else(|| SyncError::MalformedPatch("missing \"op\"".into()))?;
        let path = JsonPointer::parse(raw.path.as_deref().unwrap_or(""))?;

        match op.as_str() {
            "add" | "replace" => {
                let value = raw
                    .value
                    .ok_or_else(|| SyncError::MalformedPatch(format!("{} without value", op)))?;
                if path.is_root() {
                    Ok(PatchOp::ReplaceRoot(value))
                } else if op == "add" {
                    Ok(PatchOp::Add { path, value })
                } else {
                    Ok(PatchOp::Replace { path, value })
                }
            }
            "remove" => {
                if path.is_root() {
                    return Err(SyncError::MalformedPatch("remove at document root".into()));
                }
                Ok(PatchOp::Remove { path })
            }
            other => Err(SyncError::MalformedPatch(format!(
                "unsupported op {:?}",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PatchOp::ReplaceRoot(_) => "replace-root",
            PatchOp::Add { .. } => "add",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Remove { .. } => "remove",
        }
    }
}

/// An operation as it appears on the wire.
///
/// Append-style streams omit `op` and `path` and only carry `value`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPatchOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl RawPatchOp {
    pub fn new(op: &str, path: &str, value: Option<Value>) -> Self {
        Self {
            op: Some(op.to_string()),
            path: Some(path.to_string()),
            value,
        }
    }

    /// A bare `{ "value": ... }` entry.
    pub fn entry(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }
}

/// A decoded patch-stream frame.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamFrame {
    /// `{"JsonPatch": [...]}`
    Patch(Vec<RawPatchOp>),
    /// `{"finished": true}`
    Finished,
}

impl StreamFrame {
    /// Decode one UTF-8 JSON frame.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SyncError::MalformedFrame(format!("not JSON: {}", e)))?;

        if let Some(ops) = value.get("JsonPatch") {
            let ops: Vec<RawPatchOp> = serde_json::from_value(ops.clone())
                .map_err(|e| SyncError::MalformedFrame(format!("bad JsonPatch: {}", e)))?;
            return Ok(StreamFrame::Patch(ops));
        }

        match value.get("finished") {
            Some(Value::Bool(true)) => Ok(StreamFrame::Finished),
            _ => Err(SyncError::MalformedFrame(format!(
                "unrecognized frame: {}",
                truncate(text, 120)
            ))),
        }
    }

    /// Encode, mainly for scripted servers.
    pub fn encode(&self) -> String {
        match self {
            StreamFrame::Patch(ops) => serde_json::json!({ "JsonPatch": ops }).to_string(),
            StreamFrame::Finished => serde_json::json!({ "finished": true }).to_string(),
        }
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
