//! Patch operation application.

use super::types::{JsonPointer, PatchOp};
use crate::error::{Result, SyncError};
use serde_json::Value;

/// Work out what `operation` would do to `doc` without touching it.
///
/// Returns `Ok(true)` if applying it changes the document, `Ok(false)` for a
/// no-op (removing an absent key, writing an identical value), and an error
/// for operations that cannot be applied (missing parent, bad index).
pub fn operation_effect(doc: &Value, operation: &PatchOp) -> Result<bool> {
    match operation {
        PatchOp::ReplaceRoot(value) => Ok(doc != value),

        PatchOp::Add { path, value } => {
            let (parent, key) = resolve_parent(doc, path)?;
            match parent {
                Value::Object(map) => Ok(map.get(key) != Some(value)),
                Value::Array(arr) => {
                    insert_index(key, arr.len(), path)?;
                    Ok(true)
                }
                _ => Err(not_a_container(path)),
            }
        }

        PatchOp::Replace { path, value } => {
            let (parent, key) = resolve_parent(doc, path)?;
            match parent {
                Value::Object(map) => Ok(map.get(key) != Some(value)),
                Value::Array(arr) => {
                    let index = existing_index(key, arr.len(), path)?;
                    Ok(&arr[index] != value)
                }
                _ => Err(not_a_container(path)),
            }
        }

        PatchOp::Remove { path } => {
            // Anything missing along the way means there is nothing to remove.
            let Ok((parent, key)) = resolve_parent(doc, path) else {
                return Ok(false);
            };
            match parent {
                Value::Object(map) => Ok(map.contains_key(key)),
                Value::Array(arr) => Ok(existing_index(key, arr.len(), path).is_ok()),
                _ => Ok(false),
            }
        }
    }
}

/// Apply a patch operation to a document in place.
///
/// Object writes upsert and keep sibling keys. Array `add` inserts (or
/// appends at `-`); array `replace` overwrites an existing slot. Removing
/// something absent leaves the document unchanged.
pub fn apply_operation(doc: &mut Value, operation: PatchOp) -> Result<()> {
    match operation {
        PatchOp::ReplaceRoot(value) => {
            *doc = value;
            Ok(())
        }

        PatchOp::Add { path, value } => {
            let (parent, key) = resolve_parent_mut(doc, &path)?;
            match parent {
                Value::Object(map) => {
                    map.insert(key.to_string(), value);
                    Ok(())
                }
                Value::Array(arr) => {
                    let index = insert_index(key, arr.len(), &path)?;
                    arr.insert(index, value);
                    Ok(())
                }
                _ => Err(not_a_container(&path)),
            }
        }

        PatchOp::Replace { path, value } => {
            let (parent, key) = resolve_parent_mut(doc, &path)?;
            match parent {
                Value::Object(map) => {
                    map.insert(key.to_string(), value);
                    Ok(())
                }
                Value::Array(arr) => {
                    let index = existing_index(key, arr.len(), &path)?;
                    arr[index] = value;
                    Ok(())
                }
                _ => Err(not_a_container(&path)),
            }
        }

        PatchOp::Remove { path } => {
            let Ok((parent, key)) = resolve_parent_mut(doc, &path) else {
                return Ok(());
            };
            match parent {
                Value::Object(map) => {
                    map.remove(key);
                }
                Value::Array(arr) => {
                    if let Ok(index) = existing_index(key, arr.len(), &path) {
                        arr.remove(index);
                    }
                }
                _ => {}
            }
            Ok(())
        }
    }
}

fn resolve_parent<'a, 'p>(doc: &'a Value, path: &'p JsonPointer) -> Result<(&'a Value, &'p str)> {
    let (parents, last) = path
        .split_last()
        .ok_or_else(|| SyncError::MalformedPatch("keyed operation at document root".into()))?;

    let mut node = doc;
    for token in parents {
        node = match node {
            Value::Object(map) => map.get(token),
            Value::Array(arr) => parse_index(token).and_then(|i| arr.get(i)),
            _ => None,
        }
        .ok_or_else(|| SyncError::PathNotFound(path.to_string()))?;
    }
    Ok((node, last))
}

fn resolve_parent_mut<'a, 'p>(
    doc: &'a mut Value,
    path: &'p JsonPointer,
) -> Result<(&'a mut Value, &'p str)> {
    let (parents, last) = path
        .split_last()
        .ok_or_else(|| SyncError::MalformedPatch("keyed operation at document root".into()))?;

    let mut node = doc;
    for token in parents {
        node = match node {
            Value::Object(map) => map.get_mut(token),
            Value::Array(arr) => parse_index(token).and_then(move |i| arr.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| SyncError::PathNotFound(path.to_string()))?;
    }
    Ok((node, last))
}

/// Array indices are plain decimals without leading zeros.
fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn insert_index(token: &str, len: usize, path: &JsonPointer) -> Result<usize> {
    if token == "-" {
        return Ok(len);
    }
    match parse_index(token) {
        Some(index) if index <= len => Ok(index),
        _ => Err(SyncError::PathNotFound(format!(
            "{} (array length {})",
            path, len
        ))),
    }
}

fn existing_index(token: &str, len: usize, path: &JsonPointer) -> Result<usize> {
    match parse_index(token) {
        Some(index) if index < len => Ok(index),
        _ => Err(SyncError::PathNotFound(format!(
            "{} (array length {})",
            path, len
        ))),
    }
}

fn not_a_container(path: &JsonPointer) -> SyncError {
    SyncError::PathNotFound(format!("{}: parent is not an object or array", path))
}
