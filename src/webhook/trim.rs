//! Splitting oversized push payloads into bounded envelopes.
//!
//! Every produced envelope keeps the parent's headers, query values and
//! basic auth. Signatures are not recomputed: trimming runs after
//! verification.

use serde_json::Value;

use crate::error::{PluginError, PluginResult};
use crate::models::PspWebhook;

pub const DEFAULT_CHUNK_SIZE: usize = 100;

fn parse_body(webhook: &PspWebhook) -> PluginResult<Value> {
    if webhook.body.is_empty() {
        return Err(PluginError::InvalidRequest("webhook body is empty".into()));
    }
    Ok(serde_json::from_slice(&webhook.body)?)
}

fn check_chunk_size(chunk_size: usize) -> PluginResult<()> {
    if chunk_size == 0 {
        return Err(PluginError::InvalidRequest("trim chunk size must be positive".into()));
    }
    Ok(())
}

fn array_at<'a>(root: &'a mut Value, pointer: &str) -> PluginResult<Option<&'a mut Vec<Value>>> {
    match root.pointer_mut(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(PluginError::InvalidRequest(format!(
            "{} is not an array",
            pointer
        ))),
    }
}

/// Split the array at JSON pointer `pointer` into envelopes of at most
/// `chunk_size` elements each.
///
/// `N` elements give `ceil(N / chunk_size)` envelopes, so an empty array
/// gives none. A missing or null field returns the envelope unchanged.
pub fn trim_json_array(
    webhook: &PspWebhook,
    pointer: &str,
    chunk_size: usize,
) -> PluginResult<Vec<PspWebhook>> {
    check_chunk_size(chunk_size)?;
    let mut root = parse_body(webhook)?;
    let items = match array_at(&mut root, pointer)? {
        Some(items) => std::mem::take(items),
        None => return Ok(vec![webhook.clone()]),
    };

    let mut out = Vec::with_capacity(items.len().div_ceil(chunk_size));
    for chunk in items.chunks(chunk_size) {
        if let Some(slot) = root.pointer_mut(pointer) {
            *slot = Value::Array(chunk.to_vec());
        }
        out.push(webhook.with_body(serde_json::to_vec(&root)?));
    }
    Ok(out)
}

/// Split a payload holding a list of parents, each with its own child list,
/// into envelopes carrying exactly one parent and at most `chunk_size`
/// of its children.
///
/// A parent with no children still yields one envelope so its own fields
/// (an account's balance, say) are not lost.
pub fn trim_nested(
    webhook: &PspWebhook,
    parents_pointer: &str,
    children_field: &str,
    chunk_size: usize,
) -> PluginResult<Vec<PspWebhook>> {
    check_chunk_size(chunk_size)?;
    let mut root = parse_body(webhook)?;
    let parents = match array_at(&mut root, parents_pointer)? {
        Some(parents) => std::mem::take(parents),
        None => return Ok(vec![webhook.clone()]),
    };

    let mut out = Vec::new();
    for mut parent in parents {
        let children = match parent.get_mut(children_field) {
            Some(Value::Array(children)) => std::mem::take(children),
            _ => Vec::new(),
        };
        let chunks: Vec<&[Value]> = if children.is_empty() {
            vec![children.as_slice()]
        } else {
            children.chunks(chunk_size).collect()
        };

        for chunk in chunks {
            let mut single = parent.clone();
            if let Some(obj) = single.as_object_mut() {
                obj.insert(children_field.to_string(), Value::Array(chunk.to_vec()));
            }
            if let Some(slot) = root.pointer_mut(parents_pointer) {
                *slot = Value::Array(vec![single]);
            }
            out.push(webhook.with_body(serde_json::to_vec(&root)?));
        }
    }
    Ok(out)
}
