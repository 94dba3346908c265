//! Dotted-path navigation over YAML documents
//!
//! `security.authn.ldap.enabled` addresses nested mapping keys. Sequences are
//! not indexable by path.

use crate::error::{Result, StoreError};
use serde_yaml::{Mapping, Value};

/// Split a dotted path, rejecting empty segments
pub(crate) fn segments(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

pub(crate) fn lookup<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_mapping()?.get(*segment))
}

fn lookup_mut<'a>(root: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_mapping_mut()?.get_mut(*segment))
}

/// Write `value` at `segments`, creating intermediate mappings
///
/// Null intermediates are replaced by mappings; any other non-mapping
/// intermediate is an error and leaves the document untouched.
pub(crate) fn assign(root: &mut Value, segments: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(StoreError::InvalidPath(String::new()));
    };

    let mut node = root;
    for (depth, segment) in parents.iter().enumerate() {
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| StoreError::NotAMapping(segments[..depth].join(".")))?;
        node = map
            .entry(Value::String((*segment).to_string()))
            .or_insert(Value::Null);
    }

    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    let map = node
        .as_mapping_mut()
        .ok_or_else(|| StoreError::NotAMapping(parents.join(".")))?;
    map.insert(Value::String((*last).to_string()), value);
    Ok(())
}

pub(crate) fn remove(root: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    lookup_mut(root, parents)?.as_mapping_mut()?.remove(*last)
}

/// Short name of a value's YAML kind, for messages
pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
