// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field-level transforms.

use logpipe_core::{Event, ProcessorError, Transform};
use serde_json::Value;
use std::collections::BTreeMap;

/// Replaces a field's value through a lookup table.
///
/// Business result is `false` when the field is absent or null, or when the
/// table has no entry for its value. Non-string values are looked up by their
/// JSON text, so `1` matches the key `"1"`.
#[derive(Debug, Clone)]
pub struct Mapper {
    field: String,
    map: BTreeMap<String, Value>,
}

impl Mapper {
    /// Mapper rewriting `field` through `map`.
    pub fn new(field: impl Into<String>, map: BTreeMap<String, Value>) -> Self {
        Self {
            field: field.into(),
            map,
        }
    }
}

impl Transform for Mapper {
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        let key = match event.get(&self.field) {
            None | Some(Value::Null) => return Ok(false),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        match self.map.get(&key) {
            Some(mapped) => {
                event.put(self.field.clone(), mapped.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Writes a constant.
#[derive(Debug, Clone)]
pub struct Set {
    field: String,
    value: Value,
}

impl Set {
    /// Assign `value` to `field`.
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl Transform for Set {
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        event.put(self.field.clone(), self.value.clone());
        Ok(true)
    }
}

/// Moves a field. `false` when the source is absent.
#[derive(Debug, Clone)]
pub struct Rename {
    from: String,
    to: String,
}

impl Rename {
    /// Move `from` to `to`.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Transform for Rename {
    fn is_process_needed(&self, event: &Event) -> bool {
        event.contains_key(&self.from)
    }

    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        match event.remove(&self.from) {
            Some(value) => {
                event.put(self.to.clone(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Deletes a field. `false` when it was absent.
#[derive(Debug, Clone)]
pub struct Remove {
    field: String,
}

impl Remove {
    /// Delete `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Transform for Remove {
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        Ok(event.remove(&self.field).is_some())
    }
}

/// Business result is whether a field equals a value; the event is not
/// modified.
#[derive(Debug, Clone)]
pub struct Matches {
    field: String,
    value: Value,
}

impl Matches {
    /// Compare `field` against `value`.
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl Transform for Matches {
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        Ok(event.get(&self.field) == Some(&self.value))
    }
}
