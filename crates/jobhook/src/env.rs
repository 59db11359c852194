//! Environment diff engine.
//!
//! Environment fields are arrays of `key=value` strings. The script edits
//! them as a mapping, and [`apply_mapping`] folds the edited mapping back into
//! the array: entries the script did not touch stay exactly where they were,
//! changed values are rewritten in place, deleted keys disappear and new keys
//! are appended after every survivor.

use std::collections::BTreeMap;

use crate::array::StringArray;
use crate::codec::FieldError;
use crate::value::Value;

/// Counts from one diff pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvDiff {
    /// Original entries left byte-identical.
    pub kept: usize,
    /// Original entries rewritten with a new value.
    pub rewritten: usize,
    /// Original entries removed.
    pub removed: usize,
    /// New entries appended.
    pub appended: usize,
}

impl EnvDiff {
    /// Returns true if the pass changed nothing.
    pub fn is_unchanged(&self) -> bool {
        self.rewritten == 0 && self.removed == 0 && self.appended == 0
    }
}

/// Split a `key=value` entry at the first `=`.
///
/// An entry without `=` is all key with an empty value.
pub fn split_entry(entry: &str) -> (&str, &str) {
    entry.split_once('=').unwrap_or((entry, ""))
}

/// Build a `key=value` entry.
pub fn join_entry(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// The script-side mapping for an environment array.
///
/// When a key repeats, the first occurrence wins, matching what the diff
/// keeps.
pub fn to_mapping(array: &StringArray) -> BTreeMap<String, Value> {
    let mut mapping = BTreeMap::new();
    for entry in array.iter() {
        let (key, value) = split_entry(entry);
        mapping
            .entry(key.to_string())
            .or_insert_with(|| Value::Str(value.to_string()));
    }
    mapping
}

/// Fold a script-supplied value back into an environment array.
///
/// `null` clears the array. A value that is not a mapping is rejected and the
/// array is left alone.
pub(crate) fn apply_value(
    field: &'static str,
    array: &mut StringArray,
    value: Value,
) -> Result<EnvDiff, FieldError> {
    match value {
        Value::Null => {
            let removed = array.iter().count();
            array.clear();
            Ok(EnvDiff {
                removed,
                ..EnvDiff::default()
            })
        }
        Value::Map(mapping) => Ok(apply_mapping(array, mapping)),
        other => Err(FieldError::TypeMismatch {
            field,
            expected: "map",
            found: other.type_name().to_string(),
        }),
    }
}

/// Reconcile `array` with the edited `mapping`.
///
/// Afterwards every key appears once, carrying the mapping's stringified
/// value, and original keys that survived keep their relative order.
pub fn apply_mapping(array: &mut StringArray, mut mapping: BTreeMap<String, Value>) -> EnvDiff {
    let mut diff = EnvDiff::default();

    for slot in array.slots_mut().iter_mut() {
        let Some(entry) = slot.as_deref() else {
            continue;
        };
        let (key, value) = split_entry(entry);
        match mapping.remove(key) {
            Some(new_value) => {
                let new_value = new_value.to_string();
                if new_value == value {
                    diff.kept += 1;
                } else {
                    *slot = Some(join_entry(key, &new_value));
                    diff.rewritten += 1;
                }
            }
            // Deleted by the script, or a duplicate of a key already consumed.
            None => {
                *slot = None;
                diff.removed += 1;
            }
        }
    }

    array.defragment();
    let survivors = diff.kept + diff.rewritten;
    array.resize(survivors + mapping.len());

    for (slot, (key, value)) in array.slots_mut()[survivors..].iter_mut().zip(mapping) {
        *slot = Some(join_entry(&key, &value.to_string()));
        diff.appended += 1;
    }

    diff
}
