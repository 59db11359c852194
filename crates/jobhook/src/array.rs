//! Ordered string arrays and their normalisation.
//!
//! The host stores list-valued fields (`argv`, environments) as a count plus
//! an array of string slots. [`StringArray`] models that pair: its length is
//! the native count and a `None` slot is an entry that has been removed but
//! not yet compacted away.

use serde::{Deserialize, Serialize};

use crate::codec::FieldError;
use crate::value::Value;

/// An ordered array of string slots.
///
/// Serialized as a plain list of the populated entries, so a deserialized
/// array never has holes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StringArray {
    slots: Vec<Option<String>>,
}

impl StringArray {
    /// Create an empty array.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of slots, i.e. the native count field.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The entry at `index`, if that slot exists and is populated.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(|slot| slot.as_deref())
    }

    /// Iterate over populated entries in array order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }

    /// Raw slots, including removed ones.
    pub fn slots(&self) -> &[Option<String>] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut Vec<Option<String>> {
        &mut self.slots
    }

    /// Append an entry.
    pub fn push(&mut self, entry: impl Into<String>) {
        self.slots.push(Some(entry.into()));
    }

    /// Release every entry and the backing storage.
    pub fn clear(&mut self) {
        self.slots = Vec::new();
    }

    /// Move removed slots to the tail, keeping survivors in order.
    pub fn defragment(&mut self) {
        defragment(&mut self.slots);
    }

    /// Grow or shrink to `new_len` slots.
    pub fn resize(&mut self, new_len: usize) {
        resize(&mut self.slots, new_len);
    }

    /// Copy the populated entries out.
    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(str::to_string).collect()
    }
}

impl From<Vec<String>> for StringArray {
    fn from(entries: Vec<String>) -> Self {
        Self {
            slots: entries.into_iter().map(Some).collect(),
        }
    }
}

impl From<StringArray> for Vec<String> {
    fn from(array: StringArray) -> Self {
        array.slots.into_iter().flatten().collect()
    }
}

impl FromIterator<String> for StringArray {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().map(Some).collect(),
        }
    }
}

/// Compact populated slots to the front of `slots`.
///
/// Survivors keep their relative order and every `None` ends up at the tail.
/// Running it on an already compact array changes nothing.
pub fn defragment(slots: &mut [Option<String>]) {
    let mut next = 0;
    for index in 0..slots.len() {
        if slots[index].is_some() {
            if index != next {
                // Everything in next..index is a hole.
                slots.swap(next, index);
            }
            next += 1;
        }
    }
}

/// Resize `slots` to `new_len`.
///
/// Shrinking drops the trailing entries; growing adds empty slots.
pub fn resize(slots: &mut Vec<Option<String>>, new_len: usize) {
    if new_len < slots.len() {
        slots.truncate(new_len);
        slots.shrink_to_fit();
    } else {
        slots.resize_with(new_len, || None);
    }
}

/// Overwrite `array` with a script-supplied list.
///
/// `null` or an empty list clears the array. Every element is stringified,
/// whatever its type. Anything other than a list is rejected and the array
/// is left alone.
pub(crate) fn ingest_list(
    field: &'static str,
    array: &mut StringArray,
    value: Value,
) -> Result<(), FieldError> {
    let items = match value {
        Value::Null => {
            array.clear();
            return Ok(());
        }
        Value::List(items) => items,
        other => {
            return Err(FieldError::TypeMismatch {
                field,
                expected: "list",
                found: other.type_name().to_string(),
            });
        }
    };

    if items.is_empty() {
        array.clear();
        return Ok(());
    }

    array.resize(items.len());
    for (slot, item) in array.slots.iter_mut().zip(items) {
        *slot = Some(item.to_string());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slots(entries: &[Option<&str>]) -> Vec<Option<String>> {
        entries.iter().map(|e| e.map(str::to_string)).collect()
    }

    // ==================== defragment ====================

    #[test]
    fn test_defragment_moves_holes_to_tail() {
        let mut array = slots(&[Some("x"), None, Some("y"), None, Some("z")]);
        defragment(&mut array);
        assert_eq!(array, slots(&[Some("x"), Some("y"), Some("z"), None, None]));
    }

    #[test]
    fn test_defragment_compact_array_is_noop() {
        let original = slots(&[Some("a"), Some("b"), Some("c")]);
        let mut array = original.clone();
        defragment(&mut array);
        assert_eq!(array, original);
    }

    #[test]
    fn test_defragment_is_idempotent() {
        let mut once = slots(&[None, Some("a"), None, None, Some("b"), Some("c"), None]);
        defragment(&mut once);
        let mut twice = once.clone();
        defragment(&mut twice);
        assert_eq!(once, twice);
        assert_eq!(once, slots(&[Some("a"), Some("b"), Some("c"), None, None, None, None]));
    }

    #[test]
    fn test_defragment_all_holes_and_empty() {
        let mut holes = slots(&[None, None]);
        defragment(&mut holes);
        assert_eq!(holes, slots(&[None, None]));

        let mut empty: Vec<Option<String>> = Vec::new();
        defragment(&mut empty);
        assert!(empty.is_empty());
    }

    // ==================== resize ====================

    #[test]
    fn test_resize_grow_adds_empty_slots() {
        let mut array = slots(&[Some("a")]);
        resize(&mut array, 3);
        assert_eq!(array, slots(&[Some("a"), None, None]));
    }

    #[test]
    fn test_resize_shrink_drops_tail() {
        let mut array = slots(&[Some("a"), Some("b"), Some("c")]);
        resize(&mut array, 1);
        assert_eq!(array, slots(&[Some("a")]));
    }

    // ==================== StringArray ====================

    #[test]
    fn test_string_array_iter_skips_holes() {
        let mut array = StringArray::from(vec!["a".to_string(), "b".to_string()]);
        array.slots_mut()[0] = None;
        assert_eq!(array.len(), 2);
        assert_eq!(array.iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(array.get(0), None);
        assert_eq!(array.get(1), Some("b"));
        assert_eq!(array.get(5), None);
    }

    #[test]
    fn test_string_array_serializes_as_list() {
        let array: StringArray = vec!["x".to_string()].into_iter().collect();
        assert_eq!(serde_json::to_string(&array).unwrap(), r#"["x"]"#);
    }

    #[test]
    fn test_string_array_rejects_null_entries() {
        assert!(serde_json::from_str::<StringArray>(r#"["A=1", null]"#).is_err());

        let array: StringArray = serde_json::from_str(r#"["A=1", "B=2"]"#).unwrap();
        assert_eq!(array.len(), 2);
        assert!(array.slots().iter().all(Option::is_some));
    }

    // ==================== ingest_list ====================

    #[test]
    fn test_ingest_list_overwrites_in_script_order() {
        let mut array = StringArray::from(vec!["old1".to_string(), "old2".to_string()]);
        let value = Value::List(vec![
            Value::Str("new".into()),
            Value::Int(42),
            Value::Bool(true),
        ]);

        ingest_list("argv", &mut array, value).unwrap();

        assert_eq!(array.to_vec(), vec!["new", "42", "true"]);
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_ingest_list_shrinks() {
        let mut array: StringArray = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        ingest_list("argv", &mut array, Value::List(vec![Value::Str("z".into())])).unwrap();
        assert_eq!(array.to_vec(), vec!["z"]);
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_ingest_list_null_and_empty_clear() {
        let mut array = StringArray::from(vec!["a".to_string()]);
        ingest_list("argv", &mut array, Value::Null).unwrap();
        assert!(array.is_empty());

        let mut array = StringArray::from(vec!["a".to_string()]);
        ingest_list("argv", &mut array, Value::List(Vec::new())).unwrap();
        assert!(array.is_empty());
    }

    #[test]
    fn test_ingest_list_rejects_scalar() {
        let mut array = StringArray::from(vec!["keep".to_string()]);
        let err = ingest_list("argv", &mut array, Value::Str("oops".into())).unwrap_err();

        assert!(matches!(
            err,
            FieldError::TypeMismatch { field: "argv", expected: "list", .. }
        ));
        assert_eq!(array.to_vec(), vec!["keep"]);
    }
}
