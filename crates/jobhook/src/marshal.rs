//! Descriptor marshaling.
//!
//! [`to_view`] builds the script's job view from a descriptor and
//! [`from_view`] merges an edited view back, both by walking the active
//! entries of the field table in order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{self, FieldError};
use crate::descriptor::JobDescriptor;
use crate::value::{DynamicView, Value};

/// What to do with view keys that name no known field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldPolicy {
    /// Log each unknown key and carry on with the merge.
    #[default]
    Warn,
    /// Fail the merge before anything is written.
    Reject,
}

/// A failure that prevents the merge as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// The object returned as the job view is not a mapping.
    #[error("job view must be a map, found {found}")]
    NotAMapping {
        /// Observed type.
        found: String,
    },
    /// The view holds keys that name no known field.
    #[error("job view has unknown fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),
}

/// Summary of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Fields written back, in table order.
    pub applied: Vec<&'static str>,
    /// Fields that could not be converted and kept their previous value.
    pub errors: Vec<FieldError>,
    /// Keys that named no known field and were ignored.
    pub unknown: Vec<String>,
}

impl MergeReport {
    /// Returns true if every present field merged and nothing was ignored.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.unknown.is_empty()
    }
}

/// Build the job view for `desc`.
pub fn to_view(desc: &JobDescriptor) -> DynamicView {
    let mut view = DynamicView::new();
    for spec in codec::active_fields() {
        view.insert(spec.name, spec.encode(desc));
    }
    view
}

/// Turn a value returned by the script into a job view.
pub fn view_from_value(value: Value) -> Result<DynamicView, MarshalError> {
    match value {
        Value::Map(fields) => Ok(DynamicView::from(fields)),
        other => Err(MarshalError::NotAMapping {
            found: other.type_name().to_string(),
        }),
    }
}

/// Merge an edited job view back into `desc`.
///
/// Fields missing from the view are left alone. Field-level failures are
/// logged and collected in the report without stopping the merge. An error
/// is only returned for a structural problem, and in that case `desc` has
/// not been touched.
pub fn from_view(
    desc: &mut JobDescriptor,
    mut view: DynamicView,
    unknown_fields: UnknownFieldPolicy,
) -> Result<MergeReport, MarshalError> {
    let unknown: Vec<String> = view
        .keys()
        .filter(|key| codec::active_field(key).is_none())
        .map(str::to_string)
        .collect();
    if !unknown.is_empty() && unknown_fields == UnknownFieldPolicy::Reject {
        return Err(MarshalError::UnknownFields(unknown));
    }

    let mut report = MergeReport::default();
    for spec in codec::active_fields() {
        let Some(value) = view.remove(spec.name) else {
            continue;
        };
        match spec.decode(desc, value) {
            Ok(()) => report.applied.push(spec.name),
            Err(e) => {
                tracing::error!(field = spec.name, error = %e, "could not convert job view entry");
                report.errors.push(e);
            }
        }
    }

    for key in &unknown {
        tracing::warn!(field = %key, "ignoring unknown job view entry");
    }
    report.unknown = unknown;
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::descriptor::{NO_VAL16, NO_VAL32};

    fn sample() -> JobDescriptor {
        let mut desc = JobDescriptor::default();
        desc.name = Some("job1".into());
        desc.partition = Some("batch".into());
        desc.time_limit = 60;
        desc.requeue = 1;
        desc.argv = vec!["run.sh".to_string(), "--fast".to_string()].into();
        desc.environment = vec!["PATH=/bin".to_string(), "HOME=/home/u".to_string()].into();
        desc
    }

    #[test]
    fn test_view_has_every_active_field() {
        let view = to_view(&JobDescriptor::default());
        assert_eq!(view.len(), codec::active_fields().count());
        assert_eq!(view.get("name"), Some(&Value::Null));
        assert_eq!(view.get("time_limit"), Some(&Value::Null));
        assert_eq!(view.get("argv"), Some(&Value::List(Vec::new())));
    }

    #[test]
    fn test_unmodified_view_roundtrips() {
        let original = sample();
        let mut desc = original.clone();

        let report = from_view(&mut desc, to_view(&original), UnknownFieldPolicy::Warn).unwrap();

        assert_eq!(desc, original);
        assert!(report.is_clean());
        assert_eq!(report.applied.len(), codec::active_fields().count());
    }

    #[test]
    fn test_missing_keys_are_untouched() {
        let mut desc = sample();
        let mut view = DynamicView::new();
        view.insert("name", "renamed".into());

        let report = from_view(&mut desc, view, UnknownFieldPolicy::Warn).unwrap();

        assert_eq!(report.applied, vec!["name"]);
        assert_eq!(desc.name.as_deref(), Some("renamed"));
        assert_eq!(desc.partition.as_deref(), Some("batch"));
        assert_eq!(desc.time_limit, 60);
    }

    #[test]
    fn test_null_resets_to_unset() {
        let mut desc = sample();
        let mut view = to_view(&desc);
        view.insert("time_limit", Value::Null);
        view.insert("requeue", Value::Null);
        view.insert("partition", Value::Null);
        view.insert("argv", Value::Null);

        from_view(&mut desc, view, UnknownFieldPolicy::Warn).unwrap();

        assert_eq!(desc.time_limit, NO_VAL32);
        assert_eq!(desc.requeue, NO_VAL16);
        assert!(desc.partition.is_none());
        assert!(desc.argv.is_empty());
    }

    #[test]
    fn test_bad_field_is_isolated() {
        let mut desc = sample();
        let mut view = to_view(&desc);
        view.insert("time_limit", "forever".into());
        view.insert("environment", Value::List(Vec::new()));
        view.insert("name", "renamed".into());

        let report = from_view(&mut desc, view, UnknownFieldPolicy::Warn).unwrap();

        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].field(), "environment");
        assert_eq!(report.errors[1].field(), "time_limit");
        assert_eq!(desc.time_limit, 60);
        assert_eq!(desc.environment.len(), 2);
        assert_eq!(desc.name.as_deref(), Some("renamed"));
    }

    #[test]
    fn test_unknown_fields_warn() {
        let mut desc = sample();
        let mut view = DynamicView::new();
        view.insert("not_a_field", Value::Int(1));
        view.insert("qos", "high".into());

        let report = from_view(&mut desc, view, UnknownFieldPolicy::Warn).unwrap();

        assert_eq!(report.unknown, vec!["not_a_field".to_string()]);
        assert_eq!(desc.qos.as_deref(), Some("high"));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_unknown_fields_reject_before_writing() {
        let original = sample();
        let mut desc = original.clone();
        let mut view = DynamicView::new();
        view.insert("not_a_field", Value::Int(1));
        view.insert("qos", "high".into());

        let err = from_view(&mut desc, view, UnknownFieldPolicy::Reject).unwrap_err();

        assert_eq!(err, MarshalError::UnknownFields(vec!["not_a_field".into()]));
        assert_eq!(desc, original);
    }

    #[test]
    fn test_high_bit_u64_survives_view_roundtrip() {
        let mut desc = sample();
        desc.pn_min_memory = 0x8000_0000_0000_0400;

        let view = to_view(&desc);
        assert_eq!(view.get("pn_min_memory"), Some(&Value::Int(i64::MIN + 0x400)));

        let report = from_view(&mut desc, view, UnknownFieldPolicy::Warn).unwrap();
        assert!(report.is_clean());
        assert_eq!(desc.pn_min_memory, 0x8000_0000_0000_0400);
    }

    #[test]
    fn test_view_from_value() {
        let view = view_from_value(Value::Map(Default::default())).unwrap();
        assert!(view.is_empty());

        let err = view_from_value(Value::Int(3)).unwrap_err();
        assert_eq!(
            err,
            MarshalError::NotAMapping {
                found: "int".into()
            }
        );
    }
}
