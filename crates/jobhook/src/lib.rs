//! Jobhook: job submission policy hook
//!
//! On every job submission the host scheduler hands a job descriptor to a
//! site-editable Rhai script, `job_submit.rhai`, which may inspect and
//! rewrite its fields or reject the job. This crate converts the descriptor
//! into a script-visible job view, calls the script's
//! `job_submit(job_desc, submit_uid)` under a single lock, and merges the
//! script's edits back with minimal, order-preserving changes to list and
//! environment fields.
//!
//! ```no_run
//! use jobhook::{JobDescriptor, PolicyConfig, PolicyEngine};
//!
//! let engine = PolicyEngine::new(PolicyConfig::default().with_script_dir("/etc/slurm"));
//! let mut desc = JobDescriptor::default();
//! let outcome = engine.submit(&mut desc, 1000);
//! if let Some(msg) = &outcome.user_msg {
//!     println!("{msg}");
//! }
//! ```

mod array;
mod codec;
mod config;
mod descriptor;
mod diagnostics;
mod env;
mod host;
mod marshal;
mod runtime;
mod script;
mod value;

pub mod ffi;

pub use array::{StringArray, defragment, resize};
pub use codec::{Codec, FIELDS, FieldError, FieldSpec, Width, active_field, active_fields};
pub use config::{
    ConfigError, DEFAULT_PLUGIN_NAME, DEFAULT_SCRIPT_DIR, PolicyConfig, ScriptLimits,
};
pub use descriptor::{JobDescriptor, NO_VAL8, NO_VAL16, NO_VAL32, NO_VAL64};
pub use diagnostics::{MessageBuffer, ScriptLog};
pub use env::{EnvDiff, apply_mapping, join_entry, split_entry, to_mapping};
pub use host::{HOST_VERSION, HostVersion, VersionGate};
pub use marshal::{
    MarshalError, MergeReport, UnknownFieldPolicy, from_view, to_view, view_from_value,
};
pub use runtime::{
    EngineStats, PolicyEngine, PolicyError, SUBMIT_ERROR, SUBMIT_SUCCESS, SubmitOutcome,
};
pub use script::{
    ENTRY_POINT, SCRIPT_EXTENSION, SCRIPT_NAME, format_call_error, format_script_error,
    from_dynamic, script_path, to_dynamic,
};
pub use value::{DynamicView, Value};
