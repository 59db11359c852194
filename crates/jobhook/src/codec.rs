//! The field codec table.
//!
//! Every job descriptor field exposed to policy scripts has one entry in
//! [`FIELDS`]: its native name, how it is converted, which host releases
//! have it, and accessors into [`JobDescriptor`]. The marshaler drives both
//! conversion directions generically from this table.

use std::fmt;

use thiserror::Error;

use crate::array::{self, StringArray};
use crate::descriptor::{JobDescriptor, NO_VAL8, NO_VAL16, NO_VAL32, NO_VAL64};
use crate::env;
use crate::host::{HOST_VERSION, V17_02, V17_11, V18_08, V19_05, V21_00, VersionGate};
use crate::value::Value;

/// A per-field conversion failure.
///
/// These never abort a merge: the field keeps its previous value and the
/// remaining fields are still processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The value has the wrong shape for the field.
    #[error("field {field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Field name.
        field: &'static str,
        /// Accepted type(s).
        expected: &'static str,
        /// Observed type.
        found: String,
    },
    /// The integer does not fit the field's width.
    #[error("field {field}: {value} is out of range for {width}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: i64,
        /// Field width.
        width: Width,
    },
    /// The integer is the width's reserved unset marker.
    #[error("field {field}: {value} is reserved as the unset marker; use null instead")]
    ReservedSentinel {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },
}

impl FieldError {
    /// Name of the field the error is about.
    pub fn field(&self) -> &'static str {
        match self {
            FieldError::TypeMismatch { field, .. }
            | FieldError::OutOfRange { field, .. }
            | FieldError::ReservedSentinel { field, .. } => field,
        }
    }
}

/// Width of an unsigned integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// 8 bits.
    W8,
    /// 16 bits.
    W16,
    /// 32 bits.
    W32,
    /// 64 bits.
    W64,
}

impl Width {
    /// The width's unset marker.
    pub const fn sentinel(self) -> u64 {
        match self {
            Width::W8 => NO_VAL8 as u64,
            Width::W16 => NO_VAL16 as u64,
            Width::W32 => NO_VAL32 as u64,
            Width::W64 => NO_VAL64,
        }
    }

    /// Largest value the width holds.
    pub const fn max(self) -> u64 {
        match self {
            Width::W8 => u8::MAX as u64,
            Width::W16 => u16::MAX as u64,
            Width::W32 => u32::MAX as u64,
            Width::W64 => u64::MAX,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Width::W8 => "uint8",
            Width::W16 => "uint16",
            Width::W32 => "uint32",
            Width::W64 => "uint64",
        };
        f.write_str(name)
    }
}

/// How a field converts between native and script form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Nullable string.
    OptString,
    /// Ordered string list whose length is the named count field.
    StringList {
        /// Native count field.
        count_field: &'static str,
    },
    /// `key=value` environment list exposed as a mapping.
    EnvList {
        /// Native count field.
        count_field: &'static str,
    },
    /// Unsigned integer with an unset marker.
    UInt(Width),
    /// Unsigned integer with an unset marker, exposed as a boolean.
    UIntAsBool(Width),
    /// Timestamp, always present.
    Time,
}

/// Read access to a native field.
#[derive(Debug)]
enum Native<'a> {
    Str(Option<&'a str>),
    Array(&'a StringArray),
    UInt(u64),
    Time(i64),
}

/// Write access to a native field.
#[derive(Debug)]
enum Slot<'a> {
    Str(&'a mut Option<String>),
    Array(&'a mut StringArray),
    U8(&'a mut u8),
    U16(&'a mut u16),
    U32(&'a mut u32),
    U64(&'a mut u64),
    Time(&'a mut i64),
}

impl Slot<'_> {
    fn set_uint(self, value: u64) {
        // Callers have range-checked `value` against the field width.
        match self {
            Slot::U8(v) => *v = value as u8,
            Slot::U16(v) => *v = value as u16,
            Slot::U32(v) => *v = value as u32,
            Slot::U64(v) => *v = value,
            Slot::Str(_) | Slot::Array(_) | Slot::Time(_) => {}
        }
    }
}

/// One entry of the field table.
pub struct FieldSpec {
    /// Native field name, also the key in the job view.
    pub name: &'static str,
    /// Conversion rule.
    pub codec: Codec,
    /// Host releases that have this field.
    pub gate: VersionGate,
    read: fn(&JobDescriptor) -> Native<'_>,
    write: fn(&mut JobDescriptor) -> Slot<'_>,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("codec", &self.codec)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl FieldSpec {
    const fn gated(self, gate: VersionGate) -> Self {
        Self { gate, ..self }
    }

    /// Returns true if this build's host release has the field.
    pub fn is_active(&self) -> bool {
        self.gate.admits(HOST_VERSION)
    }

    /// Convert the native field to its script form.
    ///
    /// 64-bit values are exposed as the script integer with the same bits,
    /// so flag-carrying values such as the mem-per-cpu bit of
    /// `pn_min_memory` show up negative and [`decode`](Self::decode) turns
    /// them back unchanged.
    pub fn encode(&self, desc: &JobDescriptor) -> Value {
        let native = (self.read)(desc);
        match (self.codec, native) {
            (Codec::OptString, Native::Str(s)) => {
                s.map_or(Value::Null, |s| Value::Str(s.to_string()))
            }
            (Codec::StringList { .. }, Native::Array(array)) => {
                Value::List(array.iter().map(|s| Value::Str(s.to_string())).collect())
            }
            (Codec::EnvList { .. }, Native::Array(array)) => Value::Map(env::to_mapping(array)),
            (Codec::UInt(width), Native::UInt(v)) => {
                if v == width.sentinel() {
                    Value::Null
                } else {
                    Value::Int(v as i64)
                }
            }
            (Codec::UIntAsBool(width), Native::UInt(v)) => {
                if v == width.sentinel() {
                    Value::Null
                } else {
                    Value::Bool(v != 0)
                }
            }
            (Codec::Time, Native::Time(t)) => Value::Int(t),
            (codec, native) => unreachable!(
                "field table entry {} pairs {codec:?} with {native:?}",
                self.name
            ),
        }
    }

    /// Write a script-supplied value into the native field.
    ///
    /// On error the field is left as it was.
    pub fn decode(&self, desc: &mut JobDescriptor, value: Value) -> Result<(), FieldError> {
        let slot = (self.write)(desc);
        match (self.codec, slot) {
            (Codec::OptString, Slot::Str(current)) => match value {
                Value::Null => {
                    *current = None;
                    Ok(())
                }
                Value::Str(s) => {
                    if current.as_deref() != Some(s.as_str()) {
                        *current = Some(s);
                    }
                    Ok(())
                }
                other => Err(self.mismatch("string or null", &other)),
            },
            (Codec::StringList { .. }, Slot::Array(array)) => {
                array::ingest_list(self.name, array, value)
            }
            (Codec::EnvList { .. }, Slot::Array(array)) => {
                let diff = env::apply_value(self.name, array, value)?;
                tracing::debug!(
                    field = self.name,
                    kept = diff.kept,
                    rewritten = diff.rewritten,
                    removed = diff.removed,
                    appended = diff.appended,
                    "merged environment"
                );
                Ok(())
            }
            (Codec::UInt(width), slot) => match value {
                Value::Null => {
                    slot.set_uint(width.sentinel());
                    Ok(())
                }
                Value::Int(i) => {
                    slot.set_uint(self.check_uint(width, i)?);
                    Ok(())
                }
                other => Err(self.mismatch("int or null", &other)),
            },
            (Codec::UIntAsBool(width), slot) => match value {
                Value::Null => {
                    slot.set_uint(width.sentinel());
                    Ok(())
                }
                Value::Bool(b) => {
                    slot.set_uint(u64::from(b));
                    Ok(())
                }
                Value::Int(i) => {
                    slot.set_uint(self.check_uint(width, i)?);
                    Ok(())
                }
                other => Err(self.mismatch("bool, int or null", &other)),
            },
            (Codec::Time, Slot::Time(current)) => match value {
                Value::Int(t) => {
                    *current = t;
                    Ok(())
                }
                other => Err(self.mismatch("int", &other)),
            },
            (codec, slot) => unreachable!(
                "field table entry {} pairs {codec:?} with {slot:?}",
                self.name
            ),
        }
    }

    fn check_uint(&self, width: Width, value: i64) -> Result<u64, FieldError> {
        let v = if width == Width::W64 {
            value as u64
        } else if let Ok(v) = u64::try_from(value) {
            v
        } else {
            return Err(FieldError::OutOfRange {
                field: self.name,
                value,
                width,
            });
        };
        if v > width.max() {
            return Err(FieldError::OutOfRange {
                field: self.name,
                value,
                width,
            });
        }
        if v == width.sentinel() {
            return Err(FieldError::ReservedSentinel {
                field: self.name,
                value: v,
            });
        }
        Ok(v)
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> FieldError {
        FieldError::TypeMismatch {
            field: self.name,
            expected,
            found: found.type_name().to_string(),
        }
    }
}

macro_rules! field {
    ($name:ident: str) => {
        FieldSpec {
            name: stringify!($name),
            codec: Codec::OptString,
            gate: VersionGate::ALWAYS,
            read: |d| Native::Str(d.$name.as_deref()),
            write: |d| Slot::Str(&mut d.$name),
        }
    };
    ($name:ident: list $count:ident) => {
        FieldSpec {
            name: stringify!($name),
            codec: Codec::StringList {
                count_field: stringify!($count),
            },
            gate: VersionGate::ALWAYS,
            read: |d| Native::Array(&d.$name),
            write: |d| Slot::Array(&mut d.$name),
        }
    };
    ($name:ident: env $count:ident) => {
        FieldSpec {
            name: stringify!($name),
            codec: Codec::EnvList {
                count_field: stringify!($count),
            },
            gate: VersionGate::ALWAYS,
            read: |d| Native::Array(&d.$name),
            write: |d| Slot::Array(&mut d.$name),
        }
    };
    ($name:ident: time) => {
        FieldSpec {
            name: stringify!($name),
            codec: Codec::Time,
            gate: VersionGate::ALWAYS,
            read: |d| Native::Time(d.$name),
            write: |d| Slot::Time(&mut d.$name),
        }
    };
    (@uint $name:ident, $codec:expr, $slot:ident) => {
        FieldSpec {
            name: stringify!($name),
            codec: $codec,
            gate: VersionGate::ALWAYS,
            read: |d| Native::UInt(u64::from(d.$name)),
            write: |d| Slot::$slot(&mut d.$name),
        }
    };
    ($name:ident: u8) => { field!(@uint $name, Codec::UInt(Width::W8), U8) };
    ($name:ident: u16) => { field!(@uint $name, Codec::UInt(Width::W16), U16) };
    ($name:ident: u32) => { field!(@uint $name, Codec::UInt(Width::W32), U32) };
    ($name:ident: u64) => { field!(@uint $name, Codec::UInt(Width::W64), U64) };
    ($name:ident: bool8) => { field!(@uint $name, Codec::UIntAsBool(Width::W8), U8) };
    ($name:ident: bool16) => { field!(@uint $name, Codec::UIntAsBool(Width::W16), U16) };
}

/// Every field known to any supported host release, in view order.
pub static FIELDS: &[FieldSpec] = &[
    field!(account: str),
    field!(acctg_freq: str),
    field!(admin_comment: str),
    field!(alloc_node: str),
    field!(alloc_resp_port: u16),
    field!(alloc_sid: u32),
    field!(argv: list argc),
    field!(array_inx: str),
    field!(begin_time: time),
    field!(bitflags: u32),
    field!(burst_buffer: str),
    field!(clusters: str),
    field!(comment: str),
    field!(contiguous: bool16),
    field!(core_spec: u16),
    field!(cpu_bind: str),
    field!(cpu_bind_type: u16),
    field!(cpu_freq_min: u32),
    field!(cpu_freq_max: u32),
    field!(cpu_freq_gov: u32),
    field!(deadline: time),
    field!(delay_boot: u32),
    field!(dependency: str),
    field!(end_time: time),
    field!(environment: env env_size),
    field!(exc_nodes: str),
    field!(features: str),
    field!(group_id: u32),
    field!(immediate: bool16),
    field!(job_id: u32),
    field!(job_id_str: str),
    field!(kill_on_node_fail: bool16),
    field!(licenses: str),
    field!(mail_type: u16),
    field!(mail_user: str),
    field!(mcs_label: str),
    field!(mem_bind: str),
    field!(mem_bind_type: u16),
    field!(name: str),
    field!(network: str),
    field!(nice: u32),
    field!(num_tasks: u32),
    field!(open_mode: u8),
    field!(other_port: u16),
    field!(overcommit: bool8),
    field!(partition: str),
    field!(plane_size: u16),
    field!(power_flags: u8),
    field!(priority: u32),
    field!(profile: u32),
    field!(qos: str),
    field!(reboot: bool16),
    field!(resp_host: str),
    field!(restart_cnt: u16),
    field!(req_nodes: str),
    field!(requeue: bool16),
    field!(reservation: str),
    field!(script: str),
    field!(shared: u16),
    field!(spank_job_env: list spank_job_env_size),
    field!(task_dist: u32),
    field!(time_limit: u32),
    field!(time_min: u32),
    field!(user_id: u32),
    field!(wait_all_nodes: bool16),
    field!(warn_flags: u16),
    field!(warn_signal: u16),
    field!(warn_time: u16),
    field!(work_dir: str),
    field!(cpus_per_task: u16),
    field!(min_cpus: u32),
    field!(max_cpus: u32),
    field!(min_nodes: u32),
    field!(max_nodes: u32),
    field!(boards_per_node: u16),
    field!(sockets_per_board: u16),
    field!(sockets_per_node: u16),
    field!(cores_per_socket: u16),
    field!(threads_per_core: u16),
    field!(ntasks_per_node: u16),
    field!(ntasks_per_socket: u16),
    field!(ntasks_per_core: u16),
    field!(ntasks_per_board: u16),
    field!(pn_min_cpus: u16),
    field!(pn_min_memory: u64),
    field!(pn_min_tmp_disk: u32),
    field!(req_switch: u32),
    field!(std_err: str),
    field!(std_in: str),
    field!(std_out: str),
    field!(wait4switch: u32),
    field!(wckey: str),
    field!(fed_siblings: u64).gated(VersionGate::between(V17_02, V17_11)),
    field!(group_number: u32).gated(VersionGate::between(V17_02, V17_11)),
    field!(numpack: u32).gated(VersionGate::between(V17_02, V17_11)),
    field!(pack_leader: u32).gated(VersionGate::between(V17_02, V17_11)),
    field!(pelog_env: env pelog_env_size).gated(VersionGate::between(V17_02, V17_11)),
    field!(resv_port: u8).gated(VersionGate::between(V17_02, V17_11)),
    field!(cluster_features: str).gated(VersionGate::since(V17_11)),
    field!(extra: str).gated(VersionGate::since(V17_11)),
    field!(fed_siblings_active: u64).gated(VersionGate::since(V17_11)),
    field!(fed_siblings_viable: u64).gated(VersionGate::since(V17_11)),
    field!(origin_cluster: str).gated(VersionGate::since(V17_11)),
    field!(x11: u16).gated(VersionGate::since(V17_11)),
    field!(x11_magic_cookie: str).gated(VersionGate::since(V17_11)),
    field!(x11_target_port: u16).gated(VersionGate::since(V17_11)),
    field!(gres: str).gated(VersionGate::before(V18_08)),
    field!(batch_features: str).gated(VersionGate::since(V18_08)),
    field!(cpus_per_tres: str).gated(VersionGate::since(V18_08)),
    field!(mem_per_tres: str).gated(VersionGate::since(V18_08)),
    field!(tres_bind: str).gated(VersionGate::since(V18_08)),
    field!(tres_freq: str).gated(VersionGate::since(V18_08)),
    field!(tres_per_job: str).gated(VersionGate::since(V18_08)),
    field!(tres_per_node: str).gated(VersionGate::since(V18_08)),
    field!(tres_per_socket: str).gated(VersionGate::since(V18_08)),
    field!(tres_per_task: str).gated(VersionGate::since(V18_08)),
    field!(site_factor: u32).gated(VersionGate::since(V19_05)),
    field!(x11_target: str).gated(VersionGate::since(V19_05)),
    field!(submit_line: str).gated(VersionGate::since(V21_00)),
];

/// Fields present in this build's host release, in view order.
pub fn active_fields() -> impl Iterator<Item = &'static FieldSpec> {
    FIELDS.iter().filter(|spec| spec.is_active())
}

/// Look up an active field by name.
pub fn active_field(name: &str) -> Option<&'static FieldSpec> {
    active_fields().find(|spec| spec.name == name)
}
