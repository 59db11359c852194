//! Bridge to the Rhai scripting engine.
//!
//! Converts between [`Value`] and Rhai's `Dynamic`, builds engines with the
//! host API registered, compiles the policy script and calls its entry point.

use std::path::{Path, PathBuf};

use rhai::module_resolvers::FileModuleResolver;
use rhai::{AST, Dynamic, Engine, EvalAltResult, Map, Module, Position, Scope};

use crate::config::{PolicyConfig, ScriptLimits};
use crate::diagnostics::{MessageBuffer, ScriptLog};
use crate::runtime::PolicyError;
use crate::value::{DynamicView, Value};

/// Module name of the policy script, resolved in the script directory.
pub const SCRIPT_NAME: &str = "job_submit";

/// File extension of policy scripts and importable modules.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Function the policy script must define, taking the job view and the
/// submitting uid.
pub const ENTRY_POINT: &str = "job_submit";

/// Path of the policy script inside `dir`.
pub fn script_path(dir: &Path) -> PathBuf {
    dir.join(SCRIPT_NAME).with_extension(SCRIPT_EXTENSION)
}

/// Convert a value into its Rhai form.
pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Int(i) => Dynamic::from_int(*i),
        Value::Float(x) => Dynamic::from_float(*x),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Map(entries) => Dynamic::from_map(
            entries
                .iter()
                .map(|(key, item)| (key.as_str().into(), to_dynamic(item)))
                .collect(),
        ),
        Value::Opaque { text, .. } => Dynamic::from(text.clone()),
    }
}

/// Convert a Rhai value back, looking through shared values.
///
/// Characters become one-character strings; anything without a [`Value`]
/// counterpart (function pointers, timestamps, custom types) is kept as
/// [`Value::Opaque`].
pub fn from_dynamic(value: &Dynamic) -> Value {
    let value = value.flatten_clone();
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::Int(i);
    }
    if let Ok(x) = value.as_float() {
        return Value::Float(x);
    }
    if let Ok(c) = value.as_char() {
        return Value::Str(c.to_string());
    }
    if value.is_string() {
        return Value::Str(value.to_string());
    }
    if value.is_array() {
        let items = value.into_array().unwrap_or_default();
        return Value::List(items.iter().map(from_dynamic).collect());
    }
    if value.is_map() {
        let entries = value.try_cast::<Map>().unwrap_or_default();
        return Value::Map(
            entries
                .iter()
                .map(|(key, item)| (key.to_string(), from_dynamic(item)))
                .collect(),
        );
    }
    Value::Opaque {
        type_name: value.type_name().to_string(),
        text: value.to_string(),
    }
}

fn stringify(value: &Dynamic) -> String {
    from_dynamic(value).to_string()
}

/// Build an engine for `config` whose host functions write to `messages`.
pub(crate) fn new_engine(config: &PolicyConfig, messages: &MessageBuffer) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(FileModuleResolver::new_with_path_and_extension(
        config.script_dir.clone(),
        SCRIPT_EXTENSION,
    ));

    let log = ScriptLog::new(&config.plugin_name);
    register_host_api(&mut engine, messages, &log);
    apply_limits(&mut engine, &config.limits);

    let print_log = log.clone();
    engine.on_print(move |text| print_log.info(text));
    engine.on_debug(move |text, source, pos| match source {
        Some(source) => log.debug(&format!("{source} @ {pos}: {text}")),
        None if pos.is_none() => log.debug(text),
        None => log.debug(&format!("{pos}: {text}")),
    });

    engine
}

/// Register the functions policy scripts call into.
///
/// The same operations are available as globals and in the `slurm`
/// namespace.
fn register_host_api(engine: &mut Engine, messages: &MessageBuffer, log: &ScriptLog) {
    let buffer = messages.clone();
    engine.register_fn("record_user_message", move |text: Dynamic| {
        buffer.record(&stringify(&text))
    });
    let info = log.clone();
    engine.register_fn("log_info", move |value: Dynamic| info.info(&stringify(&value)));
    let error = log.clone();
    engine.register_fn("log_error", move |value: Dynamic| {
        error.error(&stringify(&value))
    });

    let mut slurm = Module::new();
    let buffer = messages.clone();
    slurm.set_native_fn(
        "user_msg",
        move |text: Dynamic| -> Result<(), Box<EvalAltResult>> {
            buffer.record(&stringify(&text));
            Ok(())
        },
    );
    let info = log.clone();
    slurm.set_native_fn(
        "info",
        move |value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            info.info(&stringify(&value));
            Ok(())
        },
    );
    let error = log.clone();
    slurm.set_native_fn(
        "error",
        move |value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            error.error(&stringify(&value));
            Ok(())
        },
    );
    engine.register_static_module("slurm", slurm.into());
}

fn apply_limits(engine: &mut Engine, limits: &ScriptLimits) {
    if let Some(max) = limits.max_operations {
        engine.set_max_operations(max);
    }
    if let Some(max) = limits.max_call_depth {
        engine.set_max_call_levels(max);
    }
    if let Some(max) = limits.max_string_size {
        engine.set_max_string_size(max);
    }
    if let Some(max) = limits.max_array_size {
        engine.set_max_array_size(max);
    }
    if let Some(max) = limits.max_map_size {
        engine.set_max_map_size(max);
    }
}

/// Compile the policy script in `dir`.
pub(crate) fn compile(engine: &Engine, dir: &Path) -> Result<AST, PolicyError> {
    let path = script_path(dir);
    if !path.is_file() {
        return Err(PolicyError::ScriptNotFound { path });
    }
    let ast = engine
        .compile_file(path.clone())
        .map_err(|e| PolicyError::ScriptLoad {
            path: path.clone(),
            message: format_script_error(&e),
        })?;
    tracing::debug!(path = %path.display(), "compiled policy script");
    Ok(ast)
}

/// Returns true if `ast` defines the entry point with two parameters.
pub(crate) fn has_entry_point(ast: &AST) -> bool {
    ast.iter_functions()
        .any(|f| f.name == ENTRY_POINT && f.params.len() == 2)
}

/// Call the entry point with `view` and `submit_uid`.
///
/// The view is passed as a shared map, so edits made in place by the script
/// are visible afterwards. Returns the script's return value and the view as
/// the script left it.
pub(crate) fn call_entry_point(
    engine: &Engine,
    ast: &AST,
    view: &DynamicView,
    submit_uid: u32,
) -> Result<(Value, Value), PolicyError> {
    if !has_entry_point(ast) {
        return Err(PolicyError::EntryPointMissing { name: ENTRY_POINT });
    }

    let job_desc = Dynamic::from_map(
        view.iter()
            .map(|(key, value)| (key.into(), to_dynamic(value)))
            .collect(),
    )
    .into_shared();

    let mut scope = Scope::new();
    let ret = engine
        .call_fn::<Dynamic>(
            &mut scope,
            ast,
            ENTRY_POINT,
            (job_desc.clone(), i64::from(submit_uid)),
        )
        .map_err(|e| PolicyError::Script(format_call_error(ENTRY_POINT, &e)))?;

    Ok((from_dynamic(&ret), from_dynamic(&job_desc)))
}

/// Render a script error with the chain of calls that led to it.
///
/// Errors raised outside any function call (such as parse errors) are
/// rendered without a traceback.
pub fn format_script_error(err: &EvalAltResult) -> String {
    traceback(None, err)
}

/// Render an error raised by a call to `entry`.
///
/// The traceback always starts with the `entry` frame, since the engine does
/// not wrap errors raised directly in the function it was asked to call.
pub fn format_call_error(entry: &str, err: &EvalAltResult) -> String {
    traceback(Some(entry), err)
}

fn traceback(entry: Option<&str>, err: &EvalAltResult) -> String {
    // (what, source, call site in the caller)
    let mut calls: Vec<(String, &str, Position)> = Vec::new();
    let mut current = err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                calls.push((format!("function {name}"), source.as_str(), *pos));
                current = inner.as_ref();
            }
            EvalAltResult::ErrorInModule(path, inner, pos) => {
                calls.push((format!("module {path}"), "", *pos));
                current = inner.as_ref();
            }
            _ => break,
        }
    }

    let mut frames = Vec::new();
    if let Some(entry) = entry {
        let label = format!("function {entry}");
        if calls.first().is_none_or(|(what, ..)| *what != label) {
            frames.push((label, ""));
        }
    }
    frames.extend(calls.iter().map(|(what, source, _)| (what.clone(), *source)));

    if frames.is_empty() {
        return current.to_string();
    }

    // Each frame reports where execution was inside it: the call site of the
    // next frame, or the error itself for the innermost one.
    let added = frames.len() - calls.len();
    let positions = (0..frames.len()).map(|i| {
        calls
            .get(i + 1 - added)
            .map_or(current.position(), |(.., pos)| *pos)
    });

    let mut out = String::from("Traceback (most recent call last):\n");
    for ((what, source), pos) in frames.iter().zip(positions) {
        out.push_str("  ");
        out.push_str(&frame(what, source, pos));
        out.push('\n');
    }
    out.push_str(&current.to_string());
    out
}
