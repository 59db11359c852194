//! C ABI for the host scheduler plugin shim
//!
//! Job descriptors cross the boundary as JSON. A host-side shim converts its
//! native record to JSON, calls [`jobhook_job_submit`] and copies the
//! returned descriptor back on success.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char};
use std::ptr;

use crate::config::PolicyConfig;
use crate::descriptor::JobDescriptor;
use crate::runtime::{PolicyEngine, SUBMIT_ERROR};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Convert to a C string, dropping interior NUL bytes.
fn into_c_string(s: String) -> *mut c_char {
    let bytes: Vec<u8> = s.into_bytes().into_iter().filter(|&b| b != 0).collect();
    CString::new(bytes)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// Read a C string argument, recording an error if it is null or not UTF-8.
///
/// # Safety
/// `s` must be null or a valid null-terminated C string.
unsafe fn read_str<'a>(s: *const c_char, what: &str) -> Option<&'a str> {
    if s.is_null() {
        set_last_error(&format!("{what} is null"));
        return None;
    }
    match unsafe { CStr::from_ptr(s) }.to_str() {
        Ok(s) => Some(s),
        Err(e) => {
            set_last_error(&format!("invalid UTF-8 in {what}: {e}"));
            None
        }
    }
}

fn parse_descriptor(json: &str) -> Option<JobDescriptor> {
    match serde_json::from_str(json) {
        Ok(desc) => Some(desc),
        Err(e) => {
            set_last_error(&format!("invalid job descriptor: {e}"));
            None
        }
    }
}

/// Result of a submission
#[repr(C)]
#[derive(Debug)]
pub struct JobhookSubmitResult {
    /// 0 on success, -1 on failure
    pub status: i32,
    /// The resulting job descriptor as JSON (owned, must be freed)
    pub descriptor_json: *mut c_char,
    /// Message for the submitting user, or null (owned, must be freed)
    pub user_msg: *mut c_char,
}

/// Opaque handle to a policy engine
#[derive(Debug)]
pub struct JobhookEngine {
    engine: PolicyEngine,
}

/// Get the last error message (thread-local)
///
/// # Safety
/// Returns a pointer to a thread-local string. The pointer is valid
/// until the next FFI call on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn jobhook_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Create a policy engine.
///
/// `config_path` names a JSON configuration file; null uses the defaults.
/// Returns null on failure; call `jobhook_last_error()` for the reason.
///
/// # Safety
/// - `config_path` must be null or a valid null-terminated C string.
/// - The returned pointer must be freed with `jobhook_engine_free()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobhook_engine_new(config_path: *const c_char) -> *mut JobhookEngine {
    let config = if config_path.is_null() {
        PolicyConfig::default()
    } else {
        let Some(path) = (unsafe { read_str(config_path, "config_path") }) else {
            return ptr::null_mut();
        };
        match PolicyConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&format!("failed to create engine: {e}"));
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(JobhookEngine {
        engine: PolicyEngine::new(config),
    }))
}

/// Free a policy engine, tearing down any cached scripting engine.
///
/// # Safety
/// - `engine` must be a pointer returned by `jobhook_engine_new()`.
/// - The pointer must not be used after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobhook_engine_free(engine: *mut JobhookEngine) {
    if !engine.is_null() {
        // SAFETY: caller guarantees this came from jobhook_engine_new
        let engine = unsafe { Box::from_raw(engine) };
        engine.engine.shutdown();
    }
}

/// Run the submission policy on a job.
///
/// Returns a result whose `status` is 0 when the job was accepted, in which
/// case `descriptor_json` holds the edited descriptor. On rejection or policy
/// failure `status` is -1 and `descriptor_json` holds the unchanged input.
/// Returns null only if the arguments are unusable.
/// The result must be freed with `jobhook_result_free()`.
///
/// # Safety
/// - `engine` must be a valid pointer from `jobhook_engine_new()`.
/// - `descriptor_json` must be a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobhook_job_submit(
    engine: *mut JobhookEngine,
    descriptor_json: *const c_char,
    submit_uid: u32,
) -> *mut JobhookSubmitResult {
    if engine.is_null() {
        set_last_error("engine is null");
        return ptr::null_mut();
    }
    // SAFETY: checked non-null; caller guarantees validity
    let engine = unsafe { &*engine };

    let Some(json) = (unsafe { read_str(descriptor_json, "descriptor_json") }) else {
        return ptr::null_mut();
    };
    let Some(mut desc) = parse_descriptor(json) else {
        return ptr::null_mut();
    };

    let outcome = engine.engine.submit(&mut desc, submit_uid);
    if let Err(e) = &outcome.result {
        set_last_error(&e.to_string());
    }

    let descriptor_json = match serde_json::to_string(&desc) {
        Ok(json) => into_c_string(json),
        Err(e) => {
            set_last_error(&format!("failed to encode job descriptor: {e}"));
            return ptr::null_mut();
        }
    };

    Box::into_raw(Box::new(JobhookSubmitResult {
        status: outcome.status_code(),
        descriptor_json,
        user_msg: outcome.user_msg.map_or(ptr::null_mut(), into_c_string),
    }))
}

/// Run the modification hook on a job.
///
/// Returns 0, or -1 if the arguments are unusable.
///
/// # Safety
/// - `engine` must be a valid pointer from `jobhook_engine_new()`.
/// - `descriptor_json` must be a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobhook_job_modify(
    engine: *mut JobhookEngine,
    descriptor_json: *const c_char,
    submit_uid: u32,
) -> i32 {
    if engine.is_null() {
        set_last_error("engine is null");
        return SUBMIT_ERROR;
    }
    // SAFETY: checked non-null; caller guarantees validity
    let engine = unsafe { &*engine };

    let Some(json) = (unsafe { read_str(descriptor_json, "descriptor_json") }) else {
        return SUBMIT_ERROR;
    };
    let Some(mut desc) = parse_descriptor(json) else {
        return SUBMIT_ERROR;
    };
    engine.engine.job_modify(&mut desc, submit_uid)
}

/// Free a submission result
///
/// # Safety
/// The result pointer must have been returned by `jobhook_job_submit()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jobhook_result_free(result: *mut JobhookSubmitResult) {
    if result.is_null() {
        return;
    }

    // SAFETY: We checked result is not null above, and caller guarantees
    // this was returned by jobhook_job_submit
    let result = unsafe { Box::from_raw(result) };

    if !result.descriptor_json.is_null() {
        // SAFETY: descriptor_json was allocated by CString::into_raw
        unsafe { drop(CString::from_raw(result.descriptor_json)) };
    }

    if !result.user_msg.is_null() {
        // SAFETY: user_msg was allocated by CString::into_raw
        unsafe { drop(CString::from_raw(result.user_msg)) };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn engine_with_script(dir: &Path, body: &str) -> *mut JobhookEngine {
        std::fs::write(dir.join("job_submit.rhai"), body).unwrap();
        let config = dir.join("jobhook.json");
        std::fs::write(
            &config,
            serde_json::json!({ "script_dir": dir }).to_string(),
        )
        .unwrap();
        let path = c(config.to_str().unwrap());
        let engine = unsafe { jobhook_engine_new(path.as_ptr()) };
        assert!(!engine.is_null());
        engine
    }

    fn last_error() -> String {
        let err = jobhook_last_error();
        assert!(!err.is_null());
        unsafe { CStr::from_ptr(err) }.to_str().unwrap().to_string()
    }

    // ==================== Last Error Tests ====================

    #[test]
    fn test_last_error_initially_null() {
        LAST_ERROR.with(|e| {
            *e.borrow_mut() = None;
        });

        assert!(jobhook_last_error().is_null());
    }

    #[test]
    fn test_last_error_overwrites_previous() {
        set_last_error("first error");
        set_last_error("second error");
        assert_eq!(last_error(), "second error");
    }

    #[test]
    fn test_last_error_thread_local() {
        set_last_error("main thread error");

        std::thread::spawn(|| {
            assert!(jobhook_last_error().is_null(), "new thread should have no error");
            set_last_error("child thread error");
            assert_eq!(last_error(), "child thread error");
        })
        .join()
        .unwrap();

        assert_eq!(last_error(), "main thread error");
    }

    // ==================== Engine Tests ====================

    #[test]
    fn test_engine_new_missing_config() {
        let path = c("/nonexistent/jobhook.json");
        let engine = unsafe { jobhook_engine_new(path.as_ptr()) };
        assert!(engine.is_null());
        assert!(last_error().contains("failed to read config"));
    }

    #[test]
    fn test_engine_new_defaults_and_free() {
        let engine = unsafe { jobhook_engine_new(ptr::null()) };
        assert!(!engine.is_null());
        unsafe { jobhook_engine_free(engine) };
        unsafe { jobhook_engine_free(ptr::null_mut()) };
    }

    #[test]
    fn test_submit_roundtrips_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_script(
            dir.path(),
            r#"
            fn job_submit(job_desc, uid) {
                job_desc.partition = "debug";
                slurm::user_msg("moved to debug");
                0
            }
            "#,
        );
        let input = c(r#"{"name": "job1", "time_limit": 10}"#);

        let result = unsafe { jobhook_job_submit(engine, input.as_ptr(), 1000) };
        assert!(!result.is_null());

        let r = unsafe { &*result };
        assert_eq!(r.status, 0);
        let json = unsafe { CStr::from_ptr(r.descriptor_json) }.to_str().unwrap();
        let desc: JobDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.partition.as_deref(), Some("debug"));
        assert_eq!(desc.name.as_deref(), Some("job1"));
        assert_eq!(desc.time_limit, 10);
        let msg = unsafe { CStr::from_ptr(r.user_msg) }.to_str().unwrap();
        assert_eq!(msg, "moved to debug");

        unsafe {
            jobhook_result_free(result);
            jobhook_engine_free(engine);
        }
    }

    #[test]
    fn test_submit_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_script(
            dir.path(),
            r#"fn job_submit(job_desc, uid) { job_desc.name = "x"; 2 }"#,
        );
        let input = c(r#"{"name": "job1"}"#);

        let result = unsafe { jobhook_job_submit(engine, input.as_ptr(), 0) };
        let r = unsafe { &*result };
        assert_eq!(r.status, -1);
        assert!(r.user_msg.is_null());
        let json = unsafe { CStr::from_ptr(r.descriptor_json) }.to_str().unwrap();
        let desc: JobDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.name.as_deref(), Some("job1"));
        assert!(last_error().contains("code 2"));

        unsafe {
            jobhook_result_free(result);
            jobhook_engine_free(engine);
        }
    }

    #[test]
    fn test_submit_bad_arguments() {
        let engine = unsafe { jobhook_engine_new(ptr::null()) };
        let input = c("{}");

        let result = unsafe { jobhook_job_submit(ptr::null_mut(), input.as_ptr(), 0) };
        assert!(result.is_null());
        assert_eq!(last_error(), "engine is null");

        let result = unsafe { jobhook_job_submit(engine, ptr::null(), 0) };
        assert!(result.is_null());
        assert_eq!(last_error(), "descriptor_json is null");

        let bad = c("not json");
        let result = unsafe { jobhook_job_submit(engine, bad.as_ptr(), 0) };
        assert!(result.is_null());
        assert!(last_error().starts_with("invalid job descriptor"));

        unsafe { jobhook_engine_free(engine) };
    }

    #[test]
    fn test_job_modify() {
        let engine = unsafe { jobhook_engine_new(ptr::null()) };
        let input = c(r#"{"name": "job1"}"#);

        assert_eq!(unsafe { jobhook_job_modify(engine, input.as_ptr(), 0) }, 0);
        assert_eq!(
            unsafe { jobhook_job_modify(ptr::null_mut(), input.as_ptr(), 0) },
            -1
        );

        unsafe { jobhook_engine_free(engine) };
    }

    #[test]
    fn test_result_free_null_safe() {
        unsafe { jobhook_result_free(ptr::null_mut()) };
    }

    #[test]
    fn test_into_c_string_strips_nul() {
        let raw = into_c_string("a\0b".to_string());
        let s = unsafe { CString::from_raw(raw) };
        assert_eq!(s.to_str().unwrap(), "ab");
    }
}
