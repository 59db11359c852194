//! Policy invocation orchestrator

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rhai::{AST, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PolicyConfig;
use crate::descriptor::JobDescriptor;
use crate::diagnostics::MessageBuffer;
use crate::marshal::{self, MarshalError, MergeReport};
use crate::script;
use crate::value::Value;

/// Status returned to the host when a submission is accepted.
pub const SUBMIT_SUCCESS: i32 = 0;

/// Status returned to the host when a submission fails for any reason.
pub const SUBMIT_ERROR: i32 = -1;

/// Errors that fail a submission
///
/// Every variant leaves the job descriptor exactly as it was.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// No policy script at the expected path
    #[error("policy script not found: {}", path.display())]
    ScriptNotFound {
        /// Expected script path
        path: PathBuf,
    },
    /// The policy script failed to compile
    #[error("failed to load policy script {}: {message}", path.display())]
    ScriptLoad {
        /// Script path
        path: PathBuf,
        /// Engine diagnostic
        message: String,
    },
    /// The script does not define the entry point with two parameters
    #[error("policy script does not define {name}(job_desc, submit_uid)")]
    EntryPointMissing {
        /// Entry point name
        name: &'static str,
    },
    /// The script raised an error while running
    #[error("policy script error: {0}")]
    Script(String),
    /// The entry point returned something other than an integer
    #[error("policy script returned {found}, expected an integer")]
    NonIntegerReturn {
        /// Observed type
        found: String,
    },
    /// The script rejected the job
    #[error("policy script rejected the job with code {code}")]
    Rejected {
        /// Returned code
        code: i64,
    },
    /// The edited job view could not be merged
    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

impl PolicyError {
    /// Returns true if the script itself rejected the job, as opposed to the
    /// policy failing to run.
    pub fn is_rejection(&self) -> bool {
        matches!(self, PolicyError::Rejected { .. })
    }
}

/// Result of one submission.
#[derive(Debug)]
pub struct SubmitOutcome {
    /// Merge summary, or why the submission failed
    pub result: Result<MergeReport, PolicyError>,
    /// Message for the submitting user, delivered on every outcome
    pub user_msg: Option<String>,
}

impl SubmitOutcome {
    /// Status code for the host.
    pub fn status_code(&self) -> i32 {
        if self.result.is_ok() {
            SUBMIT_SUCCESS
        } else {
            SUBMIT_ERROR
        }
    }

    /// The script's code if it rejected the job.
    pub fn rejection_code(&self) -> Option<i64> {
        match self.result {
            Err(PolicyError::Rejected { code }) => Some(code),
            _ => None,
        }
    }
}

/// Lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Scripting engines created
    pub engine_starts: u64,
    /// Scripting engines torn down
    pub engine_stops: u64,
    /// Calls to `submit`
    pub submissions: u64,
    /// Engines currently alive
    pub live_engines: usize,
    /// Most engines ever alive at once
    pub peak_live_engines: usize,
}

#[derive(Debug, Default)]
struct Counters {
    engine_starts: AtomicU64,
    engine_stops: AtomicU64,
    submissions: AtomicU64,
    live: AtomicUsize,
    peak_live: AtomicUsize,
}

/// Steps of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    EngineStarting,
    ScriptLoading,
    Invoking,
    ResultValidating,
    Merging,
    EngineStopping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::EngineStarting => "engine_starting",
            Phase::ScriptLoading => "script_loading",
            Phase::Invoking => "invoking",
            Phase::ResultValidating => "result_validating",
            Phase::Merging => "merging",
            Phase::EngineStopping => "engine_stopping",
        };
        f.write_str(name)
    }
}

/// A started engine with the policy script compiled.
struct ScriptSession {
    engine: Engine,
    ast: AST,
}

#[derive(Default)]
struct EngineState {
    session: Option<ScriptSession>,
}

/// Runs the job submission policy.
///
/// All calls are serialized: the lock is held from engine start until the
/// engine is stopped again, including while the script runs. With
/// `reload_each_call` set (the default) a fresh engine loads the script for
/// every call, so edits take effect on the next submission; otherwise the
/// engine and compiled script are kept until [`reload`](Self::reload) or
/// [`shutdown`](Self::shutdown).
pub struct PolicyEngine {
    config: PolicyConfig,
    state: Mutex<EngineState>,
    messages: MessageBuffer,
    counters: Counters,
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Create an engine. Nothing is loaded until the first submission.
    pub fn new(config: PolicyConfig) -> Self {
        tracing::debug!(
            script_dir = %config.script_dir.display(),
            reload_each_call = config.reload_each_call,
            "policy engine created"
        );
        Self {
            config,
            state: Mutex::new(EngineState::default()),
            messages: MessageBuffer::new(),
            counters: Counters::default(),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Run the policy on a submitted job.
    ///
    /// On success the script's edits have been merged into `desc`. On any
    /// failure `desc` is untouched. The user message is returned either way.
    pub fn submit(&self, desc: &mut JobDescriptor, submit_uid: u32) -> SubmitOutcome {
        let mut state = self.lock_state();
        self.counters.submissions.fetch_add(1, Ordering::Relaxed);
        self.messages.clear();
        tracing::debug!(submit_uid, name = ?desc.name, "job_submit");

        let result = match self.checkout(&mut state) {
            Ok(session) => {
                let result = self.invoke(&session, desc, submit_uid);
                self.checkin(&mut state, session);
                result
            }
            Err(e) => Err(e),
        };
        self.enter(Phase::Idle);

        match &result {
            Ok(report) => tracing::debug!(
                applied = report.applied.len(),
                errors = report.errors.len(),
                unknown = report.unknown.len(),
                "job_submit accepted"
            ),
            Err(e) if e.is_rejection() => tracing::info!(error = %e, "job_submit rejected"),
            Err(e) => tracing::error!(error = %e, "job_submit failed"),
        }

        SubmitOutcome {
            result,
            user_msg: self.messages.take(),
        }
    }

    /// Modification hook. Only takes part in serialization.
    pub fn job_modify(&self, desc: &mut JobDescriptor, submit_uid: u32) -> i32 {
        let _state = self.lock_state();
        tracing::debug!(submit_uid, name = ?desc.name, "job_modify");
        SUBMIT_SUCCESS
    }

    /// Drop any cached engine so the next call loads the script again.
    pub fn reload(&self) {
        let mut state = self.lock_state();
        if let Some(session) = state.session.take() {
            self.stop_engine(session.engine);
        }
    }

    /// Tear down any cached engine.
    pub fn shutdown(&self) {
        self.reload();
        tracing::debug!(stats = ?self.stats(), "policy engine shut down");
    }

    /// Snapshot of the lifecycle counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            engine_starts: self.counters.engine_starts.load(Ordering::Relaxed),
            engine_stops: self.counters.engine_stops.load(Ordering::Relaxed),
            submissions: self.counters.submissions.load(Ordering::Relaxed),
            live_engines: self.counters.live.load(Ordering::Relaxed),
            peak_live_engines: self.counters.peak_live.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        // State is rebuilt per call, so a panic mid-call leaves nothing to repair.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, phase: Phase) {
        tracing::trace!(%phase, "policy phase");
    }

    /// Take the cached session or start a new one.
    fn checkout(&self, state: &mut EngineState) -> Result<ScriptSession, PolicyError> {
        self.enter(Phase::EngineStarting);
        if let Some(session) = state.session.take() {
            self.enter(Phase::ScriptLoading);
            tracing::trace!("reusing cached policy script");
            return Ok(session);
        }
        let engine = self.start_engine();

        self.enter(Phase::ScriptLoading);
        match script::compile(&engine, &self.config.script_dir) {
            Ok(ast) => Ok(ScriptSession { engine, ast }),
            Err(e) => {
                self.enter(Phase::EngineStopping);
                self.stop_engine(engine);
                Err(e)
            }
        }
    }

    /// Keep the session for the next call or tear it down.
    fn checkin(&self, state: &mut EngineState, session: ScriptSession) {
        self.enter(Phase::EngineStopping);
        if self.config.reload_each_call {
            self.stop_engine(session.engine);
        } else {
            state.session = Some(session);
        }
    }

    fn start_engine(&self) -> Engine {
        let engine = script::new_engine(&self.config, &self.messages);
        self.counters.engine_starts.fetch_add(1, Ordering::Relaxed);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_live.fetch_max(live, Ordering::SeqCst);
        tracing::debug!(live, "scripting engine started");
        engine
    }

    fn stop_engine(&self, engine: Engine) {
        drop(engine);
        self.counters.engine_stops.fetch_add(1, Ordering::Relaxed);
        let live = self.counters.live.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(live, "scripting engine stopped");
    }

    fn invoke(
        &self,
        session: &ScriptSession,
        desc: &mut JobDescriptor,
        submit_uid: u32,
    ) -> Result<MergeReport, PolicyError> {
        let view = marshal::to_view(desc);

        self.enter(Phase::Invoking);
        let (ret, returned) =
            script::call_entry_point(&session.engine, &session.ast, &view, submit_uid)?;

        self.enter(Phase::ResultValidating);
        let code = match ret {
            Value::Int(code) => code,
            other => {
                return Err(PolicyError::NonIntegerReturn {
                    found: other.type_name().to_string(),
                });
            }
        };
        if code != 0 {
            return Err(PolicyError::Rejected { code });
        }

        self.enter(Phase::Merging);
        let returned = marshal::view_from_value(returned)?;
        let report = marshal::from_view(desc, returned, self.config.unknown_fields)?;
        Ok(report)
    }
}

impl Drop for PolicyEngine {
    fn drop(&mut self) {
        let session = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .take();
        if let Some(session) = session {
            self.stop_engine(session.engine);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    fn write_script(dir: &Path, body: &str) {
        std::fs::write(script::script_path(dir), body).unwrap();
    }

    fn engine_for(dir: &Path) -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default().with_script_dir(dir))
    }

    #[test]
    fn test_error_classification() {
        assert!(PolicyError::Rejected { code: 2 }.is_rejection());
        assert!(!PolicyError::Script("boom".into()).is_rejection());
        assert!(
            !PolicyError::EntryPointMissing {
                name: script::ENTRY_POINT
            }
            .is_rejection()
        );
    }

    #[test]
    fn test_outcome_status_codes() {
        let ok = SubmitOutcome {
            result: Ok(MergeReport::default()),
            user_msg: None,
        };
        assert_eq!(ok.status_code(), SUBMIT_SUCCESS);
        assert_eq!(ok.rejection_code(), None);

        let rejected = SubmitOutcome {
            result: Err(PolicyError::Rejected { code: 7 }),
            user_msg: Some("no".into()),
        };
        assert_eq!(rejected.status_code(), SUBMIT_ERROR);
        assert_eq!(rejected.rejection_code(), Some(7));
    }

    #[test]
    fn test_engine_torn_down_after_each_call() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "fn job_submit(job_desc, uid) { 0 }");
        let engine = engine_for(dir.path());

        for _ in 0..3 {
            let outcome = engine.submit(&mut JobDescriptor::default(), 0);
            assert!(outcome.result.is_ok());
        }

        let stats = engine.stats();
        assert_eq!(stats.submissions, 3);
        assert_eq!(stats.engine_starts, 3);
        assert_eq!(stats.engine_stops, 3);
        assert_eq!(stats.live_engines, 0);
        assert_eq!(stats.peak_live_engines, 1);
    }

    #[test]
    fn test_cached_engine_kept_until_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "fn job_submit(job_desc, uid) { 0 }");
        let engine = PolicyEngine::new(
            PolicyConfig::default()
                .with_script_dir(dir.path())
                .with_reload_each_call(false),
        );

        engine.submit(&mut JobDescriptor::default(), 0);
        engine.submit(&mut JobDescriptor::default(), 0);
        assert_eq!(engine.stats().engine_starts, 1);
        assert_eq!(engine.stats().live_engines, 1);

        engine.reload();
        assert_eq!(engine.stats().engine_stops, 1);
        assert_eq!(engine.stats().live_engines, 0);

        engine.submit(&mut JobDescriptor::default(), 0);
        engine.shutdown();
        let stats = engine.stats();
        assert_eq!(stats.engine_starts, 2);
        assert_eq!(stats.engine_stops, 2);
    }

    #[test]
    fn test_missing_script_stops_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());

        let outcome = engine.submit(&mut JobDescriptor::default(), 0);

        assert!(matches!(
            outcome.result,
            Err(PolicyError::ScriptNotFound { .. })
        ));
        assert_eq!(outcome.status_code(), SUBMIT_ERROR);
        let stats = engine.stats();
        assert_eq!(stats.engine_starts, 1);
        assert_eq!(stats.engine_stops, 1);
    }

    #[test]
    fn test_job_modify_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let mut desc = JobDescriptor::default();
        desc.name = Some("job".into());

        assert_eq!(engine.job_modify(&mut desc, 1000), SUBMIT_SUCCESS);
        assert_eq!(desc.name.as_deref(), Some("job"));
        assert_eq!(engine.stats().engine_starts, 0);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cached_session_still_traces_every_phase() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "fn job_submit(job_desc, uid) { 0 }");
        let engine = PolicyEngine::new(
            PolicyConfig::default()
                .with_script_dir(dir.path())
                .with_reload_each_call(false),
        );

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            engine.submit(&mut JobDescriptor::default(), 0);
            engine.submit(&mut JobDescriptor::default(), 0);
        });
        assert_eq!(engine.stats().engine_starts, 1);

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        for phase in ["engine_starting", "script_loading", "invoking", "merging"] {
            assert_eq!(
                output.matches(&format!("phase={phase}")).count(),
                2,
                "{phase} in:\n{output}"
            );
        }
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::EngineStarting.to_string(), "engine_starting");
        assert_eq!(Phase::ResultValidating.to_string(), "result_validating");
    }
}
