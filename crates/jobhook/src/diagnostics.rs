//! User message accumulation and script log forwarding.

use std::sync::{Arc, Mutex, PoisonError};

/// Accumulates the message shown to the submitting user.
///
/// Clones share the same buffer, so the copy captured by the script's host
/// functions and the one held by the engine see the same text.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    inner: Arc<Mutex<Option<String>>>,
}

impl MessageBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text`, separated from earlier text by a newline.
    pub fn record(&self, text: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(message) => {
                message.push('\n');
                message.push_str(text);
            }
            None => *guard = Some(text.to_string()),
        }
    }

    /// Take the accumulated message, leaving the buffer empty.
    pub fn take(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Discard anything accumulated.
    pub fn clear(&self) {
        self.take();
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Forwards script log lines to `tracing`, prefixed with the plugin name.
#[derive(Debug, Clone)]
pub struct ScriptLog {
    plugin: Arc<str>,
}

impl ScriptLog {
    /// Create a sink that prefixes lines with `plugin`.
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: Arc::from(plugin),
        }
    }

    /// The plugin identity used as prefix.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Format a log line the way it is emitted.
    pub fn line(&self, text: &str) -> String {
        format!("{}: {}", self.plugin, text)
    }

    /// Emit an informational line.
    pub fn info(&self, text: &str) {
        tracing::info!(target: "jobhook::script", "{}", self.line(text));
    }

    /// Emit an error line.
    pub fn error(&self, text: &str) {
        tracing::error!(target: "jobhook::script", "{}", self.line(text));
    }

    /// Emit a debug line.
    pub fn debug(&self, text: &str) {
        tracing::debug!(target: "jobhook::script", "{}", self.line(text));
    }
}
