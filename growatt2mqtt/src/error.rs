use thiserror::Error;

/// Failures that end a device's polling session early.
///
/// Decode and clock problems never end a session; they are reported through
/// [`crate::register_map::DecodeError`] and [`crate::clock_reconciler::ClockError`]
/// and only remove the affected values.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connect, read, or write failed or timed out.
    #[error("{step} failed: {cause:#}")]
    Transport { step: String, cause: anyhow::Error },

    #[error("publishing failed: {cause:#}")]
    Publish { cause: anyhow::Error },

    /// Shutdown was requested while the session was running.
    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn transport(step: impl Into<String>, cause: anyhow::Error) -> Self {
        SessionError::Transport {
            step: step.into(),
            cause,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}
