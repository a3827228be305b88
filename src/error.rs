use thiserror::Error;

/// Prefix the simulator puts in front of a reply line that reports a failure
pub const ERROR_PREFIX: &str = "ERROR:";

/// Failures raised while talking to a simulator process
#[derive(Debug, Error)]
pub enum SessionError {
    /// The simulator process could not be started; a deployment problem.
    #[error("failed to launch simulator: {0}")]
    Launch(#[source] std::io::Error),

    /// The simulator answered something this side cannot use.
    #[error("simulator protocol error: {0}")]
    Protocol(String),

    /// The simulator replied with an `ERROR:` line.
    #[error("{0}")]
    Reported(String),

    /// No reply arrived within the wall-clock limit; the process was killed.
    #[error("simulator did not reply within {0} ms")]
    Timeout(u64),

    #[error("simulator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the failure is attributable to the submission rather than the
    /// grading subsystem itself
    pub fn is_submission_fault(&self) -> bool {
        matches!(self, Self::Reported(_) | Self::Timeout(_))
    }
}

/// Failures that abort a grading run without producing a verdict
#[derive(Debug, Error)]
pub enum GradeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("script evaluation failed: {0:#}")]
    Script(#[source] anyhow::Error),
}
