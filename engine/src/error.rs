use thiserror::Error;

/// Top-level error kinds surfaced by the orchestrator core.
///
/// These mirror the error-kind taxonomy in the design's error handling
/// section: validation failures are fatal pre-run, preflight and stage
/// failures are scoped to a single VM, transient errors are retried by the
/// caller before they ever reach here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("plan validation failed: {0}")]
    Validation(String),

    #[error("VM preflight check failed for '{vm_name}': {reason}")]
    Preflight { vm_name: String, reason: String },

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("plan YAML error: {0}")]
    PlanFormat(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown instance type: {0}")]
    UnknownInstanceType(String),

    #[error("unknown wave: {0}")]
    UnknownWave(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn preflight(vm_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Preflight {
            vm_name: vm_name.into(),
            reason: reason.into(),
        }
    }

    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// The kind of a per-stage failure, as required by the stage handler
/// contract: a structured result, not an out-of-band exception.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageErrorKind {
    #[error("transient infrastructure error")]
    TransientInfra,
    #[error("artifact missing or corrupt")]
    Artifact,
    #[error("fatal stage error")]
    Fatal,
    #[error("preflight check failed")]
    Preflight,
    #[error("cancelled")]
    Cancelled,
}

/// The error value a stage handler returns on failure. Carries enough
/// structure for the executor to decide whether to retry, and enough detail
/// for the dashboard/report to show one readable line.
#[derive(Debug, Clone)]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::TransientInfra,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn artifact(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Artifact,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Fatal,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn preflight(message: impl Into<String>) -> Self {
        Self {
            kind: StageErrorKind::Preflight,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: StageErrorKind::Cancelled,
            message: "cancelled".to_string(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StageError {}
