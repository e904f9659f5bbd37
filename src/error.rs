//! Error handling module for casync-pull
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every failure carries enough information to pick the process exit code,
//! so the binary can propagate the status of the first failing step.

use thiserror::Error;

use crate::pipeline::Step;

/// Exit code used when a program cannot be found or spawned (shell convention).
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit code for usage, configuration and validation errors.
pub const EXIT_USAGE: i32 = 2;

/// Exit code for local failures that have no child status to propagate.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code of a process ended by `signal`, as a shell reports it.
pub const fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

/// Main error type for casync-pull
#[derive(Error, Debug)]
pub enum PullError {
    /// IO errors outside of a pipeline step (report writing, config reading)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Staging directory could not be cleared, prepared or verified
    #[error("{step} failed for {path}: {reason}")]
    Staging {
        step: Step,
        path: String,
        reason: String,
    },

    /// An external program could not be started
    #[error("{step}: failed to start '{program}': {reason}")]
    Spawn {
        step: Step,
        program: String,
        reason: String,
        not_found: bool,
    },

    /// An external program ran and exited unsuccessfully
    #[error("{step} failed: '{program}' exited with status {code}")]
    StepFailed {
        step: Step,
        program: String,
        code: i32,
    },

    /// An external program was terminated by a signal
    #[error("{step} failed: '{program}' was killed by signal {signal}")]
    Killed {
        step: Step,
        program: String,
        signal: i32,
    },

    /// Required binaries are missing
    #[error("Pre-flight check failed, missing programs: {}", .missing.join(", "))]
    Preflight { missing: Vec<String> },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PullError {
    /// Create a staging error
    pub fn staging(step: Step, path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Staging {
            step,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The step that failed, if the error came out of the pipeline.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Staging { step, .. }
            | Self::Spawn { step, .. }
            | Self::StepFailed { step, .. }
            | Self::Killed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Process exit code for this error.
    ///
    /// | Error                 | Code          |
    /// |-----------------------|---------------|
    /// | `StepFailed`          | child's code  |
    /// | `Killed`              | 128 + signal  |
    /// | `Spawn` (not found)   | 127           |
    /// | `Config`, `Preflight` | 2             |
    /// | everything else       | 1             |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StepFailed { code, .. } => *code,
            Self::Killed { signal, .. } => signal_exit_code(*signal),
            Self::Spawn { not_found: true, .. } => EXIT_NOT_FOUND,
            Self::Config(_) | Self::Preflight { .. } => EXIT_USAGE,
            Self::Spawn { .. } | Self::Staging { .. } | Self::Io(_) | Self::Json(_) => {
                EXIT_FAILURE
            }
        }
    }
}

/// Errors raised while resolving or validating configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Device identifier is unusable
    #[error("invalid device '{value}': {reason}")]
    InvalidHost { value: String, reason: String },

    /// Remote path is unusable
    #[error("invalid remote path '{value}': {reason}")]
    InvalidRemotePath { value: String, reason: String },

    /// Staging directory is unusable
    #[error("invalid staging directory '{value}': {reason}")]
    InvalidStagingDir { value: String, reason: String },

    /// Environment variable name for the upload step is unusable
    #[error("invalid environment variable name '{0}'")]
    InvalidEnvVar(String),

    /// SSH transport setting is unusable
    #[error("invalid ssh setting: {0}")]
    InvalidSsh(String),

    /// Upload program is empty
    #[error("upload program must not be empty")]
    MissingUploadProgram,

    /// Config file could not be read or parsed
    #[error("failed to load config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Result type alias for casync-pull operations
pub type Result<T> = std::result::Result<T, PullError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PullError::StepFailed {
            step: Step::RemoteCopy,
            program: "scp".to_string(),
            code: 1,
        };
        assert_eq!(
            err.to_string(),
            "remote copy failed: 'scp' exited with status 1"
        );

        let err = PullError::Config(ConfigError::MissingUploadProgram);
        assert_eq!(
            err.to_string(),
            "Configuration error: upload program must not be empty"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PullError = io_err.into();
        assert!(matches!(err, PullError::Io(_)));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_exit_code_propagates_child_status() {
        let err = PullError::StepFailed {
            step: Step::Upload,
            program: "upload_casync_release".to_string(),
            code: 42,
        };
        assert_eq!(err.exit_code(), 42);
        assert_eq!(err.step(), Some(Step::Upload));
    }

    #[test]
    fn test_exit_code_for_signal_and_spawn() {
        let killed = PullError::Killed {
            step: Step::RemoteCopy,
            program: "scp".to_string(),
            signal: 15,
        };
        assert_eq!(killed.exit_code(), 143);

        let missing = PullError::Spawn {
            step: Step::Upload,
            program: "nope".to_string(),
            reason: "No such file or directory".to_string(),
            not_found: true,
        };
        assert_eq!(missing.exit_code(), EXIT_NOT_FOUND);

        let denied = PullError::Spawn {
            step: Step::Upload,
            program: "nope".to_string(),
            reason: "Permission denied".to_string(),
            not_found: false,
        };
        assert_eq!(denied.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_config_errors_are_usage_errors() {
        let err: PullError = ConfigError::InvalidEnvVar("1BAD".to_string()).into();
        assert_eq!(err.exit_code(), EXIT_USAGE);
        assert_eq!(err.step(), None);

        let err = PullError::Preflight {
            missing: vec!["scp".to_string(), "casync".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Pre-flight check failed, missing programs: scp, casync"
        );
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }
}
