//! Typed arguments for the release upload program.
//!
//! The upload program is a black box. Its whole contract with us is one
//! environment variable naming the directory that holds the pulled casync
//! tree, plus whatever extra arguments the operator passes through.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::pipeline::Step;
use crate::step_traits::ToolInvocation;

/// Default upload program, resolved on `PATH` unless a path is given.
pub const DEFAULT_UPLOAD_PROGRAM: &str = "upload_casync_release";

/// Default name of the variable pointing the upload program at the tree.
pub const DEFAULT_ENV_VAR: &str = "CASYNC_DIR";

/// Check that `name` is a portable environment variable name.
pub fn validate_env_var_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidEnvVar(name.to_string()))
    }
}

/// Type-safe arguments for the upload step.
///
/// # Environment Contract
///
/// `env_var` is always exported as the absolute staging path. The staging
/// path comes from `StagingDir`, which refuses empty and relative values, so
/// the upload program never observes an empty or unset variable.
#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub program: String,
    pub extra_args: Vec<String>,
    pub env_var: String,
    pub staging_dir: PathBuf,
}

impl ToolInvocation for UploadArgs {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.extra_args.clone()
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![(
            self.env_var.clone(),
            self.staging_dir.display().to_string(),
        )]
    }

    fn step(&self) -> Step {
        Step::Upload
    }
}
