//! Pre-flight sanity checks for runtime environment
//!
//! Verifies every program a pull will start can be found before the staging
//! directory is touched, so a typo in `--upload-program` does not cost a
//! multi-gigabyte copy first.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::PullConfig;
use crate::error::{PullError, Result};

/// Result of environment verification
#[derive(Debug, Default)]
pub struct SanityCheckResult {
    pub resolved: Vec<(String, PathBuf)>,
    pub missing_binaries: Vec<String>,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty()
    }
}

/// Resolve a program name on `PATH`, or check a path to one
fn resolve_binary(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Programs a run with `config` is going to start
pub fn required_programs(config: &PullConfig) -> Vec<String> {
    let mut programs: Vec<String> = match &config.copy_program {
        Some(program) => vec![program.clone()],
        None => config
            .copy_tool
            .required_programs()
            .iter()
            .map(|p| p.to_string())
            .collect(),
    };
    if config.digest {
        programs.push(config.casync_program.clone());
    }
    programs.push(config.upload_program.clone());
    programs.dedup();
    programs
}

/// Check each program and collect what is missing
pub fn verify_environment(config: &PullConfig) -> SanityCheckResult {
    let mut result = SanityCheckResult::default();

    for program in required_programs(config) {
        match resolve_binary(&program) {
            Some(path) => {
                debug!("Resolved {} -> {}", program, path.display());
                result.resolved.push((program, path));
            }
            None => result.missing_binaries.push(program),
        }
    }

    result
}

/// Run the checks and fail with `PullError::Preflight` on a missing program
pub fn run_preflight_checks(config: &PullConfig) -> Result<()> {
    debug!("Running pre-flight sanity checks...");

    let result = verify_environment(config);
    if !result.is_ok() {
        return Err(PullError::Preflight {
            missing: result.missing_binaries,
        });
    }

    info!(
        "Pre-flight checks passed ({} programs resolved)",
        result.resolved.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PullConfig;
    use crate::remote::CopyTool;

    fn config_with(upload: &str) -> PullConfig {
        let mut config = PullConfig::for_device("device").unwrap();
        config.upload_program = upload.to_string();
        config
    }

    #[test]
    fn test_resolve_binary_bash() {
        assert!(resolve_binary("bash").is_some(), "bash should be available");
    }

    #[test]
    fn test_resolve_binary_nonexistent() {
        assert!(resolve_binary("this_binary_definitely_does_not_exist_12345").is_none());
    }

    #[test]
    fn test_required_programs_default() {
        let config = config_with("upload_casync_release");
        assert_eq!(required_programs(&config), vec!["scp", "upload_casync_release"]);
    }

    #[test]
    fn test_required_programs_rsync_digest_override() {
        let mut config = config_with("/opt/release/upload");
        config.copy_tool = CopyTool::Rsync;
        config.digest = true;
        assert_eq!(
            required_programs(&config),
            vec!["rsync", "ssh", "casync", "/opt/release/upload"]
        );

        config.copy_program = Some("/usr/bin/rsync".to_string());
        assert_eq!(
            required_programs(&config),
            vec!["/usr/bin/rsync", "casync", "/opt/release/upload"]
        );
    }

    #[test]
    fn test_preflight_reports_missing_upload_program() {
        let mut config = config_with("this_binary_definitely_does_not_exist_12345");
        config.copy_program = Some("bash".to_string());

        let err = run_preflight_checks(&config).unwrap_err();
        match err {
            PullError::Preflight { missing } => {
                assert_eq!(missing, vec!["this_binary_definitely_does_not_exist_12345"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_preflight_passes_with_available_programs() {
        let mut config = config_with("bash");
        config.copy_program = Some("bash".to_string());
        assert!(run_preflight_checks(&config).is_ok());
    }
}
