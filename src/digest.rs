//! Optional content digest of the pulled tree.
//!
//! `casync digest` over the staging directory gives the same value the device
//! updater computes for an installed tree, which makes it easy to match an
//! uploaded release against what a device reports.

use std::path::PathBuf;

use crate::pipeline::Step;
use crate::step_traits::ToolInvocation;

/// Feature flags the release tooling passes to every casync invocation.
pub const CASYNC_FEATURE_ARGS: &[&str] = &["--with=symlinks", "--with=permissions"];

pub const DEFAULT_CASYNC_PROGRAM: &str = "casync";

#[derive(Debug, Clone)]
pub struct DigestArgs {
    pub program: String,
    pub staging_dir: PathBuf,
}

impl ToolInvocation for DigestArgs {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["digest".to_string()];
        args.extend(CASYNC_FEATURE_ARGS.iter().map(|s| s.to_string()));
        args.push(self.staging_dir.display().to_string());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn step(&self) -> Step {
        Step::Digest
    }
}

/// Pull the digest out of `casync digest` stdout.
///
/// casync prints the hex digest on its own line; anything else (warnings
/// from wrappers) is ignored. Returns `None` when no line looks like one.
pub fn parse_digest(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.len() >= 32 && line.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|line| line.to_ascii_lowercase())
}
