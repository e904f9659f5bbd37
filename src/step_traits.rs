//! Type-safe contracts for the external programs a pull runs.
//!
//! Each external step (remote copy, digest, upload) is described by a struct
//! implementing `ToolInvocation`. The struct is the single source of truth for
//! the program name, its arguments and the environment it must observe, so a
//! flag or variable cannot drift between where it is built and where it runs.

use crate::pipeline::Step;

/// Trait for typed external program invocations.
///
/// # Contract
///
/// - `program()`: program name (looked up on `PATH`) or a path to it.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `get_env_vars()`: variables added to the inherited environment.
/// - `step()`: which pipeline step this invocation belongs to.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use casync_pull::step_traits::ToolInvocation;
/// use casync_pull::upload::UploadArgs;
///
/// let args = UploadArgs {
///     program: "upload_casync_release".to_string(),
///     extra_args: vec![],
///     env_var: "CASYNC_DIR".to_string(),
///     staging_dir: PathBuf::from("/tmp/casync"),
/// };
///
/// assert!(args.to_cli_args().is_empty());
/// assert_eq!(
///     args.get_env_vars(),
///     vec![("CASYNC_DIR".to_string(), "/tmp/casync".to_string())]
/// );
/// ```
pub trait ToolInvocation {
    /// Program to execute.
    fn program(&self) -> String;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables the program requires.
    fn get_env_vars(&self) -> Vec<(String, String)>;

    /// Pipeline step this invocation implements.
    fn step(&self) -> Step;

    /// Human-readable command line, used for logging and dry-run output.
    fn display_command(&self) -> String {
        let mut parts: Vec<String> = self
            .get_env_vars()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(self.program());
        parts.extend(self.to_cli_args());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake;

    impl ToolInvocation for Fake {
        fn program(&self) -> String {
            "tool".to_string()
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec!["-r".to_string(), "src".to_string()]
        }
        fn get_env_vars(&self) -> Vec<(String, String)> {
            vec![("DIR".to_string(), "/tmp/x".to_string())]
        }
        fn step(&self) -> Step {
            Step::RemoteCopy
        }
    }

    #[test]
    fn test_display_command_includes_env_and_args() {
        assert_eq!(Fake.display_command(), "DIR=/tmp/x tool -r src");
    }
}
