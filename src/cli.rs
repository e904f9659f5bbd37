use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::ConfigFile;
use crate::remote::CopyTool;

/// casync-pull - fetch a casync release tree from a device and upload it
#[derive(Parser, Debug)]
#[command(name = "casync-pull")]
#[command(about = "Copy the casync directory from a device into a staging directory and run the release upload")]
#[command(version)]
pub struct Cli {
    /// Device to pull from, as `[user@]host`
    #[arg(value_name = "DEVICE")]
    pub device: String,

    /// JSON config file with defaults for the options below
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Local staging directory (deleted and recreated on every run)
    #[arg(long, env = "CASYNC_PULL_STAGING_DIR", value_name = "DIR")]
    pub staging_dir: Option<PathBuf>,

    /// casync directory on the device
    #[arg(long, env = "CASYNC_PULL_REMOTE_PATH", value_name = "PATH")]
    pub remote_path: Option<PathBuf>,

    /// Remote copy tool
    #[arg(long, env = "CASYNC_PULL_COPY_TOOL", value_name = "TOOL")]
    pub copy_tool: Option<CopyTool>,

    /// Program to run instead of the copy tool's default binary
    #[arg(long, env = "CASYNC_PULL_COPY_PROGRAM", value_name = "PROGRAM")]
    pub copy_program: Option<String>,

    /// SSH port on the device
    #[arg(short, long, env = "CASYNC_PULL_PORT")]
    pub port: Option<u16>,

    /// SSH identity file
    #[arg(short, long, env = "CASYNC_PULL_IDENTITY", value_name = "FILE")]
    pub identity: Option<PathBuf>,

    /// Extra `ssh -o` option, e.g. `StrictHostKeyChecking=no` (repeatable).
    /// The environment variable holds a single option, commas included.
    #[arg(
        short = 'o',
        long = "ssh-option",
        env = "CASYNC_PULL_SSH_OPTION",
        value_name = "OPTION"
    )]
    pub ssh_options: Vec<String>,

    /// Release upload program
    #[arg(long, env = "CASYNC_PULL_UPLOAD_PROGRAM", value_name = "PROGRAM")]
    pub upload_program: Option<String>,

    /// Argument passed through to the upload program unchanged (repeatable).
    /// The environment variable holds a single argument.
    #[arg(
        long = "upload-arg",
        env = "CASYNC_PULL_UPLOAD_ARG",
        allow_hyphen_values = true,
        value_name = "ARG"
    )]
    pub upload_args: Vec<String>,

    /// Environment variable that tells the upload program where the tree is
    #[arg(long, env = "CASYNC_PULL_ENV_VAR", value_name = "NAME")]
    pub env_var: Option<String>,

    /// Compute `casync digest` of the pulled tree before uploading
    #[arg(long, env = "CASYNC_PULL_DIGEST")]
    pub digest: bool,

    /// casync binary used for --digest
    #[arg(long, env = "CASYNC_PULL_CASYNC_PROGRAM", value_name = "PROGRAM")]
    pub casync_program: Option<String>,

    /// Write a JSON report of the run to this file
    #[arg(long, env = "CASYNC_PULL_REPORT", value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Dry-run mode: show what would be executed without making changes.
    #[arg(long, env = "CASYNC_PULL_DRY_RUN")]
    pub dry_run: bool,

    /// Do not check that the programs exist before starting
    #[arg(long, env = "CASYNC_PULL_SKIP_PREFLIGHT")]
    pub skip_preflight: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Flags and environment as the top config layer
    pub fn overrides(&self) -> ConfigFile {
        let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        ConfigFile {
            remote_path: self.remote_path.clone(),
            staging_dir: self.staging_dir.clone(),
            copy_tool: self.copy_tool,
            copy_program: self.copy_program.clone(),
            port: self.port,
            identity: self.identity.clone(),
            ssh_options: non_empty(&self.ssh_options),
            upload_program: self.upload_program.clone(),
            upload_args: non_empty(&self.upload_args),
            env_var: self.env_var.clone(),
            digest: self.digest.then_some(true),
            casync_program: self.casync_program.clone(),
        }
    }

    /// Tracing filter directive for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn,casync_pull=info",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
