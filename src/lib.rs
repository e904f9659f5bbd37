//! casync-pull library
//!
//! Pulls a casync release tree from a device into a local staging directory
//! and hands it to the release upload program.

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod pipeline;
pub mod process_guard;
pub mod remote;
pub mod sanity;
pub mod staging;
pub mod step_runner;
pub mod step_traits;
pub mod upload;

// Re-export main types for convenience
pub use config::{ConfigFile, PullConfig};
pub use error::{ConfigError, PullError};
pub use pipeline::{PullReport, ReleasePull, Step, StepRecord, StepStatus};
pub use process_guard::{ChildRegistry, SupervisedCommand};
pub use remote::{CopyTool, RemoteCopyArgs, RemoteHost, RemoteSource, SshOptions};
pub use staging::{StagingDir, StagingInventory};
pub use step_runner::{run_step_safe, OutputMode, StepOutput};
pub use step_traits::ToolInvocation;
pub use upload::UploadArgs;
