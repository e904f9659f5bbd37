//! The pull pipeline.
//!
//! Steps run strictly in order and the first failure stops the run:
//!
//! 1. clear staging   - delete the staging directory (absence is fine)
//! 2. remote copy     - `scp -r`/`rsync -a` the device tree into staging
//! 3. verify staging  - the copy must have left a directory behind
//! 4. digest          - optional `casync digest` of the tree
//! 5. upload          - run the upload program with `CASYNC_DIR=<staging>`

use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::{info, info_span, warn};

use crate::config::PullConfig;
use crate::digest::{parse_digest, DigestArgs};
use crate::error::{PullError, Result};
use crate::remote::RemoteCopyArgs;
use crate::staging::StagingInventory;
use crate::step_runner::{run_step_safe, OutputMode};
use crate::step_traits::ToolInvocation;
use crate::upload::UploadArgs;

/// One stage of a pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[strum(serialize = "clear staging")]
    ClearStaging,
    #[strum(serialize = "remote copy")]
    RemoteCopy,
    #[strum(serialize = "verify staging")]
    VerifyStaging,
    #[strum(serialize = "digest")]
    Digest,
    #[strum(serialize = "upload")]
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    /// The step that ended the pull
    Failed,
    /// Not executed because of `--dry-run`
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    /// Command line for external steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a pull did, written with `--report` whether or not it succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub remote: String,
    pub staging_dir: String,
    pub dry_run: bool,
    /// Process exit status of the pull; 0 until a step fails
    pub exit_code: i32,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<StagingInventory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl PullReport {
    fn new(config: &PullConfig) -> Self {
        Self {
            remote: config.source.location(),
            staging_dir: config.staging.path().display().to_string(),
            dry_run: config.dry_run,
            exit_code: 0,
            steps: Vec::new(),
            inventory: None,
            digest: None,
        }
    }

    /// Steps in the order they were recorded
    pub fn step_order(&self) -> Vec<Step> {
        self.steps.iter().map(|r| r.step).collect()
    }

    pub fn failed_step(&self) -> Option<Step> {
        self.steps
            .iter()
            .find(|r| r.status == StepStatus::Failed)
            .map(|r| r.step)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// A configured pull, ready to run
#[derive(Debug, Clone)]
pub struct ReleasePull {
    config: PullConfig,
}

impl ReleasePull {
    pub fn new(config: PullConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PullConfig {
        &self.config
    }

    pub fn copy_args(&self) -> RemoteCopyArgs {
        RemoteCopyArgs {
            tool: self.config.copy_tool,
            program: self.config.copy_program.clone(),
            source: self.config.source.clone(),
            destination: self.config.staging.path().to_path_buf(),
            ssh: self.config.ssh.clone(),
        }
    }

    pub fn digest_args(&self) -> DigestArgs {
        DigestArgs {
            program: self.config.casync_program.clone(),
            staging_dir: self.config.staging.path().to_path_buf(),
        }
    }

    pub fn upload_args(&self) -> UploadArgs {
        UploadArgs {
            program: self.config.upload_program.clone(),
            extra_args: self.config.upload_args.clone(),
            env_var: self.config.env_var.clone(),
            staging_dir: self.config.staging.path().to_path_buf(),
        }
    }

    /// Steps this configuration runs, with the command line of external ones.
    pub fn plan(&self) -> Vec<(Step, Option<String>)> {
        let mut plan = vec![
            (
                Step::ClearStaging,
                Some(format!("rm -rf {}", self.config.staging.path().display())),
            ),
            (Step::RemoteCopy, Some(self.copy_args().display_command())),
            (Step::VerifyStaging, None),
        ];
        if self.config.digest {
            plan.push((Step::Digest, Some(self.digest_args().display_command())));
        }
        plan.push((Step::Upload, Some(self.upload_args().display_command())));
        plan
    }

    /// Empty report for this pull, to be filled by [`ReleasePull::execute`].
    pub fn new_report(&self) -> PullReport {
        PullReport::new(&self.config)
    }

    /// Run every step, stopping at the first failure.
    pub fn run(&self) -> Result<PullReport> {
        let mut report = self.new_report();
        self.execute(&mut report)?;
        Ok(report)
    }

    /// Run every step into `report`, stopping at the first failure.
    ///
    /// On failure the report still holds the steps that completed, the one
    /// that failed, and the exit code the failure maps to.
    pub fn execute(&self, report: &mut PullReport) -> Result<()> {
        let span = info_span!("pull", remote = %self.config.source.location());
        let _enter = span.enter();

        if self.config.dry_run {
            for (step, command) in self.plan() {
                info!("[dry run] {}: {}", step, command.as_deref().unwrap_or("-"));
                report.steps.push(StepRecord {
                    step,
                    status: StepStatus::Planned,
                    command,
                    duration_ms: 0,
                    error: None,
                });
            }
            return Ok(());
        }

        let staging = &self.config.staging;

        self.timed(report, Step::ClearStaging, None, || {
            staging.clear()?;
            staging.prepare_parent()
        })?;

        let copy = self.copy_args();
        self.timed(report, Step::RemoteCopy, Some(copy.display_command()), || {
            run_step_safe(&copy, OutputMode::Inherit)?.ensure_success()
        })?;

        let inventory = self.timed(report, Step::VerifyStaging, None, || staging.inventory())?;
        if inventory.is_empty() {
            warn!("Remote casync directory was empty");
        } else if inventory.index_files.is_empty() {
            warn!("No casync index files found in {}", staging.path().display());
        }
        info!(
            "Pulled {} files ({} bytes), {} index file(s)",
            inventory.files,
            inventory.total_bytes,
            inventory.index_files.len()
        );
        report.inventory = Some(inventory);

        if self.config.digest {
            let digest = self.digest_args();
            let value = self.timed(report, Step::Digest, Some(digest.display_command()), || {
                let output = run_step_safe(&digest, OutputMode::Capture)?;
                output.ensure_success()?;
                parse_digest(&output.stdout).ok_or_else(|| {
                    PullError::staging(
                        Step::Digest,
                        staging.path().display().to_string(),
                        "casync digest printed no digest",
                    )
                })
            })?;
            info!("Staging digest: {}", value);
            report.digest = Some(value);
        }

        let upload = self.upload_args();
        self.timed(report, Step::Upload, Some(upload.display_command()), || {
            run_step_safe(&upload, OutputMode::Inherit)?.ensure_success()
        })?;

        info!("Pull complete");
        Ok(())
    }

    fn timed<T>(
        &self,
        report: &mut PullReport,
        step: Step,
        command: Option<String>,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = f();
        let mut record = StepRecord {
            step,
            status: StepStatus::Completed,
            command,
            duration_ms: start.elapsed().as_millis() as u64,
            error: None,
        };
        if let Err(e) = &result {
            record.status = StepStatus::Failed;
            record.error = Some(e.to_string());
            report.exit_code = e.exit_code();
        }
        report.steps.push(record);
        result
    }
}
