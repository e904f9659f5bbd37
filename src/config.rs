//! Configuration for a pull.
//!
//! Values are layered, highest priority first:
//!
//! 1. command-line flags
//! 2. `CASYNC_PULL_*` environment variables (handled by clap)
//! 3. the JSON file given with `--config`
//! 4. built-in defaults
//!
//! Layers 1-3 are all expressed as a [`ConfigFile`] of optional values and
//! folded with [`ConfigFile::overlay`]; [`PullConfig::resolve`] then applies
//! defaults and validates everything before a single step runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest::DEFAULT_CASYNC_PROGRAM;
use crate::error::ConfigError;
use crate::remote::{CopyTool, RemoteHost, RemoteSource, SshOptions, DEFAULT_REMOTE_PATH};
use crate::staging::{StagingDir, DEFAULT_STAGING_DIR};
use crate::upload::{validate_env_var_name, DEFAULT_ENV_VAR, DEFAULT_UPLOAD_PROGRAM};

/// One layer of optional settings, as found in a config file.
///
/// ```json
/// {
///   "remote_path": "/data/casync",
///   "staging_dir": "/tmp/casync",
///   "copy_tool": "rsync",
///   "port": 22,
///   "ssh_options": ["StrictHostKeyChecking=no"],
///   "upload_program": "./release/upload_casync_release.py",
///   "upload_args": ["--channel", "nightly"],
///   "env_var": "CASYNC_DIR",
///   "digest": true
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub remote_path: Option<PathBuf>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub copy_tool: Option<CopyTool>,
    #[serde(default)]
    pub copy_program: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity: Option<PathBuf>,
    #[serde(default)]
    pub ssh_options: Option<Vec<String>>,
    #[serde(default)]
    pub upload_program: Option<String>,
    #[serde(default)]
    pub upload_args: Option<Vec<String>>,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default)]
    pub digest: Option<bool>,
    #[serde(default)]
    pub casync_program: Option<String>,
}

impl ConfigFile {
    /// Load a layer from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))
    }

    /// Fold `upper` over `self`; every value set in `upper` wins.
    pub fn overlay(self, upper: ConfigFile) -> ConfigFile {
        ConfigFile {
            remote_path: upper.remote_path.or(self.remote_path),
            staging_dir: upper.staging_dir.or(self.staging_dir),
            copy_tool: upper.copy_tool.or(self.copy_tool),
            copy_program: upper.copy_program.or(self.copy_program),
            port: upper.port.or(self.port),
            identity: upper.identity.or(self.identity),
            ssh_options: upper.ssh_options.or(self.ssh_options),
            upload_program: upper.upload_program.or(self.upload_program),
            upload_args: upper.upload_args.or(self.upload_args),
            env_var: upper.env_var.or(self.env_var),
            digest: upper.digest.or(self.digest),
            casync_program: upper.casync_program.or(self.casync_program),
        }
    }
}

/// Fully resolved and validated configuration of one pull.
#[derive(Debug, Clone)]
pub struct PullConfig {
    pub source: RemoteSource,
    pub staging: StagingDir,
    pub copy_tool: CopyTool,
    pub copy_program: Option<String>,
    pub ssh: SshOptions,
    pub upload_program: String,
    pub upload_args: Vec<String>,
    pub env_var: String,
    pub digest: bool,
    pub casync_program: String,
    /// Log commands instead of running them.
    pub dry_run: bool,
}

impl PullConfig {
    /// Defaults for `device`, with no file or flags applied.
    pub fn for_device(device: &str) -> Result<Self, ConfigError> {
        Self::resolve(device, ConfigFile::default())
    }

    /// Apply defaults to `layer` and validate the result.
    pub fn resolve(device: &str, layer: ConfigFile) -> Result<Self, ConfigError> {
        let host = RemoteHost::parse(device)?;
        let remote_path = layer
            .remote_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REMOTE_PATH));
        let source = RemoteSource::new(host, remote_path)?;
        let staging = StagingDir::new(
            layer
                .staging_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR)),
        )?;

        let config = Self {
            source,
            staging,
            copy_tool: layer.copy_tool.unwrap_or_default(),
            copy_program: layer.copy_program.filter(|p| !p.is_empty()),
            ssh: SshOptions {
                port: layer.port,
                identity: layer.identity,
                options: layer.ssh_options.unwrap_or_default(),
            },
            upload_program: layer
                .upload_program
                .unwrap_or_else(|| DEFAULT_UPLOAD_PROGRAM.to_string()),
            upload_args: layer.upload_args.unwrap_or_default(),
            env_var: layer.env_var.unwrap_or_else(|| DEFAULT_ENV_VAR.to_string()),
            digest: layer.digest.unwrap_or(false),
            casync_program: layer
                .casync_program
                .unwrap_or_else(|| DEFAULT_CASYNC_PROGRAM.to_string()),
            dry_run: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the fields that are not already guarded by their types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_program.trim().is_empty() {
            return Err(ConfigError::MissingUploadProgram);
        }
        validate_env_var_name(&self.env_var)?;

        if self.ssh.port == Some(0) {
            return Err(ConfigError::InvalidSsh("port must not be 0".to_string()));
        }
        if let Some(identity) = &self.ssh.identity {
            if identity.as_os_str().is_empty() {
                return Err(ConfigError::InvalidSsh(
                    "identity file path is empty".to_string(),
                ));
            }
        }
        if let Some(bad) = self
            .ssh
            .options
            .iter()
            .find(|o| o.trim().is_empty() || o.starts_with('-'))
        {
            return Err(ConfigError::InvalidSsh(format!("option '{}'", bad)));
        }
        Ok(())
    }
}
