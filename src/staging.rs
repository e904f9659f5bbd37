//! Local staging directory handling.
//!
//! The staging directory is wiped before every pull so the copy leaves an
//! exact mirror of the remote tree, with nothing left over from an earlier
//! release. Because it is deleted recursively, the path is checked hard at
//! construction time.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, PullError, Result};
use crate::pipeline::Step;

/// Default local staging directory.
pub const DEFAULT_STAGING_DIR: &str = "/tmp/casync";

/// File extensions of casync index and archive files.
const CASYNC_INDEX_EXTENSIONS: &[&str] = &["caidx", "caibx", "catar"];

/// Absolute path of the staging directory.
///
/// # Invariants
///
/// - absolute and non-empty
/// - not the filesystem root
/// - contains no `..` components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn new(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let raw = path.as_ref();
        let invalid = |reason: &str| ConfigError::InvalidStagingDir {
            value: raw.display().to_string(),
            reason: reason.to_string(),
        };

        if raw.as_os_str().is_empty() {
            return Err(invalid("must not be empty"));
        }
        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(invalid("must not contain '..'"));
        }

        let absolute = std::path::absolute(raw).map_err(|e| invalid(&e.to_string()))?;
        let normalized: PathBuf = absolute
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();

        if normalized.parent().is_none() {
            return Err(invalid("must not be the filesystem root"));
        }

        Ok(Self { path: normalized })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively delete the staging directory.
    ///
    /// Absence is not an error. A file or symlink at the path is removed
    /// without following it. Returns whether anything was removed.
    pub fn clear(&self) -> Result<bool> {
        let metadata = match fs::symlink_metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Staging directory {} absent, nothing to clear", self.path.display());
                return Ok(false);
            }
            Err(e) => return Err(self.error(Step::ClearStaging, e)),
        };

        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&self.path)
        } else {
            fs::remove_file(&self.path)
        };

        match removed {
            Ok(()) => {
                info!("Cleared staging directory {}", self.path.display());
                Ok(true)
            }
            // Raced with another remover; the postcondition still holds.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.error(Step::ClearStaging, e)),
        }
    }

    /// Create the parent directory so the copy tool can create the staging
    /// directory itself.
    pub fn prepare_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.error(Step::ClearStaging, e))?;
        }
        Ok(())
    }

    /// Walk the staging tree after the copy.
    ///
    /// Fails if the copy tool reported success but left no directory behind.
    pub fn inventory(&self) -> Result<StagingInventory> {
        let metadata = fs::symlink_metadata(&self.path)
            .map_err(|e| self.error(Step::VerifyStaging, e))?;
        if !metadata.is_dir() {
            return Err(PullError::staging(
                Step::VerifyStaging,
                self.path.display().to_string(),
                "not a directory after copy",
            ));
        }

        let mut inventory = StagingInventory::default();
        walk(&self.path, &self.path, &mut inventory)
            .map_err(|e| self.error(Step::VerifyStaging, e))?;
        inventory.index_files.sort();

        debug!(
            "Staging inventory: {} files, {} dirs, {} symlinks, {} bytes",
            inventory.files, inventory.directories, inventory.symlinks, inventory.total_bytes
        );
        Ok(inventory)
    }

    fn error(&self, step: Step, err: io::Error) -> PullError {
        PullError::staging(step, self.path.display().to_string(), err.to_string())
    }
}

/// Summary of what the copy left in the staging directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingInventory {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub total_bytes: u64,
    /// casync index/archive files, relative to the staging root.
    pub index_files: Vec<String>,
}

impl StagingInventory {
    pub fn is_empty(&self) -> bool {
        self.files == 0 && self.directories == 0 && self.symlinks == 0
    }
}

fn walk(root: &Path, dir: &Path, inventory: &mut StagingInventory) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            inventory.symlinks += 1;
        } else if file_type.is_dir() {
            inventory.directories += 1;
            walk(root, &path, inventory)?;
        } else {
            inventory.files += 1;
            inventory.total_bytes += entry.metadata()?.len();
            let is_index = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| CASYNC_INDEX_EXTENSIONS.contains(&e));
            if is_index {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                inventory.index_files.push(relative.display().to_string());
            }
        }
    }
    Ok(())
}
