//! Shared fixtures: fake copy, digest and upload programs written as bash
//! scripts into a scratch directory.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch layout for one test run
pub struct Fixture {
    pub tmp: TempDir,
    /// Stands in for the device's casync directory
    pub remote: PathBuf,
    pub staging: PathBuf,
    pub bin: PathBuf,
    /// Where fake programs record what they observed
    pub log: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let remote = tmp.path().join("device/data/casync");
        let staging = tmp.path().join("stage/casync");
        let bin = tmp.path().join("bin");
        let log = tmp.path().join("log");
        for dir in [&remote, &bin, &log] {
            fs::create_dir_all(dir).expect("create fixture dir");
        }
        Self {
            tmp,
            remote,
            staging,
            bin,
            log,
        }
    }

    /// Populate the fake device tree with a small casync release
    pub fn seed_remote(&self) {
        fs::create_dir_all(self.remote.join("default.castr/ab12")).unwrap();
        fs::write(self.remote.join("nightly-0.9.7.caidx"), b"index nightly").unwrap();
        fs::write(self.remote.join("agnos-10.1.caibx"), b"index agnos").unwrap();
        fs::write(
            self.remote.join("default.castr/ab12/ab12cafe.cacnk"),
            b"chunk data",
        )
        .unwrap();
    }

    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin.join(name);
        fs::write(&path, format!("#!/usr/bin/env bash\nset -e\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Behaves like `scp -r [opts] host:/path dest` against the local fs
    pub fn fake_scp(&self) -> PathBuf {
        self.script(
            "scp",
            &format!(
                r#"printf '%s\n' "$@" > "{log}/copy_args"
src="${{@: -2:1}}"
dst="${{@: -1}}"
cp -r "${{src#*:}}" "$dst""#,
                log = self.log.display()
            ),
        )
    }

    /// Copy program that exits with `code` without copying anything
    pub fn failing_copy(&self, code: i32) -> PathBuf {
        self.script(
            "scp-fail",
            &format!(
                "touch \"{log}/copy_ran\"\necho 'ssh: connect to host device port 22: No route to host' >&2\nexit {code}",
                log = self.log.display(),
                code = code
            ),
        )
    }

    /// Upload program that records `$var` and the tree it points at
    pub fn fake_upload(&self, var: &str, code: i32) -> PathBuf {
        self.script(
            "upload_casync_release",
            &format!(
                r#"printf '%s' "${{{var}-__unset__}}" > "{log}/upload_env"
printf '%s\n' "$@" > "{log}/upload_args"
(cd "${{{var}}}" && find . -type f | sort) > "{log}/upload_listing"
exit {code}"#,
                var = var,
                log = self.log.display(),
                code = code
            ),
        )
    }

    /// casync stand-in answering `casync digest ... <dir>`
    pub fn fake_casync(&self, digest: &str) -> PathBuf {
        self.script(
            "casync",
            &format!(
                r#"printf '%s\n' "$@" > "{log}/casync_args"
echo "{digest}""#,
                log = self.log.display(),
                digest = digest
            ),
        )
    }

    pub fn logged(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.log.join(name)).ok()
    }
}

/// Relative path -> contents of every regular file under `root`
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if entry.file_type().unwrap().is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().display().to_string();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}
