//! Remote device addressing and the remote-copy invocation.
//!
//! The device is named by a single positional argument of the form
//! `[user@]host`. It is handed verbatim to `scp`/`rsync`, so it is validated
//! up front: a value starting with `-` would be parsed as an option by the
//! copy tool, and a `:` would change which side of the copy is remote.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::ConfigError;
use crate::pipeline::Step;
use crate::step_traits::ToolInvocation;

/// Default location of the casync tree on the device.
pub const DEFAULT_REMOTE_PATH: &str = "/data/casync";

/// Validated `[user@]host` identifier of the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    user: Option<String>,
    host: String,
}

impl RemoteHost {
    /// Parse and validate a device identifier.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidHost {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if value.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if value.starts_with('-') {
            return Err(invalid("must not start with '-'"));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("must not contain whitespace"));
        }
        if value.contains(':') || value.contains('/') {
            return Err(invalid("must not contain ':' or '/'"));
        }

        let (user, host) = match value.split_once('@') {
            Some((user, host)) => {
                if user.is_empty() {
                    return Err(invalid("user before '@' is empty"));
                }
                (Some(user.to_string()), host)
            }
            None => (None, value),
        };

        if host.is_empty() {
            return Err(invalid("host after '@' is empty"));
        }
        if host.contains('@') {
            return Err(invalid("more than one '@'"));
        }
        if host.starts_with('-') {
            return Err(invalid("host must not start with '-'"));
        }

        Ok(Self {
            user,
            host: host.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.host),
            None => write!(f, "{}", self.host),
        }
    }
}

impl FromStr for RemoteHost {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Host plus the absolute path of the casync directory on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub host: RemoteHost,
    pub path: PathBuf,
}

impl RemoteSource {
    pub fn new(host: RemoteHost, path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let shown = path.display().to_string();
        if !path.is_absolute() {
            return Err(ConfigError::InvalidRemotePath {
                value: shown,
                reason: "must be absolute".to_string(),
            });
        }
        if path.parent().is_none() {
            return Err(ConfigError::InvalidRemotePath {
                value: shown,
                reason: "must not be the filesystem root".to_string(),
            });
        }
        if shown.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidRemotePath {
                value: shown,
                reason: "must not contain whitespace".to_string(),
            });
        }
        Ok(Self { host, path })
    }

    /// `host:/path` form understood by scp and rsync.
    pub fn location(&self) -> String {
        format!("{}:{}", self.host, self.path.display())
    }
}

/// Program used for the recursive remote-to-local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CopyTool {
    #[default]
    Scp,
    Rsync,
}

impl CopyTool {
    /// Programs that must be resolvable for this tool to work.
    pub fn required_programs(&self) -> &'static [&'static str] {
        match self {
            CopyTool::Scp => &["scp"],
            CopyTool::Rsync => &["rsync", "ssh"],
        }
    }
}

/// SSH transport options shared by both copy tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOptions {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity: Option<PathBuf>,
    /// Raw `-o` options, e.g. `StrictHostKeyChecking=no`.
    #[serde(default)]
    pub options: Vec<String>,
}

impl SshOptions {
    pub fn is_empty(&self) -> bool {
        self.port.is_none() && self.identity.is_none() && self.options.is_empty()
    }
}

/// Typed arguments for the remote copy.
///
/// # Field to Flag Mapping
///
/// | Field      | scp                 | rsync                          |
/// |------------|---------------------|--------------------------------|
/// | recursion  | `-r`                | `-a --delete`                  |
/// | `port`     | `-P <port>`         | `-e "ssh -p <port>"`           |
/// | `identity` | `-i <key>`          | `-e "ssh -i <key>"`            |
/// | `options`  | `-o <opt>` each     | `-e "ssh -o <opt>"`            |
/// | source     | `host:/path`        | `host:/path/`                  |
/// | dest       | `<staging>`         | `<staging>/`                   |
///
/// scp creates the destination itself when it does not exist, which is why
/// the staging directory is removed beforehand. rsync copies the directory
/// contents (trailing slashes) and `--delete` keeps the mirror exact.
/// Words of the rsync `-e` command that contain spaces or quotes are quoted
/// the way rsync splits that string.
#[derive(Debug, Clone)]
pub struct RemoteCopyArgs {
    pub tool: CopyTool,
    /// Overrides the program name, e.g. a wrapper script or absolute path.
    pub program: Option<String>,
    pub source: RemoteSource,
    pub destination: PathBuf,
    pub ssh: SshOptions,
}

impl RemoteCopyArgs {
    fn ssh_command(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        if let Some(port) = self.ssh.port {
            parts.push("-p".to_string());
            parts.push(port.to_string());
        }
        if let Some(identity) = &self.ssh.identity {
            parts.push("-i".to_string());
            parts.push(identity.display().to_string());
        }
        for opt in &self.ssh.options {
            parts.push("-o".to_string());
            parts.push(opt.clone());
        }
        parts
            .iter()
            .map(|part| quote_for_rsync(part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote one word of an rsync `-e` command.
///
/// rsync splits the remote shell command on spaces itself. Inside quotes a
/// doubled quote character stands for a literal one.
fn quote_for_rsync(word: &str) -> String {
    let plain = !word.is_empty()
        && !word
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '"');
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "''"))
    }
}

fn with_trailing_slash(path: &Path) -> String {
    let s = path.display().to_string();
    if s.ends_with('/') { s } else { format!("{}/", s) }
}

impl ToolInvocation for RemoteCopyArgs {
    fn program(&self) -> String {
        self.program
            .clone()
            .unwrap_or_else(|| self.tool.to_string())
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self.tool {
            CopyTool::Scp => {
                args.push("-r".to_string());
                if let Some(port) = self.ssh.port {
                    args.push("-P".to_string());
                    args.push(port.to_string());
                }
                if let Some(identity) = &self.ssh.identity {
                    args.push("-i".to_string());
                    args.push(identity.display().to_string());
                }
                for opt in &self.ssh.options {
                    args.push("-o".to_string());
                    args.push(opt.clone());
                }
                args.push(self.source.location());
                args.push(self.destination.display().to_string());
            }
            CopyTool::Rsync => {
                args.push("-a".to_string());
                args.push("--delete".to_string());
                if !self.ssh.is_empty() {
                    args.push("-e".to_string());
                    args.push(self.ssh_command());
                }
                args.push(format!(
                    "{}:{}",
                    self.source.host,
                    with_trailing_slash(&self.source.path)
                ));
                args.push(with_trailing_slash(&self.destination));
            }
        }
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn step(&self) -> Step {
        Step::RemoteCopy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(host: &str) -> RemoteSource {
        RemoteSource::new(RemoteHost::parse(host).unwrap(), DEFAULT_REMOTE_PATH).unwrap()
    }

    #[test]
    fn test_parse_plain_host() {
        let host = RemoteHost::parse("192.168.60.1").unwrap();
        assert_eq!(host.host(), "192.168.60.1");
        assert_eq!(host.user(), None);
        assert_eq!(host.to_string(), "192.168.60.1");
    }

    #[test]
    fn test_parse_user_at_host() {
        let host: RemoteHost = "comma@tici".parse().unwrap();
        assert_eq!(host.user(), Some("comma"));
        assert_eq!(host.host(), "tici");
        assert_eq!(host.to_string(), "comma@tici");
    }

    #[test]
    fn test_parse_rejects_bad_hosts() {
        for bad in [
            "",
            "-oProxyCommand=sh",
            "host name",
            "host:/etc",
            "a/b",
            "@host",
            "user@",
            "a@b@c",
            "user@-host",
            "host\n",
        ] {
            assert!(RemoteHost::parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_remote_source_requires_absolute_path() {
        let host = RemoteHost::parse("device").unwrap();
        assert!(RemoteSource::new(host.clone(), "data/casync").is_err());
        assert!(RemoteSource::new(host.clone(), "/").is_err());
        let src = RemoteSource::new(host, "/data/casync").unwrap();
        assert_eq!(src.location(), "device:/data/casync");
    }

    #[test]
    fn test_copy_tool_parse() {
        assert_eq!("scp".parse::<CopyTool>().unwrap(), CopyTool::Scp);
        assert_eq!("RSYNC".parse::<CopyTool>().unwrap(), CopyTool::Rsync);
        assert!("ftp".parse::<CopyTool>().is_err());
        assert_eq!(CopyTool::default().to_string(), "scp");
    }

    #[test]
    fn test_scp_args_minimal() {
        let args = RemoteCopyArgs {
            tool: CopyTool::Scp,
            program: None,
            source: source("comma@device"),
            destination: PathBuf::from("/tmp/casync"),
            ssh: SshOptions::default(),
        };
        assert_eq!(args.program(), "scp");
        assert_eq!(
            args.to_cli_args(),
            vec!["-r", "comma@device:/data/casync", "/tmp/casync"]
        );
        assert!(args.get_env_vars().is_empty());
        assert_eq!(args.step(), Step::RemoteCopy);
    }

    #[test]
    fn test_scp_args_with_ssh_options() {
        let args = RemoteCopyArgs {
            tool: CopyTool::Scp,
            program: Some("/usr/local/bin/scp".to_string()),
            source: source("device"),
            destination: PathBuf::from("/tmp/casync"),
            ssh: SshOptions {
                port: Some(8022),
                identity: Some(PathBuf::from("/home/me/.ssh/id_device")),
                options: vec!["StrictHostKeyChecking=no".to_string()],
            },
        };
        assert_eq!(args.program(), "/usr/local/bin/scp");
        assert_eq!(
            args.to_cli_args(),
            vec![
                "-r",
                "-P",
                "8022",
                "-i",
                "/home/me/.ssh/id_device",
                "-o",
                "StrictHostKeyChecking=no",
                "device:/data/casync",
                "/tmp/casync",
            ]
        );
    }

    #[test]
    fn test_rsync_args_copy_contents_and_delete() {
        let args = RemoteCopyArgs {
            tool: CopyTool::Rsync,
            program: None,
            source: source("device"),
            destination: PathBuf::from("/tmp/casync"),
            ssh: SshOptions {
                port: Some(22),
                identity: None,
                options: vec![],
            },
        };
        assert_eq!(args.program(), "rsync");
        assert_eq!(
            args.to_cli_args(),
            vec![
                "-a",
                "--delete",
                "-e",
                "ssh -p 22",
                "device:/data/casync/",
                "/tmp/casync/",
            ]
        );
    }

    #[test]
    fn test_rsync_without_ssh_options_omits_transport() {
        let args = RemoteCopyArgs {
            tool: CopyTool::Rsync,
            program: None,
            source: source("device"),
            destination: PathBuf::from("/tmp/casync/"),
            ssh: SshOptions::default(),
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-a", "--delete", "device:/data/casync/", "/tmp/casync/"]
        );
    }

    #[test]
    fn test_rsync_transport_keeps_words_with_spaces_together() {
        let args = RemoteCopyArgs {
            tool: CopyTool::Rsync,
            program: None,
            source: source("device"),
            destination: PathBuf::from("/tmp/casync"),
            ssh: SshOptions {
                port: None,
                identity: Some(PathBuf::from("/home/me/my keys/id")),
                options: vec!["ProxyCommand=ssh -W %h:%p jump".to_string()],
            },
        };
        assert_eq!(
            args.to_cli_args()[3],
            "ssh -i '/home/me/my keys/id' -o 'ProxyCommand=ssh -W %h:%p jump'"
        );
    }

    #[test]
    fn test_quote_for_rsync() {
        assert_eq!(quote_for_rsync("BatchMode=yes"), "BatchMode=yes");
        assert_eq!(quote_for_rsync("a b"), "'a b'");
        assert_eq!(quote_for_rsync("it's"), "'it''s'");
        assert_eq!(quote_for_rsync(""), "''");
    }

    #[test]
    fn test_required_programs() {
        assert_eq!(CopyTool::Scp.required_programs(), &["scp"]);
        assert_eq!(CopyTool::Rsync.required_programs(), &["rsync", "ssh"]);
    }
}
