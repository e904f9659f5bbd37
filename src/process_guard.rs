//! Supervision of the programs a pull starts
//!
//! `scp` and `rsync` each start an `ssh` of their own, and the upload program
//! may fork workers. Each step therefore runs as the leader of a fresh
//! process group, and the group (not the leader PID) is what gets stopped:
//!
//! - `SupervisedCommand::supervised` puts the child in its own group and ties
//!   it to our lifetime with `PR_SET_PDEATHSIG`
//! - `ChildRegistry` remembers which step owns which running group
//! - On SIGINT/SIGTERM/SIGHUP every registered group gets SIGTERM, then
//!   SIGKILL for whatever is still running after the grace period

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::signal_exit_code;
use crate::pipeline::Step;

/// How long a step gets to exit after SIGTERM before its group is killed.
pub const SIGNAL_GRACE_PERIOD: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Process groups of the steps that are currently running
#[derive(Debug, Default)]
pub struct ChildRegistry {
    groups: HashMap<u32, Step>,
    /// Set once a signal started tearing the groups down
    stopping: bool,
}

impl ChildRegistry {
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Run `f` with the global registry locked.
    ///
    /// A poisoned lock is taken over; the map only ever holds stale PIDs.
    pub fn with_global<R>(f: impl FnOnce(&mut ChildRegistry) -> R) -> R {
        let registry = Self::global();
        let mut guard = registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Record a freshly spawned group leader (its PID is also the PGID).
    pub fn register(&mut self, pgid: u32, step: Step) {
        debug!("{}: running as process group {}", step, pgid);
        self.groups.insert(pgid, step);
    }

    pub fn unregister(&mut self, pgid: u32) {
        if let Some(step) = self.groups.remove(&pgid) {
            debug!("{}: process group {} finished", step, pgid);
        }
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }

    pub fn contains(&self, pgid: u32) -> bool {
        self.groups.contains_key(&pgid)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Stop every registered group: SIGTERM, wait up to `grace_period` for
    /// the groups to empty, then SIGKILL the ones that did not.
    ///
    /// Returns how many groups had to be killed. Only the first call does
    /// anything; later calls return 0.
    pub fn terminate_all(&mut self, grace_period: Duration) -> usize {
        if self.stopping {
            return 0;
        }
        self.stopping = true;

        let groups: Vec<(u32, Step)> = self.groups.drain().collect();
        if groups.is_empty() {
            return 0;
        }

        for (pgid, step) in &groups {
            info!("Stopping {} (process group {})", step, pgid);
            signal_group(*pgid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace_period;
        let mut lingering = running_groups(&groups);
        while !lingering.is_empty() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
            lingering = running_groups(&groups);
        }

        for (pgid, step) in &lingering {
            warn!(
                "{} still running {:?} after SIGTERM, killing process group {}",
                step, grace_period, pgid
            );
            signal_group(*pgid, Signal::SIGKILL);
        }
        lingering.len()
    }
}

fn running_groups(groups: &[(u32, Step)]) -> Vec<(u32, Step)> {
    groups
        .iter()
        .copied()
        .filter(|(pgid, _)| group_is_running(*pgid))
        .collect()
}

fn signal_group(pgid: u32, signal: Signal) {
    match signal::kill(Pid::from_raw(-(pgid as i32)), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to send {} to process group {}: {}", signal, pgid, e),
    }
}

/// Whether any member of the group is still running.
///
/// The leader may already be reaped while its `ssh` lives on, so the whole
/// group is checked. `kill(-pgid, 0)` also succeeds for zombies, which is
/// why a hit is confirmed against `/proc`.
fn group_is_running(pgid: u32) -> bool {
    if let Err(Errno::ESRCH) = signal::kill(Pid::from_raw(-(pgid as i32)), None) {
        return false;
    }
    match fs::read_dir("/proc") {
        Ok(entries) => entries.flatten().any(|entry| {
            read_stat(&entry.file_name().to_string_lossy())
                .is_some_and(|stat| stat.pgrp == pgid && stat.is_running())
        }),
        Err(_) => true,
    }
}

/// The two `/proc/<pid>/stat` fields supervision cares about
#[derive(Debug, Clone, Copy)]
struct ProcStat {
    state: char,
    pgrp: u32,
}

impl ProcStat {
    fn is_running(&self) -> bool {
        !matches!(self.state, 'Z' | 'X')
    }
}

fn read_stat(pid: &str) -> Option<ProcStat> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&stat)
}

/// `pid (comm) state ppid pgrp ...`; comm may contain spaces and parens.
fn parse_stat(stat: &str) -> Option<ProcStat> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some(ProcStat { state, pgrp })
}

/// Install the SIGINT/SIGTERM/SIGHUP listener.
///
/// The first signal stops the running step's process group and exits with
/// `128 + signal`, the status a shell reports for an interrupted script.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = Signal::try_from(sig).map(Signal::as_str).unwrap_or("signal");
            warn!("Received {}, stopping the pull", name);

            let killed =
                ChildRegistry::with_global(|registry| registry.terminate_all(SIGNAL_GRACE_PERIOD));
            if killed > 0 {
                warn!("{} process group(s) had to be killed", killed);
            }
            std::process::exit(signal_exit_code(sig));
        }
    });

    Ok(())
}

/// Spawn configuration for step programs
pub trait SupervisedCommand {
    /// Lead a new process group and receive SIGTERM when we die.
    fn supervised(&mut self) -> &mut Self;
}

impl SupervisedCommand for std::process::Command {
    fn supervised(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid and prctl are async-signal-safe and touch no
        // memory shared with the parent.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
                nix::sys::prctl::set_pdeathsig(Signal::SIGTERM)?;
                Ok(())
            });
        }
        self
    }
}
