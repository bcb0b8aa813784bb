use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Process, Signal, System};
use tracing::{debug, info, warn};

pub const SERVE_COMMAND: &str = "serve";

/// Stops every running daemon started from `exe` and returns the arguments each one was started
/// with, so the caller can bring them back later.
pub fn kill_previous_servers(exe: &Path) -> Result<Vec<Vec<OsString>>> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't determine own pid: {e}"))?;
    let mut stopped = vec![];
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }
        if !is_server(process, exe) {
            continue;
        }

        info!("Stopping daemon {pid}");
        // This will forcefully terminate the process on Windows. Anything better will require a
        // lot more work.
        if !terminated(process.kill_with(Signal::Term), || process.kill()) {
            warn!("Failed to stop daemon {pid}, leaving it running");
            continue;
        }
        process.wait();
        stopped.push(process.cmd().iter().skip(1).cloned().collect());
    }
    Ok(stopped)
}

/// Whether the process is on its way out: the graceful signal was delivered, or the forced kill
/// it falls back to went through.
fn terminated(signalled: Option<bool>, kill: impl FnOnce() -> bool) -> bool {
    matches!(signalled, Some(true)) || kill()
}

fn is_server(process: &Process, exe: &Path) -> bool {
    process
        .exe()
        .filter(|v| v.exists())
        .is_some_and(|v| v == exe)
        && process.cmd().iter().any(|arg| arg == SERVE_COMMAND)
}

/// Turns the arguments of an `init` invocation into the arguments of the daemon it starts.
pub fn serve_args(args: impl IntoIterator<Item = OsString>, from: &str) -> Vec<OsString> {
    let mut replaced = false;
    args.into_iter()
        .map(|arg| {
            if !replaced && arg == from {
                replaced = true;
                OsString::from(SERVE_COMMAND)
            } else {
                arg
            }
        })
        .collect()
}

/// Starts a daemon as a detached process that outlives the cli.
pub fn spawn_server<I, S>(exe: &Path, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = std::process::Command::new(exe);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[allow(clippy::zombie_processes)]
    let child = command.spawn()?;
    debug!("Spawned daemon {}", child.id());
    Ok(())
}

/// Intended for shutting down previous servers and starting a new one with `args`.
pub fn restart_server(exe: &Path, args: &[OsString]) -> Result<()> {
    kill_previous_servers(exe)?;
    spawn_server(exe, args)
}
