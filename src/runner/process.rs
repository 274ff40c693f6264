//! Child processes: background servers with captured logs, and clients run
//! under a deadline.

use std::{
    io::{self, Read},
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, Receiver},
    time::{Duration, Instant},
};
use tempfile::NamedTempFile;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long output is still collected after a process group was killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(1);

/// A process whose stdout and stderr are appended to a temporary log file.
/// The process is killed when this is dropped.
pub struct BackgroundProcess {
    child: Child,
    log: NamedTempFile,
}

/// Starts `cmd` in a new process group with its output redirected to a
/// fresh temporary log file.
pub fn spawn_in_background(cmd: &mut Command) -> io::Result<BackgroundProcess> {
    let log = NamedTempFile::new()?;
    let child = cmd
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(log.reopen()?)
        .stderr(log.reopen()?)
        .spawn()?;
    #[cfg(feature = "log")]
    tracing::debug!(
        pid = child.id(),
        log = %log.path().display(),
        "started background process"
    );
    Ok(BackgroundProcess { child, log })
}

impl BackgroundProcess {
    /// Process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Path of the log file.
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Everything the process has written so far.
    pub fn read_log(&self) -> io::Result<String> {
        std::fs::read_to_string(self.log.path())
    }

    /// Returns the exit status if the process has already exited.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Kills the process along with anything it forked, and reaps it.
    pub fn kill(&mut self) -> io::Result<()> {
        kill_process_group(&self.child)?;
        self.child.wait().map(drop)
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

/// Result of a process run under a deadline.
#[derive(Debug)]
pub struct Finished {
    /// Exit status, or `None` if the process was killed at the deadline.
    pub status: Option<ExitStatus>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Time from start to exit or kill.
    pub elapsed: Duration,
}

impl Finished {
    /// Whether the process exited successfully before the deadline.
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    /// Whether the process was killed at the deadline.
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

/// Sends SIGKILL to the process group led by `child`.
/// A group that is already gone is not an error.
fn kill_process_group(child: &Child) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: kill(2) takes no pointers; a negative pid names a process group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    match io::Error::last_os_error() {
        e if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
        e => Err(e),
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut out = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut out);
        }
        let _ = tx.send(String::from_utf8_lossy(&out).into_owned());
    });
    rx
}

/// Runs `cmd` to completion in a new process group, capturing its output.
/// If it is still running after `timeout`, the whole group is killed.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> io::Result<Finished> {
    let start = Instant::now();
    let mut child = cmd
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout {
            #[cfg(feature = "log")]
            tracing::warn!(pid = child.id(), ?timeout, "killing process past its deadline");
            kill_process_group(&child)?;
            child.wait()?;
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    // Something that left the group may still hold the pipes open.
    let join = |rx: Receiver<String>| match status {
        Some(_) => rx.recv().unwrap_or_default(),
        None => rx.recv_timeout(DRAIN_AFTER_KILL).unwrap_or_default(),
    };
    Ok(Finished {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
        elapsed: start.elapsed(),
    })
}
