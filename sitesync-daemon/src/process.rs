//! Unix process primitives: pidfile, liveness, fork/session, stream redirection.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{io_err, os_err, DaemonError};
use crate::paths::{stderr_log_path, stdout_log_path};

/// Read the pid recorded in `path`. `Ok(None)` when there is no pidfile.
pub fn read_pidfile(path: &Path) -> Result<Option<i32>, DaemonError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    // pid 0 and negative pids address process groups in kill(2).
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(DaemonError::MalformedPidfile {
            path: path.to_path_buf(),
            content,
        }),
    }
}

/// Write `<pid>\n` to `path` (mode 0644).
pub fn write_pidfile(path: &Path, pid: u32) -> Result<(), DaemonError> {
    fs::write(path, format!("{pid}\n")).map_err(|e| io_err(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(|e| io_err(path, e))
}

/// Remove `path`; returns whether a file was actually removed.
pub fn remove_pidfile(path: &Path) -> Result<bool, DaemonError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Whether `pid` refers to a live process (one we may not be allowed to signal counts).
pub fn process_alive(pid: i32) -> Result<bool, DaemonError> {
    if unsafe { libc::kill(pid, 0) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Ok(true),
        _ => Err(DaemonError::ProcessControl {
            operation: "probe process liveness",
            source: err,
        }),
    }
}

/// Send SIGTERM to `pid`. `Ok(false)` once the process no longer exists.
pub fn terminate(pid: i32) -> Result<bool, DaemonError> {
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(DaemonError::ProcessControl {
        operation: "send SIGTERM",
        source: err,
    })
}

/// SIGKILL every process in group `pgid`. A group that is already gone is
/// not an error.
pub fn kill_process_group(pgid: i32) {
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, error = %err, "failed to kill process group");
        }
    }
}

/// Fork; the parent exits with status 0 and only the child returns.
pub(crate) fn fork_and_exit_parent(operation: &'static str) -> Result<(), DaemonError> {
    // Flush so buffered output is not emitted twice.
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    match unsafe { libc::fork() } {
        -1 => Err(os_err(operation)),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

/// Become leader of a new session, dropping the controlling terminal.
pub(crate) fn new_session() -> Result<(), DaemonError> {
    if unsafe { libc::setsid() } == -1 {
        return Err(os_err("setsid"));
    }
    Ok(())
}

pub(crate) fn reset_umask() {
    unsafe {
        libc::umask(0);
    }
}

/// stdin from `/dev/null`, stdout/stderr appended to the daemon logs.
pub(crate) fn redirect_standard_streams(working_dir: &Path) -> Result<(), DaemonError> {
    let null = Path::new("/dev/null");
    let stdin = File::open(null).map_err(|e| io_err(null, e))?;
    dup_onto(&stdin, libc::STDIN_FILENO, "redirect stdin")?;
    reopen_log_streams(working_dir)
}

/// Point stdout/stderr at fresh handles on the daemon log files.
///
/// Also used after log rotation, when the old descriptors still reference
/// the renamed files.
pub(crate) fn reopen_log_streams(working_dir: &Path) -> Result<(), DaemonError> {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let stdout = open_append(&stdout_log_path(working_dir))?;
    let stderr = open_append(&stderr_log_path(working_dir))?;
    dup_onto(&stdout, libc::STDOUT_FILENO, "redirect stdout")?;
    dup_onto(&stderr, libc::STDERR_FILENO, "redirect stderr")
}

fn open_append(path: &Path) -> Result<File, DaemonError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}

fn dup_onto(file: &File, target: libc::c_int, operation: &'static str) -> Result<(), DaemonError> {
    if unsafe { libc::dup2(file.as_raw_fd(), target) } == -1 {
        return Err(os_err(operation));
    }
    Ok(())
}
