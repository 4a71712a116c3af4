//! The child-process launchers.
//!
//! Two variants share one outcome type: pipe mode captures stdout/stderr
//! through two anonymous pipes, PTY mode attaches the child to a
//! pseudo-terminal for programs that refuse to run without one. Both tee
//! every byte the child produces to the parent's own stdout/stderr and to
//! per-task log files.

mod pipe;
mod pty;
mod shape;

pub use shape::{shape, ShapeError};

use log::trace;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use std::ffi::CString;
use std::io::Write;
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};

/// Sentinel returned when the child was terminated by a signal instead of
/// exiting normally.
pub const ABNORMAL_EXIT: i32 = -617;

/// Bounded read size for the tee loops.
pub const READ_BUFFER_SIZE: usize = 2048;

/// Identity the child switches to after fork, before exec.
#[derive(Clone, Debug)]
pub struct IdentityContext {
    pub user: String,
    pub group: String,
}

/// Everything a launcher needs for one child execution.
pub struct LaunchSpec<'a> {
    pub argv: &'a [CString],
    pub stdout_log: &'a Path,
    pub stderr_log: &'a Path,
    pub identity: Option<&'a IdentityContext>,
    pub clear_environment: bool,
}

/// The two dispatch variants. Selected per unit via `force_pty`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Launcher {
    Pipe,
    Pty,
}

impl Launcher {
    pub fn for_unit(force_pty: bool) -> Self {
        if force_pty {
            Self::Pty
        } else {
            Self::Pipe
        }
    }

    /// Run the child to completion. Returns its exit status (0-255), or
    /// [`ABNORMAL_EXIT`] if it was killed by a signal.
    pub fn run(&self, spec: &LaunchSpec) -> Result<i32, ExecError> {
        if spec.argv.is_empty() {
            return Err(ExecError::EmptyArgv);
        }
        trace!("Launching ({self:?}): {:?}", spec.argv);
        match self {
            Self::Pipe => pipe::run(spec),
            Self::Pty => pty::run(spec),
        }
    }
}

#[derive(Debug)]
pub enum ExecError {
    EmptyArgv,
    OpenLog(PathBuf, std::io::Error),
    CreatePipe(Errno),
    Fork(Errno),
    Poll(Errno),
    Read(Errno),
    TerminalWrite(Errno),
    LogWrite(std::io::Error),
    Wait(Errno),
    NotATty(Errno),
    PtySetup(Errno),
    RawMode(Errno),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::EmptyArgv => "Refusing to launch an empty argv".to_string(),
            Self::OpenLog(path, e) => {
                format!("Could not open log file '{}': {e}", path.display())
            }
            Self::CreatePipe(e) => format!("Could not create pipe: {e}"),
            Self::Fork(e) => format!("Fork failed: {e}"),
            Self::Poll(e) => format!("Poll failed: {e}"),
            Self::Read(e) => format!("Read from child failed: {e}"),
            Self::TerminalWrite(e) => format!("Write to terminal failed: {e}"),
            Self::LogWrite(e) => format!("Write to log file failed: {e}"),
            Self::Wait(e) => format!("Could not reap child: {e}"),
            Self::NotATty(e) => {
                format!("PTY mode requires the caller to be attached to a terminal: {e}")
            }
            Self::PtySetup(e) => format!("Could not allocate pseudo-terminal: {e}"),
            Self::RawMode(e) => format!("Could not put terminal into raw mode: {e}"),
        };
        fmt.write_str(msg.as_str())
    }
}

/// Open a log file append-create, before any fork happens.
pub(crate) fn open_log(path: &Path) -> Result<std::fs::File, ExecError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ExecError::OpenLog(path.to_path_buf(), e))
}

/// Duplicate `oldfd` onto `newfd`, retrying on interrupt.
pub(crate) fn dup2_retry(oldfd: libc::c_int, newfd: libc::c_int) {
    while unsafe { libc::dup2(oldfd, newfd) } == -1 && Errno::last() == Errno::EINTR {}
}

/// Write the whole buffer to a raw descriptor, retrying partial writes and
/// interrupts until every byte is out.
pub(crate) fn write_all_fd(fd: BorrowedFd, mut buf: &[u8]) -> Result<(), ExecError> {
    while !buf.is_empty() {
        match nix::unistd::write(fd, buf) {
            Ok(0) => return Err(ExecError::TerminalWrite(Errno::EIO)),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) => return Err(ExecError::TerminalWrite(e)),
        }
    }
    Ok(())
}

/// Tee one chunk of child output: fully into the log file, fully onto the
/// parent's terminal descriptor.
pub(crate) fn tee(
    chunk: &[u8],
    log: &mut std::fs::File,
    terminal: BorrowedFd,
) -> Result<(), ExecError> {
    log.write_all(chunk).map_err(ExecError::LogWrite)?;
    write_all_fd(terminal, chunk)
}

/// Final child-side steps shared by both launchers: optional environment
/// clear, optional identity switch, exec. Diverges; the child never returns
/// to the caller.
pub(crate) fn exec_child(spec: &LaunchSpec) -> ! {
    if spec.clear_environment {
        // between fork and exec, and allocation-free on purpose
        unsafe { libc::clearenv() };
    }

    if let Some(identity) = spec.identity {
        if let Err(e) = crate::platform::switch_identity(&identity.user, &identity.group) {
            eprintln!("rex: aborting launch: {e}");
            unsafe { libc::_exit(1) };
        }
    }

    if let Err(e) = nix::unistd::execvp(&spec.argv[0], spec.argv) {
        eprintln!("rex: failed on execvp in child: {e}");
    }
    unsafe { libc::_exit(127) };
}

/// Wait for the child and translate its status into the shared outcome.
pub(crate) fn reap(child: Pid) -> Result<i32, ExecError> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, _, _)) => return Ok(ABNORMAL_EXIT),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ExecError::Wait(e)),
        }
    }
}

pub(crate) fn parent_stdout() -> BorrowedFd<'static> {
    // stdout of the parent process outlives every launch
    unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) }
}

pub(crate) fn parent_stderr() -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(libc::STDERR_FILENO) }
}
