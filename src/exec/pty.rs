//! PTY-mode launcher, for targets that refuse to run unless their stdout is
//! a terminal (progress bars, password prompts, pagers).
//!
//! The child runs attached to the slave side of a freshly allocated
//! pseudo-terminal while its stderr travels out-of-band through a regular
//! pipe. The parent goes raw and passes its own stdin through to the master
//! so the operator can interact with the child.

use super::{ExecError, LaunchSpec, READ_BUFFER_SIZE};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::{fork, pipe2, setsid, ForkResult};

use std::fs::File;
use std::io::stdin;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

pub(super) fn run(spec: &LaunchSpec) -> Result<i32, ExecError> {
    // capture the attributes of the terminal we were started on; if stdin is
    // not a terminal this mode is unusable and must fail cleanly
    let tty_orig = tcgetattr(stdin()).map_err(ExecError::NotATty)?;
    let mut winsize: libc::winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut winsize) } < 0 {
        return Err(ExecError::NotATty(Errno::last()));
    }

    let mut stdout_log = super::open_log(spec.stdout_log)?;
    let mut stderr_log = super::open_log(spec.stderr_log)?;

    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(ExecError::PtySetup)?;
    grantpt(&master).map_err(ExecError::PtySetup)?;
    unlockpt(&master).map_err(ExecError::PtySetup)?;
    let slave_path = ptsname_r(&master).map_err(ExecError::PtySetup)?;

    let (err_read, err_write) = pipe2(OFlag::O_CLOEXEC).map_err(ExecError::CreatePipe)?;

    match unsafe { fork() }.map_err(ExecError::Fork)? {
        ForkResult::Child => {
            enter_pty_session(&master, &slave_path, &tty_orig, &winsize, &err_write, spec)
        }
        ForkResult::Parent { child } => {
            drop(err_write);

            // raw mode with restore on every return path, including the
            // error propagations below
            let guard = match RawModeGuard::enter(&tty_orig) {
                Ok(guard) => guard,
                Err(e) => {
                    drop(master);
                    drop(err_read);
                    let _ = super::reap(child);
                    return Err(e);
                }
            };

            let pump_result = pump(&master, &err_read, &mut stdout_log, &mut stderr_log);

            drop(master);
            drop(err_read);

            let status = super::reap(child);
            drop(guard);
            pump_result?;
            status
        }
    }
}

/// Child side: new session, slave becomes the controlling terminal and
/// stdin/stdout, stderr is rerouted through the side pipe. Diverges.
fn enter_pty_session(
    master: &PtyMaster,
    slave_path: &str,
    tty_orig: &Termios,
    winsize: &libc::winsize,
    err_write: &OwnedFd,
    spec: &LaunchSpec,
) -> ! {
    if setsid().is_err() {
        eprintln!("rex: setsid failed in pty child");
        unsafe { libc::_exit(1) };
    }

    // the master belongs to the parent
    unsafe { libc::close(master.as_raw_fd()) };

    let slave = match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(slave_path)
    {
        Ok(slave) => slave,
        Err(e) => {
            eprintln!("rex: could not open pty slave '{slave_path}': {e}");
            unsafe { libc::_exit(1) };
        }
    };
    let slave_fd = slave.as_raw_fd();

    // acquire the slave as controlling tty and mirror the parent terminal
    if unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) } == -1 {
        eprintln!("rex: ioctl-TIOCSCTTY failed in pty child");
    }
    if tcsetattr(&slave, SetArg::TCSANOW, tty_orig).is_err() {
        eprintln!("rex: tcsetattr failed in pty child");
    }
    if unsafe { libc::ioctl(slave_fd, libc::TIOCSWINSZ, winsize) } == -1 {
        eprintln!("rex: ioctl-TIOCSWINSZ failed in pty child");
    }

    super::dup2_retry(slave_fd, libc::STDIN_FILENO);
    super::dup2_retry(slave_fd, libc::STDOUT_FILENO);
    super::dup2_retry(slave_fd, libc::STDERR_FILENO);

    // stderr leaves the terminal stream: the side pipe overrides the dup
    // above so it can be logged separately
    super::dup2_retry(err_write.as_raw_fd(), libc::STDERR_FILENO);

    if slave_fd > libc::STDERR_FILENO {
        drop(slave);
    } else {
        std::mem::forget(slave);
    }

    super::exec_child(spec)
}

/// Restores the parent terminal attributes when dropped.
struct RawModeGuard {
    original: Termios,
}

impl RawModeGuard {
    fn enter(original: &Termios) -> Result<Self, ExecError> {
        let mut raw = original.clone();
        cfmakeraw(&mut raw);
        tcsetattr(stdin(), SetArg::TCSAFLUSH, &raw).map_err(ExecError::RawMode)?;
        Ok(Self {
            original: original.clone(),
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = tcsetattr(stdin(), SetArg::TCSAFLUSH, &self.original);
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Endpoint {
    Stdin,
    Master,
    ErrPipe,
}

fn pump(
    master: &PtyMaster,
    err_read: &OwnedFd,
    stdout_log: &mut File,
    stderr_log: &mut File,
) -> Result<(), ExecError> {
    let parent_stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
    let master_fd = unsafe { BorrowedFd::borrow_raw(master.as_raw_fd()) };

    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut stdin_done = false;
    let mut err_done = false;

    'multiplex: loop {
        let mut endpoints = Vec::with_capacity(3);
        let mut fds = Vec::with_capacity(3);
        if !stdin_done {
            endpoints.push(Endpoint::Stdin);
            fds.push(PollFd::new(parent_stdin, PollFlags::POLLIN));
        }
        endpoints.push(Endpoint::Master);
        fds.push(PollFd::new(master_fd, PollFlags::POLLIN));
        if !err_done {
            endpoints.push(Endpoint::ErrPipe);
            fds.push(PollFd::new(err_read.as_fd(), PollFlags::POLLIN));
        }

        let readable = loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ExecError::Poll(e)),
            }
        };
        if readable == 0 {
            break;
        }

        for (index, endpoint) in endpoints.iter().enumerate() {
            let revents = fds[index].revents().unwrap_or(PollFlags::empty());

            if revents.contains(PollFlags::POLLIN) {
                match endpoint {
                    Endpoint::Stdin => match nix::unistd::read(parent_stdin, &mut buf) {
                        Ok(0) => stdin_done = true,
                        Ok(n) => super::write_all_fd(master_fd, &buf[..n])?,
                        Err(Errno::EINTR) => {}
                        Err(e) => return Err(ExecError::Read(e)),
                    },
                    Endpoint::Master => match nix::unistd::read(master_fd, &mut buf) {
                        // EIO is how Linux reports the slave side being gone
                        Ok(0) | Err(Errno::EIO) => break 'multiplex,
                        Ok(n) => super::tee(&buf[..n], stdout_log, super::parent_stdout())?,
                        Err(Errno::EINTR) => {}
                        Err(e) => return Err(ExecError::Read(e)),
                    },
                    Endpoint::ErrPipe => match nix::unistd::read(err_read.as_fd(), &mut buf) {
                        Ok(0) => err_done = true,
                        Ok(n) => super::tee(&buf[..n], stderr_log, super::parent_stderr())?,
                        Err(Errno::EINTR) => {}
                        Err(e) => return Err(ExecError::Read(e)),
                    },
                }
            } else if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                match endpoint {
                    Endpoint::Master => break 'multiplex,
                    Endpoint::ErrPipe => err_done = true,
                    Endpoint::Stdin => stdin_done = true,
                }
            }
        }
    }

    // the master hung up first; pick up whatever stderr is still buffered
    drain_err_pipe(err_read, stderr_log, err_done)
}

fn drain_err_pipe(
    err_read: &OwnedFd,
    stderr_log: &mut File,
    already_done: bool,
) -> Result<(), ExecError> {
    if already_done {
        return Ok(());
    }
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let mut fds = [PollFd::new(err_read.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents.contains(PollFlags::POLLIN) {
                    match nix::unistd::read(err_read.as_fd(), &mut buf) {
                        Ok(0) => return Ok(()),
                        Ok(n) => super::tee(&buf[..n], stderr_log, super::parent_stderr())?,
                        Err(Errno::EINTR) => {}
                        Err(_) => return Ok(()),
                    }
                } else {
                    return Ok(());
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ExecError::Poll(e)),
        }
    }
}
