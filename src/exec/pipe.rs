//! Pipe-mode launcher: child stdout/stderr each travel through an anonymous
//! pipe, the parent multiplexes both and tees every chunk to its own
//! terminal and to the per-task log files.

use super::{ExecError, LaunchSpec, READ_BUFFER_SIZE};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::{fork, pipe2, ForkResult};

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

pub(super) fn run(spec: &LaunchSpec) -> Result<i32, ExecError> {
    // log files are opened before the fork so a failure is still a clean
    // parent-side error
    let mut stdout_log = super::open_log(spec.stdout_log)?;
    let mut stderr_log = super::open_log(spec.stderr_log)?;

    let (out_read, out_write) = pipe2(OFlag::O_CLOEXEC).map_err(ExecError::CreatePipe)?;
    let (err_read, err_write) = pipe2(OFlag::O_CLOEXEC).map_err(ExecError::CreatePipe)?;

    match unsafe { fork() }.map_err(ExecError::Fork)? {
        ForkResult::Child => {
            super::dup2_retry(out_write.as_raw_fd(), libc::STDOUT_FILENO);
            super::dup2_retry(err_write.as_raw_fd(), libc::STDERR_FILENO);
            // the duplicated descriptors survive, the originals must not
            drop(out_read);
            drop(out_write);
            drop(err_read);
            drop(err_write);
            super::exec_child(spec)
        }
        ForkResult::Parent { child } => {
            drop(out_write);
            drop(err_write);

            let pump_result = pump(&out_read, &err_read, &mut stdout_log, &mut stderr_log);

            // close our pipe ends before reaping so a child blocked on a
            // full pipe after a parent-side error still terminates
            drop(out_read);
            drop(err_read);

            let status = super::reap(child);
            pump_result?;
            status
        }
    }
}

fn pump(
    out_read: &OwnedFd,
    err_read: &OwnedFd,
    stdout_log: &mut File,
    stderr_log: &mut File,
) -> Result<(), ExecError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        let mut is_err_stream_tags = Vec::with_capacity(2);
        let mut fds = Vec::with_capacity(2);
        if !out_done {
            is_err_stream_tags.push(false);
            fds.push(PollFd::new(out_read.as_fd(), PollFlags::POLLIN));
        }
        if !err_done {
            is_err_stream_tags.push(true);
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

        for (index, is_err_stream) in is_err_stream_tags.iter().enumerate() {
            let revents = fds[index].revents().unwrap_or(PollFlags::empty());
            let done = if *is_err_stream {
                &mut err_done
            } else {
                &mut out_done
            };

            if revents.contains(PollFlags::POLLIN) {
                let endpoint = if *is_err_stream { err_read } else { out_read };
                match nix::unistd::read(endpoint.as_fd(), &mut buf) {
                    Ok(0) => *done = true,
                    Ok(n) => {
                        if *is_err_stream {
                            super::tee(&buf[..n], stderr_log, super::parent_stderr())?;
                        } else {
                            super::tee(&buf[..n], stdout_log, super::parent_stdout())?;
                        }
                    }
                    Err(Errno::EINTR) => {}
                    Err(e) => return Err(ExecError::Read(e)),
                }
            } else if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                *done = true;
            }
        }
    }

    Ok(())
}
