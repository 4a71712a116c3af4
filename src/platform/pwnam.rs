use std::ffi::CString;

pub struct PasswdEntry {
    pub name: String,
    pub uid: nix::unistd::Uid,
}

/// Reentrant lookup of a passwd entry by username. The buffer is grown on
/// ERANGE until glibc accepts it.
pub fn getpwnam_r(username: &str) -> Result<PasswdEntry, String> {
    let username_cstr = CString::new(username)
        .map_err(|_| format!("Username contains a NUL byte: {username}"))?;
    let mut buf_size = 128;
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    loop {
        let mut buf = vec![0 as libc::c_char; buf_size];

        let errno = unsafe {
            libc::getpwnam_r(
                username_cstr.as_ptr(),
                &mut passwd,
                buf.as_mut_ptr(),
                buf_size,
                &mut result,
            )
        };

        if result.is_null() {
            if errno == libc::ERANGE {
                // need more bytes in buf
                buf_size *= 2;
            } else {
                return Err(format!("No entry found for username: {username}"));
            }
        } else {
            return Ok(PasswdEntry {
                name: username.to_string(),
                uid: nix::unistd::Uid::from_raw(passwd.pw_uid),
            });
        }
    }
}
