use std::ffi::CString;

pub struct GroupEntry {
    pub name: String,
    pub gid: nix::unistd::Gid,
}

/// Reentrant lookup of a group entry by groupname, same shape as
/// [`crate::platform::pwnam::getpwnam_r`].
pub fn getgrnam_r(groupname: &str) -> Result<GroupEntry, String> {
    let groupname_cstr = CString::new(groupname)
        .map_err(|_| format!("Groupname contains a NUL byte: {groupname}"))?;
    let mut buf_size = 128;
    let mut group: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();

    loop {
        let mut buf = vec![0 as libc::c_char; buf_size];

        let errno = unsafe {
            libc::getgrnam_r(
                groupname_cstr.as_ptr(),
                &mut group,
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
                return Err(format!("No entry found for groupname: {groupname}"));
            }
        } else {
            return Ok(GroupEntry {
                name: groupname.to_string(),
                gid: nix::unistd::Gid::from_raw(group.gr_gid),
            });
        }
    }
}
