//! Host user/group database lookups and the identity switch applied inside
//! forked children.

pub mod grnam;
pub mod pwnam;

#[derive(Debug)]
pub enum IdentityError {
    NoSuchUser(String),
    NoSuchGroup(String),
    SetgidFailed(String, nix::errno::Errno),
    SetuidFailed(String, nix::errno::Errno),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::NoSuchUser(user) => format!("context user not found: {user}"),
            Self::NoSuchGroup(group) => format!("context group not found: {group}"),
            Self::SetgidFailed(group, e) => format!("setting GID failed for {group}: {e}"),
            Self::SetuidFailed(user, e) => format!("setting UID failed for {user}: {e}"),
        };
        fmt.write_str(msg.as_str())
    }
}

/// Switch the calling process to the given user and group.
///
/// Must only be called inside a forked child. The gid is applied before the
/// uid: once the uid drops, setgid may be refused.
pub fn switch_identity(user: &str, group: &str) -> Result<(), IdentityError> {
    let pwentry = pwnam::getpwnam_r(user)
        .map_err(|_| IdentityError::NoSuchUser(user.to_string()))?;
    let grentry = grnam::getgrnam_r(group)
        .map_err(|_| IdentityError::NoSuchGroup(group.to_string()))?;

    nix::unistd::setgid(grentry.gid)
        .map_err(|e| IdentityError::SetgidFailed(group.to_string(), e))?;
    nix::unistd::setuid(pwentry.uid)
        .map_err(|e| IdentityError::SetuidFailed(user.to_string(), e))?;
    Ok(())
}
