use std::fs::File;
use std::io::Write as _;

use nix::sched::{unshare, CloneFlags};
use nix::unistd::{setgid, setgroups, setuid, Gid, Uid};

use crate::syscall::Pid;
use crate::Error;

/// Identity mapping from the container namespace to the host.
#[derive(Clone, Copy, Debug)]
pub(crate) struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

/// Container root maps onto a fixed unprivileged host range.
pub(crate) const ID_MAP: IdMap = IdMap {
    container_id: 0,
    host_id: 10000,
    size: 2000,
};

impl IdMap {
    fn line(&self) -> String {
        format!("{} {} {}\n", self.container_id, self.host_id, self.size)
    }
}

/// Moves the calling process into a fresh user namespace.
pub(crate) fn unshare_user_namespace() -> Result<(), Error> {
    Ok(unshare(CloneFlags::CLONE_NEWUSER)?)
}

/// Writes the uid and gid maps of a child that just unshared its user
/// namespace. Must run outside that namespace, while the child waits.
pub(crate) fn write_id_maps(pid: Pid) -> Result<(), Error> {
    write_map(&format!("/proc/{pid}/uid_map"), ID_MAP)?;
    write_map(&format!("/proc/{pid}/gid_map"), ID_MAP)?;
    Ok(())
}

fn write_map(path: &str, map: IdMap) -> Result<(), Error> {
    let mut file = File::options().write(true).open(path)?;
    Ok(file.write_all(map.line().as_bytes())?)
}

/// Drops to the target identity: supplementary groups, gid, then uid.
pub(crate) fn drop_identity(uid: u32) -> Result<(), Error> {
    let gid = Gid::from_raw(uid);
    setgroups(&[gid]).map_err(|v| format!("Cannot set groups: {v}"))?;
    setgid(gid).map_err(|v| format!("Cannot set group: {v}"))?;
    Ok(setuid(Uid::from_raw(uid)).map_err(|v| format!("Cannot set user: {v}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_map_line_is_fixed() {
        assert_eq!(ID_MAP.line(), "0 10000 2000\n");
    }
}
