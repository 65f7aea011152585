use std::fs::{create_dir, remove_dir, File};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use crate::syscall::{ignore_kind, Pid};
use crate::Error;

const CGROUP_MOUNT: &str = "/sys/fs/cgroup";
const CGROUP_PROCS: &str = "cgroup.procs";

const CPU_SHARES: u64 = 256;
const MEMORY_LIMIT: u64 = 1 << 30;
const PIDS_MAX: u64 = 64;
const BLKIO_WEIGHT: u64 = 50;

/// Controller directories and the limit files written into each.
const CONTROLLERS: [(&str, &[(&str, u64)]); 4] = [
    ("cpu", &[("cpu.shares", CPU_SHARES)]),
    (
        "memory",
        &[
            ("memory.limit_in_bytes", MEMORY_LIMIT),
            ("memory.kmem.limit_in_bytes", MEMORY_LIMIT),
        ],
    ),
    ("pids", &[("pids.max", PIDS_MAX)]),
    ("blkio", &[("blkio.weight", BLKIO_WEIGHT)]),
];

/// Cgroup-v1 scope carrying one run's resource caps, named by its hostname.
///
/// Best effort: hosts without the v1 hierarchy fail `create` and the run
/// simply proceeds without resource caps.
#[derive(Debug)]
pub struct CgroupScope {
    mount_path: PathBuf,
    name: String,
}

impl CgroupScope {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        Self::with_mount_path(CGROUP_MOUNT, name)
    }

    fn with_mount_path(
        mount_path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Result<Self, Error> {
        let mount_path = mount_path.into();
        if !mount_path.is_absolute() {
            Err("Cgroup mount path should be absolute")?
        }
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            Err("Cgroup name should be a single path component")?
        }
        Ok(Self { mount_path, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn controller_path(&self, controller: &str) -> PathBuf {
        self.mount_path.join(controller).join(&self.name)
    }

    /// Creates the controller groups and writes the limit files.
    pub fn create(&self) -> Result<(), Error> {
        for (controller, limits) in CONTROLLERS {
            let path = self.controller_path(controller);
            ignore_kind(create_dir(&path), ErrorKind::AlreadyExists)?;
            for &(file, value) in limits {
                write_control(&path.join(file), &value.to_string())?;
            }
        }
        Ok(())
    }

    /// Moves a process into every controller group.
    pub fn add_process(&self, pid: Pid) -> Result<(), Error> {
        for (controller, _) in CONTROLLERS {
            write_control(
                &self.controller_path(controller).join(CGROUP_PROCS),
                &pid.to_string(),
            )?;
        }
        Ok(())
    }

    /// Removes the controller groups; attached processes must have exited.
    pub fn remove(&self) -> Result<(), Error> {
        for (controller, _) in CONTROLLERS {
            ignore_kind(
                remove_dir(self.controller_path(controller)),
                ErrorKind::NotFound,
            )?;
        }
        Ok(())
    }
}

impl Drop for CgroupScope {
    fn drop(&mut self) {
        let _ = self.remove();
    }
}

fn write_control(path: &Path, value: &str) -> Result<(), Error> {
    Ok(File::options()
        .create(false)
        .write(true)
        .truncate(false)
        .open(path)?
        .write_all(value.as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_mount_paths() {
        assert!(CgroupScope::with_mount_path("sys/fs/cgroup", "carton").is_err());
    }

    #[test]
    fn rejects_nested_names() {
        assert!(CgroupScope::new("amber/falcon").is_err());
        assert!(CgroupScope::new("").is_err());
    }

    #[test]
    fn controller_paths_are_namespaced_by_name() {
        let scope = CgroupScope::with_mount_path("/sys/fs/cgroup", "amber-falcon-7").unwrap();
        assert_eq!(
            scope.controller_path("cpu"),
            PathBuf::from("/sys/fs/cgroup/cpu/amber-falcon-7")
        );
        assert_eq!(
            scope.controller_path("blkio"),
            PathBuf::from("/sys/fs/cgroup/blkio/amber-falcon-7")
        );
    }
}
