use std::convert::Infallible;
use std::ffi::CString;
use std::path::PathBuf;

use nix::unistd::{execvp, sethostname};
use uuid::Uuid;

use crate::mounts::{cleanup_stage, setup_rootfs, stage_path, BindMount};
use crate::socket::{ChildEnd, ParentEnd, SetupSocket, PROCEED, STATUS_FAIL, STATUS_OK};
use crate::syscall::{
    clone3, exit_child, set_rlimit_nofile, ChildGuard, CloneArgs, CloneResult, Pid,
};
use crate::userns::{drop_identity, unshare_user_namespace, write_id_maps};
use crate::{check_host, random_hostname, seccomp, CgroupScope};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Signal = nix::sys::signal::Signal;
pub type WaitStatus = nix::sys::wait::WaitStatus;

const NOFILE_LIMIT: u64 = 64;

/// Builder for a container run.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOptions {
    command: String,
    args: Vec<String>,
    uid: u32,
    root: Option<PathBuf>,
    volumes: Vec<BindMount>,
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn command(mut self, command: impl ToString) -> Self {
        self.command = command.to_string();
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// User and group id the command runs as inside the container.
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// Host directory used as the container root filesystem.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Adds a bind mount; the target is taken relative to the new root.
    pub fn add_volume(mut self, source: impl Into<PathBuf>, target: impl ToString) -> Self {
        self.volumes.push(BindMount {
            source: source.into(),
            target: target.to_string(),
        });
        self
    }

    pub fn build(self) -> Result<Runtime, Error> {
        if self.command.is_empty() {
            Err("Container command should be specified")?
        }
        let root = self.root.ok_or("Container root should be specified")?;
        if !root.is_absolute() {
            Err("Container root should be an absolute path")?
        }
        let mut volumes: Vec<BindMount> = Vec::with_capacity(self.volumes.len());
        for volume in self.volumes {
            if !volume.source.is_absolute() {
                Err(format!(
                    "Volume source should be an absolute path: {:?}",
                    volume.source
                ))?
            }
            let target = volume.target.trim_start_matches('/').to_string();
            if target.is_empty() {
                Err("Volume target should not be empty")?
            }
            if volumes.iter().any(|v| v.target == target) {
                Err(format!("Duplicate volume target: {target}"))?
            }
            volumes.push(BindMount {
                source: volume.source,
                target,
            });
        }
        Ok(Runtime {
            command: self.command,
            args: self.args,
            uid: self.uid,
            root,
            volumes,
            hostname: random_hostname(),
            run_id: Uuid::new_v4().to_string(),
        })
    }
}

/// One container run, immutable once built.
#[derive(Debug)]
pub struct Runtime {
    command: String,
    args: Vec<String>,
    uid: u32,
    root: PathBuf,
    volumes: Vec<BindMount>,
    hostname: String,
    run_id: String,
}

impl Runtime {
    pub fn options() -> RuntimeOptions {
        RuntimeOptions::new()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Host path the new root is staged under while the container runs.
    pub fn staging_path(&self) -> PathBuf {
        stage_path(&self.run_id)
    }

    /// Runs the container and returns the child's wait status.
    pub fn run(&self) -> Result<WaitStatus, Error> {
        check_host()?;
        let (parent, child_end) = SetupSocket::create()?;
        let mut clone_args = CloneArgs::default();
        clone_args.exit_signal(Signal::SIGCHLD);
        clone_args.flag_newns();
        clone_args.flag_newcgroup();
        clone_args.flag_newpid();
        clone_args.flag_newipc();
        clone_args.flag_newnet();
        clone_args.flag_newuts();
        match unsafe { clone3(&clone_args) }.map_err(|v| format!("Cannot spawn container: {v}"))? {
            CloneResult::Child => {
                drop(parent);
                exit_child(self.child_entry(child_end))
            }
            CloneResult::Parent { child } => {
                drop(child_end);
                log::debug!("Spawned container with PID {child}");
                self.run_parent(parent, ChildGuard::new(child))
            }
        }
    }

    fn run_parent(&self, mut socket: ParentEnd, child: ChildGuard) -> Result<WaitStatus, Error> {
        set_rlimit_nofile(child.pid(), NOFILE_LIMIT)
            .map_err(|v| format!("Cannot apply file descriptor limit: {v}"))?;
        let cgroup = match self.setup_cgroup(child.pid()) {
            Ok(scope) => Some(scope),
            Err(err) => {
                log::debug!("Skipping cgroup limits: {err}");
                None
            }
        };
        // Register staging cleanup only once the child reports a mounted root.
        let staging = match socket.recv_status() {
            STATUS_OK => Some(StagingGuard {
                run_id: self.run_id.clone(),
            }),
            _ => {
                log::error!("Container failed to mount its root filesystem");
                None
            }
        };
        // The identity maps must be written from outside the new user
        // namespace, while the child blocks on the proceed token.
        let mut map_error = None;
        match socket.recv_status() {
            STATUS_OK => match write_id_maps(child.pid()) {
                Ok(()) => log::debug!("Mapped UID/GID range for PID {}", child.pid()),
                Err(err) => map_error = Some(format!("Cannot write identity maps: {err}")),
            },
            _ => log::debug!("Container runs without a user namespace"),
        }
        // Unlock the child even when mapping failed, otherwise it blocks forever.
        if let Err(err) = socket.send(PROCEED) {
            log::debug!("Container closed the setup socket: {err}");
        }
        let status = child
            .wait()
            .map_err(|v| format!("Cannot wait for container: {v}"))?;
        log::info!("Container exited with status {status:?}");
        drop(staging);
        drop(cgroup);
        match map_error {
            Some(err) => Err(err.into()),
            None => Ok(status),
        }
    }

    fn setup_cgroup(&self, pid: Pid) -> Result<CgroupScope, Error> {
        let scope = CgroupScope::new(self.hostname.as_str())?;
        scope.create()?;
        scope.add_process(pid)?;
        Ok(scope)
    }

    fn child_entry(&self, mut socket: ChildEnd) -> Result<Infallible, Error> {
        log::info!(
            "Starting container with command: {} {}",
            self.command,
            self.args.join(" ")
        );
        sethostname(&self.hostname).map_err(|v| format!("Cannot set hostname: {v}"))?;
        match setup_rootfs(&self.run_id, &self.root, &self.volumes) {
            Ok(()) => socket.send(STATUS_OK)?,
            Err(err) => {
                // A failed mount leaves nothing behind; the parent skips cleanup.
                let _ = cleanup_stage(&self.run_id);
                socket.send(STATUS_FAIL)?;
                return Err(format!("Cannot setup mount namespace: {err}").into());
            }
        }
        match unshare_user_namespace() {
            Ok(()) => {
                log::debug!("Unshared user namespace");
                socket.send(STATUS_OK)?;
            }
            Err(err) => {
                log::debug!("Unsharing user namespace is not supported: {err}");
                socket.send(STATUS_FAIL)?;
            }
        }
        let token = socket
            .recv()
            .map_err(|v| format!("Cannot read proceed token: {v}"))?;
        if token != PROCEED {
            return Err(format!("Unexpected proceed token: {token:#x}").into());
        }
        drop_identity(self.uid).map_err(|v| format!("Cannot drop privileges: {v}"))?;
        log::debug!("Dropped to UID/GID {}", self.uid);
        // The handshake is over; the socket must not leak into the command.
        drop(socket);
        seccomp::install_policy()?;
        self.exec_command()
    }

    fn exec_command(&self) -> Result<Infallible, Error> {
        let argv = Result::<Vec<_>, _>::from_iter(
            std::iter::once(&self.command)
                .chain(self.args.iter())
                .map(|v| CString::new(v.as_bytes())),
        )?;
        Ok(execvp(&argv[0], &argv)?)
    }
}

/// Removes the staging directory when the run completes.
struct StagingGuard {
    run_id: String,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(err) = cleanup_stage(&self.run_id) {
            log::error!("Cannot remove staging directory: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RuntimeOptions {
        Runtime::options().command("/bin/true").root("/tmp/rootfs")
    }

    #[test]
    fn build_requires_a_command_and_root() {
        assert!(RuntimeOptions::new().root("/tmp/rootfs").build().is_err());
        assert!(RuntimeOptions::new().command("/bin/true").build().is_err());
        assert!(options().build().is_ok());
    }

    #[test]
    fn build_rejects_relative_roots() {
        assert!(Runtime::options()
            .command("/bin/true")
            .root("rootfs")
            .build()
            .is_err());
    }

    #[test]
    fn volume_targets_are_normalized() {
        let runtime = options()
            .add_volume("/srv/data", "/data/input")
            .build()
            .unwrap();
        assert_eq!(runtime.volumes[0].target, "data/input");
    }

    #[test]
    fn build_rejects_malformed_volumes() {
        assert!(options().add_volume("srv/data", "data").build().is_err());
        assert!(options().add_volume("/srv/data", "/").build().is_err());
        assert!(options()
            .add_volume("/srv/a", "/data")
            .add_volume("/srv/b", "data")
            .build()
            .is_err());
    }

    #[test]
    fn runs_get_unique_staging_paths() {
        let first = options().build().unwrap();
        let second = options().build().unwrap();
        assert!(first
            .staging_path()
            .to_str()
            .unwrap()
            .starts_with("/tmp/carton."));
        assert_ne!(first.staging_path(), second.staging_path());
    }
}
