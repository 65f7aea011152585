use std::convert::Infallible;

use nix::errno::Errno;
use nix::libc::{c_long, syscall, SYS_clone3, SYS_prlimit64};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

use crate::Error;

pub type Pid = nix::unistd::Pid;

#[repr(C, align(8))]
#[derive(Debug, Default)]
pub(crate) struct CloneArgs {
    pub flags: u64,
    pub pidfd: u64,
    pub child_tid: u64,
    pub parent_tid: u64,
    pub exit_signal: u64,
    pub stack: u64,
    pub stack_size: u64,
    pub tls: u64,
    pub set_tid: u64,
    pub set_tid_size: u64,
    pub cgroup: u64,
}

impl CloneArgs {
    pub fn exit_signal(&mut self, signal: Signal) {
        self.exit_signal = signal as u64;
    }

    pub fn flag_newns(&mut self) {
        self.flags |= nix::libc::CLONE_NEWNS as u64;
    }

    pub fn flag_newcgroup(&mut self) {
        self.flags |= nix::libc::CLONE_NEWCGROUP as u64;
    }

    pub fn flag_newpid(&mut self) {
        self.flags |= nix::libc::CLONE_NEWPID as u64;
    }

    pub fn flag_newipc(&mut self) {
        self.flags |= nix::libc::CLONE_NEWIPC as u64;
    }

    pub fn flag_newnet(&mut self) {
        self.flags |= nix::libc::CLONE_NEWNET as u64;
    }

    pub fn flag_newuts(&mut self) {
        self.flags |= nix::libc::CLONE_NEWUTS as u64;
    }
}

pub(crate) enum CloneResult {
    Child,
    Parent { child: Pid },
}

pub(crate) unsafe fn clone3(cl_args: &CloneArgs) -> Result<CloneResult, Errno> {
    let res = syscall(
        SYS_clone3,
        cl_args as *const CloneArgs,
        core::mem::size_of::<CloneArgs>(),
    );
    Errno::result(res).map(|v| match v {
        0 => CloneResult::Child,
        v => CloneResult::Parent {
            child: Pid::from_raw(v as nix::libc::pid_t),
        },
    })
}

/// Pins both the soft and hard file descriptor limit of another process.
pub(crate) fn set_rlimit_nofile(pid: Pid, limit: u64) -> Result<(), Errno> {
    let rlim = nix::libc::rlimit64 {
        rlim_cur: limit,
        rlim_max: limit,
    };
    let res = unsafe {
        syscall(
            SYS_prlimit64,
            pid.as_raw(),
            nix::libc::RLIMIT_NOFILE as c_long,
            &rlim as *const nix::libc::rlimit64,
            std::ptr::null_mut::<nix::libc::rlimit64>(),
        )
    };
    Errno::result(res).map(drop)
}

/// Required before an unprivileged process may load a seccomp filter.
pub(crate) fn set_no_new_privs() -> Result<(), Errno> {
    let res = unsafe { nix::libc::prctl(nix::libc::PR_SET_NO_NEW_PRIVS, 1u64, 0u64, 0u64, 0u64) };
    Errno::result(res).map(drop)
}

pub(crate) fn exit_child(result: Result<Infallible, Error>) -> ! {
    match result {
        Ok(never) => match never {},
        Err(err) => {
            log::error!("Container setup failed: {err}");
            unsafe { nix::libc::_exit(-1) }
        }
    }
}

/// Child pid that is killed and reaped unless handed over to `wait`.
pub(crate) struct ChildGuard(Option<Pid>);

impl ChildGuard {
    pub fn new(pid: Pid) -> Self {
        Self(Some(pid))
    }

    pub fn pid(&self) -> Pid {
        self.0.unwrap()
    }

    pub fn wait(mut self) -> Result<WaitStatus, Errno> {
        waitpid(self.0.take().unwrap(), Some(WaitPidFlag::__WALL))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.0.take() {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, Some(WaitPidFlag::__WALL));
        }
    }
}

pub(crate) fn ignore_kind(
    result: std::io::Result<()>,
    kind: std::io::ErrorKind,
) -> std::io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.kind() == kind {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}
