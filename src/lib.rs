mod cgroup;
mod hostname;
mod mounts;
mod probe;
mod runtime;
mod seccomp;
mod socket;
mod syscall;
mod userns;

pub use cgroup::*;
pub use hostname::*;
pub use mounts::*;
pub use probe::*;
pub use runtime::*;
pub use syscall::Pid;
