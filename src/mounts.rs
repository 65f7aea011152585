use std::fs::{create_dir_all, remove_dir_all};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::chdir;
use uuid::Uuid;

use crate::syscall::ignore_kind;
use crate::Error;

const STAGE_PREFIX: &str = "/tmp/carton.";
const OLD_ROOT_PREFIX: &str = "/oldroot.";

/// Additional host directory exposed inside the container.
#[derive(Clone, Debug)]
pub struct BindMount {
    pub source: PathBuf,
    /// Path relative to the new root.
    pub target: String,
}

/// Host path the new root is staged under for one run.
pub(crate) fn stage_path(run_id: &str) -> PathBuf {
    PathBuf::from(format!("{STAGE_PREFIX}{run_id}"))
}

/// Stages the new root, applies bind mounts and pivots into it.
pub(crate) fn setup_rootfs(
    run_id: &str,
    root_src: &Path,
    volumes: &[BindMount],
) -> Result<(), Error> {
    let root = stage_path(run_id);
    create_dir_all(&root)?;
    log::debug!("Created root directory {root:?}");
    bind_private(root_src, &root)?;
    log::debug!("Mounted {root_src:?} to {root:?}");
    for volume in volumes {
        let target = root.join(&volume.target);
        create_dir_all(&target)?;
        bind_private(&volume.source, &target)?;
        log::debug!("Mounted volume {:?} to {target:?}", volume.source);
    }
    let suffix = Uuid::new_v4().to_string();
    let old_root = PathBuf::from(format!("{}{OLD_ROOT_PREFIX}{suffix}", root.display()));
    create_dir_all(&old_root)?;
    log::debug!("Created old root directory {old_root:?}");
    nix::unistd::pivot_root(&root, &old_root)?;
    log::debug!("Pivoted root to {root:?}");
    chdir("/")?;
    let detached = PathBuf::from(format!("{OLD_ROOT_PREFIX}{suffix}"));
    umount2(&detached, MntFlags::MNT_DETACH)?;
    remove_dir_all(&detached)?;
    log::debug!("Unmounted old root");
    log::info!("Mount {root_src:?} => {root:?} => /");
    Ok(())
}

fn bind_private(source: &Path, target: &Path) -> Result<(), Error> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )?;
    // Disable propagation so the mount never reaches the original mount table.
    mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_PRIVATE,
        None::<&str>,
    )?;
    Ok(())
}

/// Removes the staging directory for one run; a missing directory is fine.
pub(crate) fn cleanup_stage(run_id: &str) -> Result<(), Error> {
    Ok(ignore_kind(
        remove_dir_all(stage_path(run_id)),
        ErrorKind::NotFound,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_paths_are_namespaced_per_run() {
        assert_eq!(stage_path("abc"), PathBuf::from("/tmp/carton.abc"));
    }

    #[test]
    fn cleanup_ignores_missing_stages() {
        cleanup_stage("does-not-exist").unwrap();
    }
}
