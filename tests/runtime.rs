use std::path::PathBuf;

use carton::{Runtime, WaitStatus};

#[test]
fn options_reject_missing_root() {
    assert!(Runtime::options().command("/bin/true").build().is_err());
}

#[test]
fn options_reject_malformed_volumes() {
    let base = || Runtime::options().command("/bin/true").root("/tmp/rootfs");
    assert!(base().add_volume("srv/data", "data").build().is_err());
    assert!(base().add_volume("/srv/data", "/").build().is_err());
    assert!(base()
        .add_volume("/srv/a", "/data")
        .add_volume("/srv/b", "data")
        .build()
        .is_err());
}

#[test]
fn staging_paths_differ_between_runs() {
    let make = || {
        Runtime::options()
            .command("/bin/true")
            .root("/tmp/rootfs")
            .build()
            .unwrap()
    };
    assert_ne!(make().staging_path(), make().staging_path());
}

fn test_rootfs() -> PathBuf {
    PathBuf::from(
        std::env::var("CARTON_TEST_ROOTFS")
            .expect("CARTON_TEST_ROOTFS should point to a populated rootfs"),
    )
}

#[test]
#[ignore = "requires root privileges and CARTON_TEST_ROOTFS"]
fn run_returns_the_child_status() {
    let runtime = Runtime::options()
        .command("/bin/true")
        .uid(1000)
        .root(test_rootfs())
        .build()
        .unwrap();
    let staging = runtime.staging_path();
    match runtime.run().unwrap() {
        WaitStatus::Exited(_, 0) => {}
        status => panic!("Unexpected status: {status:?}"),
    }
    assert!(!staging.exists());
}

#[test]
#[ignore = "requires root privileges"]
fn missing_root_source_fails_the_mount_stage() {
    let runtime = Runtime::options()
        .command("/bin/true")
        .root("/nonexistent")
        .build()
        .unwrap();
    let staging = runtime.staging_path();
    match runtime.run().unwrap() {
        WaitStatus::Exited(_, 255) => {}
        status => panic!("Unexpected status: {status:?}"),
    }
    assert!(!staging.exists());
}

#[test]
#[ignore = "requires root privileges and CARTON_TEST_ROOTFS"]
fn denied_syscalls_return_eperm() {
    // BusyBox chmod exits non-zero when the kernel refuses a setuid bit.
    let runtime = Runtime::options()
        .command("/bin/sh")
        .args(vec![
            "-c".into(),
            "touch /tmp/probe && chmod u+s /tmp/probe && exit 7; exit 0".into(),
        ])
        .root(test_rootfs())
        .build()
        .unwrap();
    match runtime.run().unwrap() {
        WaitStatus::Exited(_, 0) => {}
        status => panic!("Unexpected status: {status:?}"),
    }
}
