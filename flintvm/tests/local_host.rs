//! ProcessSupervisor against real child processes.
//!
//! A shell script stands in for the hypervisor: it creates the file named
//! by `--api-sock` and then sleeps.

use flintvm::util::is_process_alive;
use flintvm::{
    HypervisorInstall, LocalHost, ProcessSupervisor, SoftFailure, TransportOptions, VmBootSource,
    VmConfiguration, VmDrive, VmMachineConfiguration, VmOptions, VmmHandler,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn configuration() -> VmConfiguration {
    VmConfiguration::new(
        VmBootSource::new("/images/vmlinux"),
        VmMachineConfiguration::new(128, 1),
        vec![VmDrive::new("rootfs", true, "/images/rootfs.ext4")],
    )
    .unwrap()
}

fn options() -> VmOptions {
    VmOptions {
        boot_timeout: Duration::from_secs(5),
        socket_poll_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_millis(300),
        ..VmOptions::default()
    }
}

async fn spawn(
    supervisor: &ProcessSupervisor,
    binary: &Path,
    socket_dir: &Path,
    name: &str,
) -> Box<dyn VmmHandler> {
    let install = HypervisorInstall::new("v1.7.0", binary);
    let transport = TransportOptions::new(name, socket_dir);
    supervisor
        .spawn(&install, &transport, &configuration(), &options())
        .await
        .success()
        .expect("hypervisor should come up")
}

// Both phases share one test so no other thread forks while a script is
// being written.
#[tokio::test]
async fn test_terminate_graceful_and_forced() {
    let dir = tempfile::tempdir().unwrap();
    let polite = write_script(dir.path(), "polite", "touch \"$2\"\nexec sleep 30");
    let stubborn = write_script(
        dir.path(),
        "stubborn",
        "trap '' TERM\ntouch \"$2\"\nexec sleep 30",
    );
    let sockets = dir.path().join("sockets");

    let supervisor = ProcessSupervisor::new(Arc::new(LocalHost::new()));

    let mut handler = spawn(&supervisor, &polite, &sockets, "polite.sock").await;
    let pid = handler.pid().unwrap();
    assert!(is_process_alive(pid));
    assert!(sockets.join("polite.sock").exists());
    assert!(handler.is_running());

    let outcome = supervisor.terminate(handler.as_mut(), Duration::from_secs(2)).await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert!(!is_process_alive(pid));

    let mut handler = spawn(&supervisor, &stubborn, &sockets, "stubborn.sock").await;
    let pid = handler.pid().unwrap();
    let grace = Duration::from_millis(300);

    let outcome = supervisor.terminate(handler.as_mut(), grace).await;
    match outcome.soft_failure() {
        Some(SoftFailure::ForcedKill { pid: killed, grace: waited }) => {
            assert_eq!(*killed, Some(pid));
            assert_eq!(*waited, grace);
        }
        other => panic!("expected forced kill, got {other:?}"),
    }
    assert!(!is_process_alive(pid));
}
