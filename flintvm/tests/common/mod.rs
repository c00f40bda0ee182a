//! Test doubles for driving `VmInstance` without a real hypervisor.
//!
//! `FakeHost` keeps an in-memory file table and launches `FakeVmm`s: fake
//! hypervisor processes that create their socket, answer the management API
//! and expose a minimal shell on the console.

#![allow(dead_code)]

use async_trait::async_trait;
use flintvm::host::{ConsoleStreams, Host, HostProcess, ProcessExit, ProcessSignal, ProcessSpec};
use flintvm::management::{ApiMethod, ApiRequest, ApiResponse, ApiTransport};
use flintvm::{
    FlintError, FlintResult, HypervisorInstall, Transport, TransportOptions, VmBootSource,
    VmConfiguration, VmDrive, VmInstance, VmMachineConfiguration, VmOptions,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;

pub const KERNEL: &str = "/images/vmlinux";
pub const ROOTFS: &str = "/images/rootfs.ext4";
pub const DATA: &str = "/images/data.ext4";
pub const SOCKET_DIR: &str = "/run/flintvm";

/// When the fake hypervisor creates its control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    Immediate,
    Delayed(Duration),
    Never,
}

#[derive(Debug, Clone)]
pub struct Behaviour {
    pub socket: SocketMode,
    /// Exit with this code right after launch.
    pub exit_on_start: Option<i32>,
    pub ignore_sigterm: bool,
    /// Exit cleanly when the guest receives Ctrl+Alt+Del.
    pub power_off_on_ctrl_alt_del: bool,
    /// Answer this path with a 400 fault.
    pub fail_path: Option<String>,
    /// Kill the process when its handle is dropped.
    pub kill_on_drop: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            socket: SocketMode::Immediate,
            exit_on_start: None,
            ignore_sigterm: false,
            power_off_on_ctrl_alt_del: true,
            fail_path: None,
            kill_on_drop: true,
        }
    }
}

#[derive(Default)]
struct HostState {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    vmms: Vec<Arc<FakeVmm>>,
    next_pid: u32,
}

pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
    behaviour: Mutex<Behaviour>,
}

impl FakeHost {
    /// Host with the default kernel and drive images present.
    pub fn new() -> Arc<Self> {
        Self::with_behaviour(Behaviour::default())
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        let host = Self {
            state: Arc::new(Mutex::new(HostState {
                next_pid: 4000,
                ..HostState::default()
            })),
            behaviour: Mutex::new(behaviour),
        };
        for artifact in [KERNEL, ROOTFS, DATA] {
            host.add_file(artifact, b"");
        }
        Arc::new(host)
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock() = behaviour;
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: &[u8]) {
        self.state.lock().files.insert(path.into(), contents.to_vec());
    }

    pub fn has_file(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().files.contains_key(path.as_ref())
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.lock().files.get(path.as_ref()).cloned()
    }

    /// Every file except the pre-seeded images.
    pub fn runtime_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .state
            .lock()
            .files
            .keys()
            .filter(|p| !p.starts_with("/images"))
            .cloned()
            .collect();
        files.sort();
        files
    }

    pub fn vmms(&self) -> Vec<Arc<FakeVmm>> {
        self.state.lock().vmms.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().vmms.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().vmms.iter().filter(|v| !v.has_exited()).count()
    }

    pub fn last_vmm(&self) -> Arc<FakeVmm> {
        self.state
            .lock()
            .vmms
            .last()
            .cloned()
            .expect("no hypervisor was launched")
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn spawn_process(&self, spec: ProcessSpec) -> FlintResult<Box<dyn HostProcess>> {
        let behaviour = self.behaviour.lock().clone();
        let socket_path = socket_path_of(&spec);
        let vm_id = arg_after(&spec.args, "--id").unwrap_or_default();
        let hypervisor_state = if spec.args.iter().any(|a| a == "--config-file") {
            "Running"
        } else {
            "Not started"
        };

        let (exit, _) = watch::channel(None);
        let pid = {
            let mut state = self.state.lock();
            state.next_pid += 1;
            state.next_pid
        };
        let vmm = Arc::new(FakeVmm {
            pid,
            vm_id,
            spec,
            socket_path: socket_path.clone(),
            behaviour: behaviour.clone(),
            exit,
            hypervisor_state: Mutex::new(hypervisor_state.to_string()),
            machine_config: Mutex::new(None),
            drives: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        self.state.lock().vmms.push(Arc::clone(&vmm));

        if let Some(code) = behaviour.exit_on_start {
            vmm.exit_with(ProcessExit {
                code: Some(code),
                signal: None,
            });
        } else {
            match behaviour.socket {
                SocketMode::Immediate => {
                    self.state.lock().files.insert(socket_path, Vec::new());
                }
                SocketMode::Delayed(delay) => {
                    let state = Arc::clone(&self.state);
                    let vmm = Arc::clone(&vmm);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if !vmm.has_exited() {
                            state.lock().files.insert(socket_path, Vec::new());
                        }
                    });
                }
                SocketMode::Never => {}
            }
        }

        let (ours, theirs) = tokio::io::duplex(8192);
        tokio::spawn(fake_shell(theirs));
        let (read, write) = tokio::io::split(ours);

        Ok(Box::new(FakeProcess {
            vmm,
            console: Some(ConsoleStreams {
                input: Box::new(write),
                output: Box::new(read),
            }),
        }))
    }

    async fn path_exists(&self, path: &Path) -> bool {
        let state = self.state.lock();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    async fn create_dir_all(&self, path: &Path) -> FlintResult<()> {
        self.state.lock().dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> FlintResult<()> {
        self.add_file(path, contents);
        Ok(())
    }

    async fn create_new_file(&self, path: &Path) -> FlintResult<bool> {
        let mut state = self.state.lock();
        if state.files.contains_key(path) {
            return Ok(false);
        }
        state.files.insert(path.to_path_buf(), Vec::new());
        Ok(true)
    }

    async fn remove_file(&self, path: &Path) -> FlintResult<()> {
        self.state.lock().files.remove(path);
        Ok(())
    }

    async fn connect(
        &self,
        transport: &Transport,
        _request_timeout: Duration,
    ) -> FlintResult<Box<dyn ApiTransport>> {
        let state = self.state.lock();
        let path = transport.path();
        let vmm = state
            .vmms
            .iter()
            .find(|v| v.socket_path == path && !v.has_exited())
            .filter(|_| state.files.contains_key(path))
            .cloned()
            .ok_or_else(|| {
                FlintError::Transport(format!("connection refused: {}", path.display()))
            })?;
        Ok(Box::new(FakeApi { vmm }))
    }
}

fn arg_after(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Where the launched process would bind, jail included.
fn socket_path_of(spec: &ProcessSpec) -> PathBuf {
    let api_sock = arg_after(&spec.args, "--api-sock").unwrap_or_default();
    match arg_after(&spec.args, "--chroot-base-dir") {
        Some(base) => {
            let exec = arg_after(&spec.args, "--exec-file").unwrap_or_default();
            let exec_name = Path::new(&exec)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = arg_after(&spec.args, "--id").unwrap_or_default();
            PathBuf::from(base)
                .join(exec_name)
                .join(id)
                .join("root")
                .join(api_sock.trim_start_matches('/'))
        }
        None => PathBuf::from(api_sock),
    }
}

/// One launched fake hypervisor.
pub struct FakeVmm {
    pub pid: u32,
    pub vm_id: String,
    pub spec: ProcessSpec,
    pub socket_path: PathBuf,
    behaviour: Behaviour,
    exit: watch::Sender<Option<ProcessExit>>,
    hypervisor_state: Mutex<String>,
    machine_config: Mutex<Option<Value>>,
    drives: Mutex<HashSet<String>>,
    requests: Mutex<Vec<ApiRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeVmm {
    fn exit_with(&self, exit: ProcessExit) {
        self.exit.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(exit);
                true
            } else {
                false
            }
        });
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// `"METHOD path"` for every request received.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    /// Highest number of management requests ever open at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn hypervisor_state(&self) -> String {
        self.hypervisor_state.lock().clone()
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        if self.behaviour.fail_path.as_deref() == Some(request.path.as_str()) {
            return fault(400, "injected failure");
        }

        let body = request.body.clone().unwrap_or(Value::Null);
        match (request.method, request.path.as_str()) {
            (ApiMethod::Get, "/") => ok_json(json!({
                "id": self.vm_id,
                "state": self.hypervisor_state(),
                "vmm_version": "1.7.0",
                "app_name": "Firecracker",
            })),
            (ApiMethod::Get, "/version") => ok_json(json!({ "firecracker_version": "1.7.0" })),
            (ApiMethod::Get, "/machine-config") => {
                let config = self.machine_config.lock().clone().unwrap_or_else(|| {
                    json!({ "vcpu_count": 1, "mem_size_mib": 128, "smt": false })
                });
                ok_json(config)
            }
            (ApiMethod::Put, "/boot-source") => ApiResponse::no_content(),
            (ApiMethod::Put, "/machine-config") => {
                *self.machine_config.lock() = Some(body);
                ApiResponse::no_content()
            }
            (ApiMethod::Put, path) if path.starts_with("/drives/") => {
                self.drives.lock().insert(path["/drives/".len()..].to_string());
                ApiResponse::no_content()
            }
            (ApiMethod::Patch, path) if path.starts_with("/drives/") => {
                if self.drives.lock().contains(&path["/drives/".len()..]) {
                    ApiResponse::no_content()
                } else {
                    fault(400, "drive not found")
                }
            }
            (ApiMethod::Patch, "/vm") => {
                let mut state = self.hypervisor_state.lock();
                let next = match (state.as_str(), body["state"].as_str()) {
                    ("Running", Some("Paused")) => "Paused",
                    ("Paused", Some("Resumed")) => "Running",
                    (current, _) => {
                        return fault(400, &format!("invalid state change from {current}"));
                    }
                };
                *state = next.to_string();
                ApiResponse::no_content()
            }
            (ApiMethod::Put, "/actions") => match body["action_type"].as_str() {
                Some("InstanceStart") => {
                    *self.hypervisor_state.lock() = "Running".into();
                    ApiResponse::no_content()
                }
                Some("SendCtrlAltDel") => {
                    if self.behaviour.power_off_on_ctrl_alt_del {
                        self.exit_with(ProcessExit {
                            code: Some(0),
                            signal: None,
                        });
                    }
                    ApiResponse::no_content()
                }
                Some("FlushMetrics") => ApiResponse::no_content(),
                _ => fault(400, "unknown action"),
            },
            _ => fault(400, "Invalid request method and/or path"),
        }
    }
}

fn ok_json(value: Value) -> ApiResponse {
    ApiResponse::new(200, value.to_string())
}

fn fault(status: u16, message: &str) -> ApiResponse {
    ApiResponse::new(status, json!({ "fault_message": message }).to_string())
}

struct FakeProcess {
    vmm: Arc<FakeVmm>,
    console: Option<ConsoleStreams>,
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        if !self.vmm.behaviour.kill_on_drop {
            return;
        }
        self.vmm.exit_with(ProcessExit {
            code: None,
            signal: Some(libc::SIGKILL),
        });
    }
}

#[async_trait]
impl HostProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.vmm.pid)
    }

    fn signal(&mut self, signal: ProcessSignal) -> FlintResult<()> {
        match signal {
            ProcessSignal::Terminate if self.vmm.behaviour.ignore_sigterm => {}
            ProcessSignal::Terminate => self.vmm.exit_with(ProcessExit {
                code: None,
                signal: Some(libc::SIGTERM),
            }),
            ProcessSignal::Kill => self.vmm.exit_with(ProcessExit {
                code: None,
                signal: Some(libc::SIGKILL),
            }),
        }
        Ok(())
    }

    fn try_wait(&mut self) -> FlintResult<Option<ProcessExit>> {
        Ok(self.vmm.exit_status())
    }

    async fn wait(&mut self, timeout: Duration) -> FlintResult<Option<ProcessExit>> {
        let mut exit = self.vmm.exit.subscribe();
        let waited = tokio::time::timeout(timeout, async move {
            exit.wait_for(|e| e.is_some()).await.ok().and_then(|e| *e)
        })
        .await;
        Ok(waited.ok().flatten())
    }

    fn take_console(&mut self) -> Option<ConsoleStreams> {
        self.console.take()
    }
}

struct FakeApi {
    vmm: Arc<FakeVmm>,
}

#[async_trait]
impl ApiTransport for FakeApi {
    async fn send(&mut self, request: ApiRequest) -> FlintResult<ApiResponse> {
        if self.vmm.has_exited() {
            return Err(FlintError::Transport("connection reset by peer".into()));
        }
        let open = self.vmm.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.vmm.max_in_flight.fetch_max(open, Ordering::SeqCst);
        self.vmm.requests.lock().push(request.clone());

        // Stay open across a suspension point so overlapping callers would show.
        tokio::task::yield_now().await;
        let response = self.vmm.handle(&request);

        self.vmm.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

pub const PROMPT: &str = "~ # ";

/// Stand-in for a guest shell on the serial console. Prints a prompt, echoes
/// input like a tty and runs the framed line for `echo`, `false`, `hang` and
/// `slow <text>` (prints `<text>` in two halves with a pause between).
async fn fake_shell(stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    loop {
        if write.write_all(PROMPT.as_bytes()).await.is_err() {
            return;
        }
        let Ok(Some(line)) = lines.next_line().await else {
            return;
        };
        let mut reply = format!("{line}\r\n");
        let Some((nonce, command)) = parse_framed(&line) else {
            reply.push_str("sh: syntax error\r\n");
            let _ = write.write_all(reply.as_bytes()).await;
            continue;
        };

        reply.push_str(&format!("__FLINT_BEGIN_{nonce}\r\n"));
        let status = if let Some(text) = command.strip_prefix("echo ") {
            reply.push_str(&format!("{text}\r\n"));
            0
        } else if let Some(text) = command.strip_prefix("slow ") {
            let (head, tail) = text.split_at(text.len() / 2);
            reply.push_str(head);
            if write.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
            reply.clear();
            tokio::time::sleep(Duration::from_millis(30)).await;
            reply.push_str(&format!("{tail}\r\n"));
            0
        } else if command == "false" {
            1
        } else if command == "hang" {
            reply.push_str("started\r\n");
            let _ = write.write_all(reply.as_bytes()).await;
            std::future::pending::<()>().await;
            return;
        } else {
            127
        };
        reply.push_str(&format!("__FLINT_END_{nonce}:{status}\r\n"));
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Split a framed console line into its nonce and the user command.
fn parse_framed(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("printf '%s%s\\n' '__FLINT_BEGIN_' '")?;
    let (nonce, rest) = rest.split_once("'; ")?;
    let (command, _) = rest.rsplit_once("; printf '%s%s:%s\\n'")?;
    Some((nonce, command))
}

pub fn configuration() -> VmConfiguration {
    VmConfiguration::new(
        VmBootSource::new(KERNEL).boot_args("console=ttyS0 reboot=k panic=1"),
        VmMachineConfiguration::new(256, 2),
        vec![
            VmDrive::new("rootfs", true, ROOTFS),
            VmDrive::new("data", false, DATA),
        ],
    )
    .unwrap()
}

pub fn install() -> HypervisorInstall {
    HypervisorInstall::new("v1.7.0", "/opt/fc/firecracker")
}

pub fn fast_options() -> VmOptions {
    VmOptions {
        boot_timeout: Duration::from_secs(2),
        socket_poll_interval: Duration::from_millis(5),
        request_timeout: Duration::from_secs(1),
        shutdown_grace: Duration::from_millis(200),
        guest_shutdown: true,
        guest_shutdown_timeout: Duration::from_millis(200),
        command_timeout: Duration::from_secs(1),
        ..VmOptions::default()
    }
}

pub fn vm_with(host: &Arc<FakeHost>, options: VmOptions) -> VmInstance {
    vm_on(host, options, TransportOptions::unique_in(SOCKET_DIR))
}

pub fn vm_on(host: &Arc<FakeHost>, options: VmOptions, transport: TransportOptions) -> VmInstance {
    VmInstance::builder(configuration(), install())
        .transport(transport)
        .options(options)
        .host(Arc::clone(host) as Arc<dyn Host>)
        .build()
        .unwrap()
}

pub fn vm(host: &Arc<FakeHost>) -> VmInstance {
    vm_with(host, fast_options())
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
