//! Boot a microVM, poke it once through each channel, shut it down.

use anyhow::{Context, Result, bail};
use clap::Parser;
use flintvm::{
    BootMethod, HypervisorInstall, LoggingOptions, TransportOptions, VmBootSource,
    VmConfiguration, VmDrive, VmInstance, VmMachineConfiguration, VmOptions,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "basic-app", about = "Boot a microVM and run a command on its console")]
struct Cli {
    #[arg(long, default_value = "/opt/res/kernel")]
    kernel: PathBuf,

    #[arg(long, default_value = "/opt/res/rootfs.ext4")]
    rootfs: PathBuf,

    #[arg(long, default_value = "/opt/res/firecracker")]
    firecracker: PathBuf,

    /// Launch through this jailer binary.
    #[arg(long)]
    jailer: Option<PathBuf>,

    #[arg(long, default_value = "v1.7.0")]
    version: String,

    #[arg(long, default_value_t = 128)]
    mem_mib: u32,

    #[arg(long, default_value_t = 1)]
    vcpus: u8,

    #[arg(long, default_value = "/tmp")]
    socket_dir: PathBuf,

    /// JSON options file; fields not present keep their defaults.
    #[arg(long)]
    options: Option<PathBuf>,

    /// Pass the configuration as a file instead of over the API.
    #[arg(long)]
    config_file: bool,

    #[arg(long, default_value = "cat --help")]
    command: String,

    /// Also write logs to this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = flintvm::init_logging(&LoggingOptions {
        log_dir: cli.log_dir.clone(),
        ..LoggingOptions::default()
    })?;

    let configuration = VmConfiguration::new(
        VmBootSource::new(&cli.kernel).boot_args("console=ttyS0 reboot=k panic=1 pci=off"),
        VmMachineConfiguration::new(cli.mem_mib, cli.vcpus),
        vec![VmDrive::new("rootfs", true, &cli.rootfs)],
    )?;

    let mut install = HypervisorInstall::new(&cli.version, &cli.firecracker);
    if let Some(jailer) = &cli.jailer {
        install = install.with_jailer(jailer);
    }

    let mut options = match &cli.options {
        Some(path) => VmOptions::load(path)?,
        None => VmOptions::default(),
    }
    .with_env_overrides()?;
    if cli.config_file {
        options.boot_method = BootMethod::ConfigFile;
    }

    let vm = VmInstance::builder(configuration, install)
        .transport(TransportOptions::unique_in(&cli.socket_dir))
        .options(options)
        .build()
        .context("invalid VM setup")?;

    if let Some(err) = vm.boot().await.error() {
        bail!("couldn't boot VM {}: {}", vm.id(), err);
    }

    let _ = vm
        .get_info()
        .await
        .if_success(|info| {
            println!("The VM is called {}", info.id);
            println!("The VMM version is {}", info.vmm_version);
        })
        .if_error(|e| println!("Received an error when trying to get info: {e}"));

    let pause = vm.pause().await;
    let resume = vm.resume().await;
    let _ = pause
        .chain_with(resume)
        .if_success(|_| println!("Paused and resumed VM!"))
        .if_error(|e| println!("Got an error when pausing and resuming: {e}"));

    let _ = vm
        .run_buffered_command(&cli.command)
        .await
        .if_success(|output| println!("Output of '{}':\n{}", cli.command, output))
        .if_error(|e| println!("Command failed: {e}"));

    let _ = vm
        .shutdown()
        .await
        .if_success(|_| println!("Shut down VM"))
        .if_soft_failure(|soft| println!("VM shut down with: {soft}"))
        .if_error(|e| println!("Failed to shut down VM: {e}"));

    let metrics = vm.metrics();
    if let Some(boot) = metrics.boot {
        println!(
            "Boot took {}ms, {} management requests, {} console commands",
            boot.total.as_millis(),
            metrics.management_requests,
            metrics.console_commands
        );
    }
    Ok(())
}
