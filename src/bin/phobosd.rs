//! Daemon entry point: parse arguments, load configuration, register
//! adapters and run the accept/dispatch loop until signalled to stop.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use phobos::adapters::fake::{FakeDeviceAdapter, FakeFilesystem, FakeIo, FakeLibrary};
use phobos::adapters::AdapterRegistry;
use phobos::config::Config;
use phobos::daemon::Daemon;
use phobos::scheduler::Scheduler;

/// Local resource scheduler for tape and directory media.
#[derive(Parser, Debug)]
#[command(name = "phobosd", version)]
struct Cli {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, default_value = "/etc/phobos.conf")]
    config: PathBuf,

    /// Bump the default log filter by one level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose && std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    if let Err(e) = run(cli) {
        error!("phobosd exiting: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> phobos::error::PhoResult<()> {
    let config = Config::load(&cli.config)?;

    // No real SCSI/LTFS backend ships with this crate; register the
    // in-memory adapters under one name so the daemon is runnable
    // out of the box against `dir`-family media.
    let mut registry = AdapterRegistry::new();
    registry.register_library("fake", Box::new(FakeLibrary::new()));
    registry.register_filesystem("fake", Box::new(FakeFilesystem::new(u64::MAX)));
    registry.register_io("fake", Box::new(FakeIo::new()));
    registry.register_device("fake", Box::new(FakeDeviceAdapter::new()));

    let ctx = phobos::Context::new(config, registry);

    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let pid = process::id();

    let socket_path = PathBuf::from(&ctx.config.server_socket);
    let scheduler = Scheduler::new(hostname, pid, ctx.config, ctx.registry, "fake", "fake", "fake");
    let mut daemon = Daemon::bind(&socket_path, scheduler)?;

    let stop = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register(sig, Arc::clone(&stop))
            .map_err(|e| phobos::error::PhoError::Fatal(format!("failed to install signal handler: {e}")))?;
    }

    info!("phobosd starting (pid {pid})");
    daemon.run(&stop)
}
