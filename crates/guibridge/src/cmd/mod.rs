use std::future::Future;
use std::time::Duration;

use clap::{Args, Subcommand};
use guibridge::frame::{ElementType, DEFAULT_ADDRESS};
use guibridge::link::{BridgeConfig, ReconnectPolicy};
use guibridge::transport::{DEFAULT_HOST, DEFAULT_PORT};
use tokio::task::LocalSet;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod device;
pub mod info;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one buffer to a device.
    Send(SendArgs),
    /// Print buffer updates received from a device.
    Watch(WatchArgs),
    /// Run a mock device.
    Device(DeviceArgs),
    /// Probe a device and print handshake metadata.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args),
        Command::Watch(args) => watch::run(args, format),
        Command::Device(args) => device::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the device lives.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Device host name or address.
    #[arg(long, env = "GUIBRIDGE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,
    /// Device TCP port.
    #[arg(long, env = "GUIBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Channel base address (`<address>_data`, `<address>_control`).
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub address: String,
}

impl TargetArgs {
    /// Commands bound the wait themselves (`--timeout` or ctrl-c), so the
    /// bridge keeps retrying an unreachable device.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            port: self.port,
            address: self.address.clone(),
            reconnect: ReconnectPolicy {
                initial_attempts: None,
                ..ReconnectPolicy::default()
            },
            ..BridgeConfig::for_host(self.host.clone())
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Buffer index.
    #[arg(long, short = 'i', default_value_t = 0)]
    pub index: u32,
    /// Element type: float, int or char.
    #[arg(long = "type", short = 't', value_name = "TYPE", default_value = "float")]
    pub element: ElementType,
    /// Values (comma-separated), coerced to the element type.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub values: Vec<f64>,
    /// Send on the control channel instead of the data channel.
    #[arg(long)]
    pub control: bool,
    /// Maximum time to wait for the device (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Also print control channel buffers and events.
    #[arg(long)]
    pub control: bool,
    /// Exit after printing N updates.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Address to listen on.
    #[arg(long, env = "GUIBRIDGE_LISTEN", default_value = "127.0.0.1:5555")]
    pub listen: String,
    /// Channel base address.
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub address: String,
    /// Project name announced in the greeting.
    #[arg(long)]
    pub project: Option<String>,
    /// Send an incrementing counter on data buffer 0 at this period (e.g. 500ms).
    #[arg(long, value_name = "PERIOD")]
    pub counter: Option<String>,
    /// Send every received buffer back to the client.
    #[arg(long)]
    pub echo: bool,
    /// Exit after serving one client.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Drive `fut` to completion on a single-threaded runtime with a `LocalSet`.
pub fn block_on_local<F: Future>(fut: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    Ok(LocalSet::new().block_on(&runtime, fut))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
