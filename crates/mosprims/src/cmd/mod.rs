use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use mosprims_model::PortType;
use mosprims_peer::{ConnectionConfig, DeviceConfig};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod machine_info;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to an NCS and print connection status.
    Status(StatusArgs),
    /// Request machine info from an NCS.
    MachineInfo(MachineInfoArgs),
    /// Accept NCS connections and answer heartbeats and machine info requests.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Status(args) => status::run(args, format).await,
        Command::MachineInfo(args) => machine_info::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Where the device connects. Flags override values from `--config`.
#[derive(Args, Debug, Default)]
pub struct DeviceArgs {
    /// JSON device configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Primary NCS host.
    #[arg(long)]
    pub host: Option<String>,
    /// Secondary NCS host; enables hot standby.
    #[arg(long)]
    pub secondary: Option<String>,
    /// Our MOS id.
    #[arg(long, env = "MOSPRIMS_MOS_ID")]
    pub mos_id: Option<String>,
    /// NCS id written into every envelope.
    #[arg(long)]
    pub ncs_id: Option<String>,
    /// Lower channel TCP port.
    #[arg(long)]
    pub lower_port: Option<u16>,
    /// Upper channel TCP port.
    #[arg(long)]
    pub upper_port: Option<u16>,
    /// Channels to open (comma-separated: lower,upper,query).
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<PortType>>,
    /// Record reply defects instead of failing on them.
    #[arg(long)]
    pub lenient: bool,
}

impl DeviceArgs {
    pub fn load(&self) -> CliResult<DeviceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
                serde_json::from_str::<DeviceConfig>(&text).map_err(|err| {
                    CliError::new(DATA_INVALID, format!("invalid config {}: {err}", path.display()))
                })?
            }
            None => DeviceConfig::default(),
        };

        if let Some(mos_id) = &self.mos_id {
            config.mos_id = mos_id.clone();
        }
        if self.lenient {
            config.strict = false;
        }
        self.apply(&mut config.primary);
        if let Some(host) = &self.secondary {
            let mut secondary = config
                .secondary
                .take()
                .unwrap_or_else(|| config.primary.clone());
            self.apply(&mut secondary);
            secondary.host = host.clone();
            config.secondary = Some(secondary);
            config.hot_standby = true;
        }

        if config.primary.host.is_empty() {
            return Err(CliError::new(USAGE, "no NCS host given (use --host or --config)"));
        }
        Ok(config)
    }

    fn apply(&self, connection: &mut ConnectionConfig) {
        if let Some(host) = &self.host {
            connection.host = host.clone();
        }
        if let Some(ncs_id) = &self.ncs_id {
            connection.id = ncs_id.clone();
        }
        if let Some(port) = self.lower_port {
            connection.ports.lower = port;
        }
        if let Some(port) = self.upper_port {
            connection.ports.upper = port;
        }
        if let Some(channels) = &self.channels {
            connection.channels = channels.clone();
        }
    }
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// How long to wait for connections before reporting (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub wait: String,
}

#[derive(Args, Debug)]
pub struct MachineInfoArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,
    /// TCP port to listen on; 0 picks a free port.
    #[arg(long, default_value_t = 10540)]
    pub port: u16,
    /// Our MOS id.
    #[arg(long, env = "MOSPRIMS_MOS_ID", default_value = "mosprims")]
    pub mos_id: String,
    /// Accepted NCS ids (comma-separated). Default: any.
    #[arg(long, value_delimiter = ',')]
    pub ncs_ids: Vec<String>,
    /// Stop after this long instead of waiting for Ctrl-C (e.g. 30s).
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
