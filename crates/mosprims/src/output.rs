use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mosprims_model::{Defect, MachineInfo};
use mosprims_peer::{ConnectionStatus, DeviceStatus};
use serde::Serialize;

const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/mosprims/cli/v1";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_id: String,
    #[serde(flatten)]
    body: &'a T,
}

/// One JSON object per line, tagged with its schema id.
pub fn print_json<T: Serialize>(schema: &str, body: &T) {
    let out = Envelope {
        schema_id: format!("{SCHEMA_BASE}/{schema}.schema.json"),
        body,
    };
    println!(
        "{}",
        serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_device_status(status: &DeviceStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("device-status", status),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ROLE", "ID", "HOST", "CONNECTED", "HEARTBEAT", "CHANNELS"]);
            table.add_row(connection_row("primary", &status.primary));
            if let Some(secondary) = &status.secondary {
                table.add_row(connection_row("secondary", secondary));
            }
            println!("{table}");
            println!("active: {:?}", status.active);
        }
        OutputFormat::Pretty => {
            println!("Device Status:");
            println!("  Active:    {:?}", status.active);
            print_connection_pretty("Primary", &status.primary);
            if let Some(secondary) = &status.secondary {
                print_connection_pretty("Secondary", secondary);
            }
        }
    }
}

fn connection_row(role: &str, status: &ConnectionStatus) -> Vec<String> {
    vec![
        role.to_string(),
        status.id.clone(),
        status.host.clone(),
        status.connected.to_string(),
        status.heartbeat_enabled.to_string(),
        channel_summary(status),
    ]
}

fn print_connection_pretty(label: &str, status: &ConnectionStatus) {
    println!(
        "  {label:<10} {} @ {} connected={} heartbeat={} [{}]",
        status.id,
        status.host,
        status.connected,
        status.heartbeat_enabled,
        channel_summary(status)
    );
}

fn channel_summary(status: &ConnectionStatus) -> String {
    status
        .channels
        .iter()
        .map(|c| format!("{}:{}={}", c.port, c.tcp_port, if c.connected { "up" } else { "down" }))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Serialize)]
struct MachineInfoOutput<'a> {
    machine_info: &'a MachineInfo,
    defects: Vec<String>,
}

pub fn print_machine_info(info: &MachineInfo, defects: &[Defect], format: OutputFormat) {
    let defects: Vec<String> = defects
        .iter()
        .map(|d| format!("{}: {}", d.path, d.error))
        .collect();
    match format {
        OutputFormat::Json => print_json(
            "machine-info",
            &MachineInfoOutput {
                machine_info: info,
                defects,
            },
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            let profiles = (0..8)
                .filter(|&n| info.supported_profiles.supports(n))
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let rows = [
                ("manufacturer", info.manufacturer.to_string()),
                ("model", info.model.to_string()),
                ("hwRev", info.hw_rev.to_string()),
                ("swRev", info.sw_rev.to_string()),
                ("DOM", info.dom.to_string()),
                ("SN", info.sn.to_string()),
                ("ID", info.id.to_string()),
                ("time", info.time.to_string()),
                ("opTime", info.op_time.map(|t| t.to_string()).unwrap_or_default()),
                ("mosRev", info.mos_rev.to_string()),
                ("deviceType", info.supported_profiles.device_type.clone()),
                ("profiles", profiles),
            ];
            for (field, value) in rows {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
            for defect in defects {
                println!("defect: {defect}");
            }
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    addr: String,
    mos_id: &'a str,
}

pub fn print_listening(addr: std::net::SocketAddr, mos_id: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(
            "listener",
            &ListeningOutput {
                event: "listening",
                addr: addr.to_string(),
                mos_id,
            },
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("listening on {addr} as {mos_id}");
        }
    }
}
