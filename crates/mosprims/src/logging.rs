use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Overrides `--log-level` with full filter directives, e.g. `mosprims_peer=trace`.
pub const LOG_ENV: &str = "MOSPRIMS_LOG";

/// Crates whose events follow `--log-level`; everything else stays at `warn` or quieter.
const CRATES: [&str; 5] = [
    "mosprims",
    "mosprims_transport",
    "mosprims_frame",
    "mosprims_model",
    "mosprims_peer",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Default filter: `level` for our crates, at most `warn` for dependencies.
pub fn default_directives(level: LogLevel) -> String {
    let base = if level == LogLevel::Error { "error" } else { "warn" };
    let mut directives = vec![base.to_string()];
    directives.extend(CRATES.iter().map(|krate| format!("{krate}={}", level.as_str())));
    directives.join(",")
}

/// Log to stderr so stdout stays clean for command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .unwrap_or_else(|_| EnvFilter::new(default_directives(level))),
        _ => EnvFilter::new(default_directives(level)),
    };
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false);

    match format {
        LogFormat::Text => {
            let _ = builder.with_target(false).try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
