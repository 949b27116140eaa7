#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Output, Stdio};

struct Listener {
    child: Child,
    port: u16,
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn mosprims() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mosprims"));
    command.args(["--log-level", "error", "--format", "json"]);
    command
}

fn start_listener(mos_id: &str) -> Listener {
    let mut child = mosprims()
        .args(["listen", "--port", "0", "--mos-id", mos_id, "--duration", "30s"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen command should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("listener should announce its address");
    let announced: serde_json::Value =
        serde_json::from_str(&line).expect("listening line should be json");
    assert_eq!(announced["event"], "listening");
    let addr: std::net::SocketAddr = announced["addr"]
        .as_str()
        .and_then(|a| a.parse().ok())
        .expect("addr should be a socket address");

    Listener {
        child,
        port: addr.port(),
    }
}

fn against(listener_port: u16, mos_id: &str, command: &str, extra: &[&str]) -> Output {
    let port = listener_port.to_string();
    mosprims()
        .args([
            command,
            "--host",
            "127.0.0.1",
            "--lower-port",
            &port,
            "--channels",
            "lower",
            "--mos-id",
            mos_id,
        ])
        .args(extra)
        .output()
        .expect("command should run")
}

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    listener.local_addr().expect("local addr").port()
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_mosprims"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("mosprims {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn machine_info_round_trips_through_listener() {
    let listener = start_listener("mos.test");
    let output = against(listener.port, "mos.test", "machine-info", &["--timeout", "5s"]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("machine-info should emit json");
    assert!(payload["schema_id"]
        .as_str()
        .is_some_and(|s| s.ends_with("machine-info.schema.json")));
    assert_eq!(payload["machine_info"]["id"], "mos.test");
    assert_eq!(payload["machine_info"]["model"], "mosprims");
    assert_eq!(payload["defects"].as_array().map(Vec::len), Some(0));
}

#[test]
fn status_reports_active_primary() {
    let listener = start_listener("mos.test");
    let output = against(listener.port, "mos.test", "status", &["--wait", "3s"]);

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status should emit json");
    assert_eq!(payload["active"], "primary");
    assert_eq!(payload["primary"]["connected"], true);
    assert!(payload["secondary"].is_null());
}

#[test]
fn listener_nacks_unknown_mos_id() {
    let listener = start_listener("mos.test");
    let output = against(listener.port, "someone.else", "machine-info", &["--timeout", "5s"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown mosID"), "stderr: {stderr}");
}

#[test]
fn machine_info_timeout_returns_124() {
    let output = against(unused_port(), "mos.test", "machine-info", &["--timeout", "1s"]);
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn status_without_peer_fails() {
    let output = against(unused_port(), "mos.test", "status", &["--wait", "500ms"]);
    assert_eq!(output.status.code(), Some(1));
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status should still print");
    assert_eq!(payload["active"], "none");
}
