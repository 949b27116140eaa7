//! Hot standby example: two listeners, one failover.
//!
//! The listener behind the active connection is stopped after the first
//! heartbeats; the controller moves the heartbeat to the other connection and
//! keeps serving commands.
//!
//! Run with:
//!   cargo run --example hot-standby --features peer

use std::time::Duration;

use mosprims::model::{MosMessage, PortType};
use mosprims::peer::{
    ActiveConnection, ChannelPorts, ConnectionConfig, DeviceConfig, HotStandbyController, ListenerConfig,
    MessageIdSequence, MosListener,
};
use tokio::sync::oneshot;

async fn start(mos_id: &str) -> Result<(u16, oneshot::Sender<()>), Box<dyn std::error::Error>> {
    let listener = MosListener::bind(
        "127.0.0.1:0",
        ListenerConfig {
            mos_id: mos_id.into(),
            ..ListenerConfig::default()
        },
    )
    .await?;
    let port = listener.local_addr().port();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(listener.run(async {
        let _ = stopped.await;
    }));
    Ok((port, stop))
}

fn connection(id: &str, port: u16) -> ConnectionConfig {
    ConnectionConfig::new(id, "127.0.0.1")
        .with_ports(ChannelPorts {
            lower: port,
            ..ChannelPorts::default()
        })
        .with_channels([PortType::Lower])
        .with_heartbeat_interval(Duration::from_millis(500))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (primary_port, stop_primary) = start("playout.example").await?;
    let (secondary_port, stop_secondary) = start("playout.example").await?;

    let config = DeviceConfig {
        mos_id: "playout.example".into(),
        primary: connection("newsroom.example", primary_port),
        secondary: Some(connection("newsroom.example", secondary_port)),
        hot_standby: true,
        ..DeviceConfig::default()
    };
    let controller = HotStandbyController::new(&config, MessageIdSequence::new());
    controller.connect();
    controller.primary().wait_connected(Duration::from_secs(3)).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    eprintln!("[device] active: {:?}", controller.active());

    let before = controller.active();
    let (stop, _keep) = match before {
        ActiveConnection::Secondary => (stop_secondary, stop_primary),
        _ => (stop_primary, stop_secondary),
    };
    let _ = stop.send(());
    while controller.active() == before {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    eprintln!("[device] active after failover: {:?}", controller.active());

    let reply = controller.execute(MosMessage::heartbeat(PortType::Lower)).await?;
    eprintln!("[device] heartbeat answered: {}", reply.is_heartbeat());

    controller.dispose().await;
    Ok(())
}
