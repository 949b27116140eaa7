//! Machine info example: a listener and a connection in one process.
//!
//! Run with:
//!   cargo run --example machine-info --features peer

use std::time::Duration;

use mosprims::model::{
    MachineInfo, MosString128, MosTime, MosType, PortType, Strictness, SupportedProfiles,
};
use mosprims::peer::{
    ChannelPorts, ConnectionConfig, ListenerConfig, MessageIdSequence, MosListener, ServerConnection,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let info = MachineInfo {
        manufacturer: MosString128::create("Example Corp", Strictness::Strict)?,
        model: MosString128::create("Playout 9000", Strictness::Strict)?,
        hw_rev: MosString128::default(),
        sw_rev: MosString128::create("1.0", Strictness::Strict)?,
        dom: MosString128::default(),
        sn: MosString128::default(),
        id: MosString128::create("playout.example", Strictness::Strict)?,
        time: MosTime::now(),
        op_time: None,
        mos_rev: MosString128::create("2.8.5", Strictness::Strict)?,
        supported_profiles: SupportedProfiles::default(),
    };
    let listener = MosListener::bind(
        "127.0.0.1:0",
        ListenerConfig {
            mos_id: "playout.example".into(),
            machine_info: Some(info),
            ..ListenerConfig::default()
        },
    )
    .await?;
    let port = listener.local_addr().port();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(listener.run(async {
        let _ = stopped.await;
    }));

    let config = ConnectionConfig::new("newsroom.example", "127.0.0.1")
        .with_ports(ChannelPorts {
            lower: port,
            ..ChannelPorts::default()
        })
        .with_channels([PortType::Lower]);
    let connection = ServerConnection::new(config, "playout.example", MessageIdSequence::new());
    connection.connect();
    connection.wait_connected(Duration::from_secs(3)).await?;

    let reply = connection.request_machine_info(Strictness::Strict).await?;
    eprintln!(
        "[client] {} {} (MOS {})",
        reply.value.manufacturer, reply.value.model, reply.value.mos_rev
    );

    connection.dispose().await;
    let _ = stop.send(());
    server.await??;
    Ok(())
}
