mod common;

use std::time::Duration;

use common::{answer_all, custom, eventually, fast_client, sequence, MockPeer};
use mosprims_model::PortType;
use mosprims_peer::{ClientConfig, CommandError, CommandQueueClient, ConnectionEvent, Identity};
use mosprims_transport::Endpoint;
use tokio::sync::broadcast;

fn identity() -> Identity {
    Identity {
        mos_id: "mos.test".into(),
        ncs_id: "ncs.test".into(),
    }
}

fn spawn(port: u16, config: ClientConfig) -> (CommandQueueClient, broadcast::Receiver<ConnectionEvent>) {
    spawn_at(Endpoint::new("127.0.0.1", port), config)
}

fn spawn_at(endpoint: Endpoint, config: ClientConfig) -> (CommandQueueClient, broadcast::Receiver<ConnectionEvent>) {
    let (events, rx) = broadcast::channel(64);
    let client = CommandQueueClient::spawn(
        PortType::Lower,
        endpoint,
        identity(),
        config,
        sequence(),
        events,
    );
    (client, rx)
}

async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Failed connection attempts reported so far.
fn failed_attempts(events: &mut broadcast::Receiver<ConnectionEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::Warning { message, .. } = event {
            if message.starts_with("Socket") && message.contains(" error: ") {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test]
async fn commands_are_sent_in_order_with_fresh_ids() {
    let peer = MockPeer::start(answer_all).await;
    let (client, _events) = spawn(peer.port(), fast_client());
    client.connect();

    let pending: Vec<_> = ["roReq", "roCreate", "roDelete"]
        .into_iter()
        .map(|name| client.queue_command(custom(PortType::Lower, name)))
        .collect();
    for reply in pending {
        let reply = reply.wait().await.expect("peer acks every command");
        assert!(reply.ack().is_some());
    }

    let received = peer.commands();
    let kinds: Vec<_> = received.iter().filter_map(|m| m.kind()).collect();
    assert_eq!(kinds, ["roReq", "roCreate", "roDelete"]);
    let ids: Vec<_> = received.iter().filter_map(|m| m.message_id).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(received[0].mos_id.as_deref(), Some("mos.test"));
    assert_eq!(received[0].ncs_id.as_deref(), Some("ncs.test"));
}

#[tokio::test]
async fn unanswered_command_is_retried_once_then_fails() {
    let peer = MockPeer::start(|_| None).await;
    let (client, _events) = spawn(peer.port(), fast_client());
    client.connect();

    let err = client
        .execute(custom(PortType::Lower, "roReq"))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::SentTimeout { .. }), "{err:?}");

    let sent = peer.commands();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].message_id, sent[1].message_id);
}

#[tokio::test]
async fn nack_rejects_the_command() {
    let peer = MockPeer::start(|message| {
        Some(common::reply_with(
            message,
            mosprims_model::MosMessage::Ack {
                port: PortType::Lower,
                ack: mosprims_model::MosAck::nack("Invalid running order"),
            },
        ))
    })
    .await;
    let (client, _events) = spawn(peer.port(), fast_client());
    client.connect();

    let err = client
        .execute(custom(PortType::Lower, "roCreate"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CommandError::Nack {
            description: "Invalid running order".into()
        }
    );
}

#[tokio::test]
async fn command_times_out_in_queue_while_disconnected() {
    let port = unused_port().await;
    let config = ClientConfig {
        command_timeout: Duration::from_millis(100),
        ..fast_client()
    };
    let (client, _events) = spawn(port, config);
    client.connect();

    let err = client
        .execute(custom(PortType::Lower, "roReq"))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::QueueTimeout { .. }), "{err:?}");
    assert!(!client.is_connected());
}

#[tokio::test]
async fn reconnects_after_peer_restart() {
    let peer = MockPeer::start(answer_all).await;
    let (client, mut events) = spawn(peer.port(), fast_client());
    client.connect();
    client.execute(custom(PortType::Lower, "roReq")).await.unwrap();

    let addr = peer.stop().await;
    assert!(eventually(Duration::from_secs(2), || !client.is_connected()).await);

    let peer = MockPeer::start_on(addr, answer_all).await;
    assert!(eventually(Duration::from_secs(3), || client.is_connected()).await);
    client.execute(custom(PortType::Lower, "roReq")).await.unwrap();
    assert_eq!(peer.commands().len(), 1);

    let mut saw_reconnect_warning = false;
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::Warning { message, .. } = event {
            saw_reconnect_warning |= message == "Socket should reconnect";
        }
    }
    assert!(saw_reconnect_warning);
}

#[tokio::test]
async fn dispose_fails_outstanding_commands() {
    let port = unused_port().await;
    let config = ClientConfig {
        command_timeout: Duration::from_secs(30),
        ..fast_client()
    };
    let (client, _events) = spawn(port, config);
    let pending = client.queue_command(custom(PortType::Lower, "roReq"));

    client.dispose().await;
    assert_eq!(pending.wait().await.unwrap_err(), CommandError::Disposed);
    assert_eq!(
        client
            .execute(custom(PortType::Lower, "roReq"))
            .await
            .unwrap_err(),
        CommandError::Closed
    );
}

#[tokio::test]
async fn reconnect_attempts_stop_at_the_cap() {
    let port = unused_port().await;
    let config = ClientConfig {
        reconnect_delay: Duration::from_millis(100),
        reconnect_attempts: 2,
        ..fast_client()
    };
    let (client, mut events) = spawn(port, config);
    client.connect();

    tokio::time::sleep(Duration::from_millis(500)).await;
    // The first attempt plus two timer-driven retries.
    assert_eq!(failed_attempts(&mut events), 3);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(failed_attempts(&mut events), 0);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn no_retries_without_auto_reconnect() {
    let port = unused_port().await;
    let config = ClientConfig {
        auto_reconnect: false,
        ..fast_client()
    };
    let (client, mut events) = spawn(port, config);
    client.connect();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(failed_attempts(&mut events), 1);

    let peer = MockPeer::start_on(format!("127.0.0.1:{port}").parse().unwrap(), answer_all).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!client.is_connected());
    assert_eq!(failed_attempts(&mut events), 0);

    client.connect();
    assert!(eventually(Duration::from_secs(2), || client.is_connected()).await);
    client.execute(custom(PortType::Lower, "roReq")).await.unwrap();
    assert_eq!(peer.commands().len(), 1);
}

#[tokio::test]
async fn connect_attempt_is_bounded_by_connect_timeout() {
    // TEST-NET-1: never routed, so the attempt either hangs or fails at once.
    let config = ClientConfig {
        connect_timeout: Duration::from_millis(200),
        reconnect_delay: Duration::from_secs(30),
        ..fast_client()
    };
    let (client, mut events) = spawn_at(Endpoint::new("192.0.2.1", 10540), config);
    client.connect();

    let warning = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Warning { message, .. }) if message.contains(" error: ") => return message,
                Ok(_) => {}
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .expect("attempt gives up within the connect timeout");
    assert!(warning.starts_with("Socket lower 10540"), "{warning}");
    assert!(!client.is_connected());
}
