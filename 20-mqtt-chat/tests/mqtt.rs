use std::time::Duration;

use anyhow::Result;
use mqtt_chat::{
    ChatError, ChatSession, ConnectError, ConnectionParameters, ConnectionState, Identity,
    config::TransportKind,
};
use tokio::{net::TcpListener, time::timeout};

/// Upper bound on how long a failed connect may take in these tests.
const CONNECT_BUDGET: Duration = Duration::from_secs(5);

/// A localhost port with nothing listening on it.
async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

async fn params(transport: TransportKind) -> Result<ConnectionParameters> {
    let identity = Identity::new("alice")?;
    Ok(ConnectionParameters::new("127.0.0.1", identity)
        .with_port(closed_port().await?)
        .with_transport(transport)
        .with_connect_timeout(Duration::from_secs(2)))
}

#[tokio::test]
async fn unreachable_tcp_broker_fails_connect() -> Result<()> {
    let session = ChatSession::mqtt(params(TransportKind::Tcp).await?);

    let result = timeout(CONNECT_BUDGET, session.connect()).await?;
    assert!(
        matches!(
            result,
            Err(ChatError::Connect(ConnectError::Transport(_) | ConnectError::Timeout(_)))
        ),
        "unexpected connect result: {result:?}"
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn unreachable_websocket_broker_fails_connect() -> Result<()> {
    let session = ChatSession::mqtt(params(TransportKind::WebSocket).await?);

    let result = timeout(CONNECT_BUDGET, session.connect()).await?;
    assert!(matches!(result, Err(ChatError::Connect(_))), "unexpected connect result: {result:?}");
    assert!(!session.is_connected());
    Ok(())
}

#[tokio::test]
async fn silent_broker_times_out() -> Result<()> {
    // Accepts TCP but never answers the MQTT CONNECT.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let identity = Identity::new("alice")?;
    let params = ConnectionParameters::new("127.0.0.1", identity)
        .with_port(port)
        .with_transport(TransportKind::Tcp)
        .with_connect_timeout(Duration::from_secs(1));
    let session = ChatSession::mqtt(params);

    let result = timeout(CONNECT_BUDGET, session.connect()).await?;
    assert_eq!(
        result,
        Err(ChatError::Connect(ConnectError::Timeout(Duration::from_secs(1))))
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);

    silent.abort();
    Ok(())
}

#[tokio::test]
async fn failed_session_rejects_send_and_subscribe() -> Result<()> {
    let session = ChatSession::mqtt(params(TransportKind::Tcp).await?);
    let _ = timeout(CONNECT_BUDGET, session.connect()).await?;

    assert!(matches!(
        session.send("room1", "hi").await,
        Err(ChatError::NotConnected { operation: "send", .. })
    ));
    assert!(matches!(
        session.subscribe("room1", Default::default()).await,
        Err(ChatError::NotConnected { operation: "subscribe", .. })
    ));
    Ok(())
}
