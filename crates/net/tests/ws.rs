mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use q2net::{
    ClientConfig, ConnectError, ConnectionState, NetworkClient, NetworkEvent, TransportError,
    WsDialer,
};

use common::{IDENTIFICATION, print};

const WAIT: Duration = Duration::from_secs(2);

/// Accepts one websocket client, greets it after its first packet and
/// forwards everything it sends.
struct FakeWsServer {
    addr: SocketAddr,
    packets: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl FakeWsServer {
    async fn start(greeting: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (packet_tx, packets) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut greeted = false;

            while let Some(Ok(message)) = socket.next().await {
                let Message::Binary(packet) = message else {
                    continue;
                };
                let _ = packet_tx.send(packet);

                if !greeted {
                    greeted = true;
                    let mut out = 1u32.to_le_bytes().to_vec();
                    out.extend_from_slice(&1u32.to_le_bytes());
                    out.extend_from_slice(&greeting);
                    socket.send(Message::Binary(out)).await.unwrap();
                }
            }
        });

        Self {
            addr,
            packets,
            task,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for FakeWsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[tokio::test]
async fn test_ws_session_identifies_and_receives() {
    let mut server = FakeWsServer::start(print(2, "Welcome\n")).await;
    let client = NetworkClient::new(ClientConfig::default());
    let mut events = client.subscribe();

    client.connect(&server.url()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let hello = timeout(WAIT, server.packets.recv()).await.unwrap().unwrap();
    assert_eq!(&hello[8..10], &client.qport().to_le_bytes());
    assert_eq!(&hello[10..], IDENTIFICATION);

    let welcome = timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(NetworkEvent::Print { text, .. }) => return text,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(welcome, "Welcome\n");

    client.disconnect("User disconnected");
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let farewell = timeout(WAIT, server.packets.recv()).await.unwrap().unwrap();
    assert!(farewell.ends_with(b"disconnect\0"));
}

#[tokio::test]
async fn test_ws_server_close_ends_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Wait for the hello, then hang up.
        let _ = socket.next().await;
        socket.close(None).await.unwrap();
    });

    let client = NetworkClient::new(ClientConfig::default());
    let mut events = client.subscribe();
    client.connect(&url).await.unwrap();

    let reason = timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(NetworkEvent::Disconnected { reason }) => return reason,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .unwrap();

    assert!(!reason.is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    server.await.unwrap();
}

#[tokio::test]
async fn test_ws_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = NetworkClient::with_dialer(WsDialer::default(), ClientConfig::default());
    let result = client.connect_with_retries(&url, 0).await;

    assert!(matches!(
        result,
        Err(ConnectError::RetriesExhausted {
            attempts: 1,
            source: TransportError::Dial(_),
        })
    ));
    assert_eq!(client.state(), ConnectionState::Error);
}
