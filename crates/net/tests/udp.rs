mod common;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use q2net::{
    ClientConfig, ConnectError, ConnectionState, NetworkClient, NetworkEvent, TransportError,
    UdpDialer,
};

use common::{IDENTIFICATION, config_string, frame, print, server_data};

const WAIT: Duration = Duration::from_secs(2);

enum Behavior {
    Accept { greeting: Vec<u8> },
    Reject(&'static str),
}

/// Minimal server side of the handshake plus one sequenced reply.
struct FakeServer {
    addr: SocketAddr,
    connects: mpsc::UnboundedReceiver<String>,
    packets: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl FakeServer {
    async fn start(behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (connect_tx, connects) = mpsc::unbounded_channel();
        let (packet_tx, packets) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let mut greeted = false;

            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let packet = &buf[..len];

                if let Some(text) = packet.strip_prefix(&[0xFFu8; 4]) {
                    let text = String::from_utf8_lossy(text).into_owned();
                    let reply = if text.starts_with("getchallenge") {
                        "challenge 1234".to_string()
                    } else if text.starts_with("connect") {
                        let _ = connect_tx.send(text);
                        match &behavior {
                            Behavior::Accept { .. } => "client_connect".to_string(),
                            Behavior::Reject(message) => format!("print\n{}\n", message),
                        }
                    } else {
                        continue;
                    };

                    let mut out = vec![0xFFu8; 4];
                    out.extend_from_slice(reply.as_bytes());
                    socket.send_to(&out, from).await.unwrap();
                    continue;
                }

                let _ = packet_tx.send(packet.to_vec());
                if let Behavior::Accept { greeting } = &behavior {
                    if !greeted {
                        greeted = true;
                        let mut out = 1u32.to_le_bytes().to_vec();
                        out.extend_from_slice(&1u32.to_le_bytes());
                        out.extend_from_slice(greeting);
                        socket.send_to(&out, from).await.unwrap();
                    }
                }
            }
        });

        Self {
            addr,
            connects,
            packets,
            task,
        }
    }

    fn url(&self) -> String {
        format!("udp://{}", self.addr)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[tokio::test]
async fn test_udp_session_handshake() {
    let mut server = FakeServer::start(Behavior::Accept {
        greeting: print(2, "Welcome\n"),
    })
    .await;
    let client = NetworkClient::new(ClientConfig::default());
    let mut events = client.subscribe();

    client.connect(&server.url()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let connect = timeout(WAIT, server.connects.recv()).await.unwrap().unwrap();
    assert!(connect.starts_with(&format!("connect 34 {} 1234 ", client.qport())));
    assert!(connect.contains("\"\\name\\Player\\fov\\90\""));

    let packet = timeout(WAIT, server.packets.recv()).await.unwrap().unwrap();
    assert_eq!(&packet[8..10], &client.qport().to_le_bytes());
    assert_eq!(&packet[10..], IDENTIFICATION);

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
}

#[tokio::test]
async fn test_udp_rejected_connect() {
    let server = FakeServer::start(Behavior::Reject("Server is full.")).await;
    let client = NetworkClient::new(ClientConfig::default());

    let result = client.connect_with_retries(&server.url(), 0).await;

    assert_eq!(
        result,
        Err(ConnectError::RetriesExhausted {
            attempts: 1,
            source: TransportError::Dial("Server is full.".into()),
        })
    );
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_udp_handshake_timeout() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let url = format!("udp://{}", silent.local_addr().unwrap());
    let client = NetworkClient::with_dialer(
        UdpDialer::new(Duration::from_millis(100)),
        ClientConfig::default(),
    );

    let result = client.connect_with_retries(&url, 0).await;

    assert!(matches!(
        result,
        Err(ConnectError::RetriesExhausted {
            source: TransportError::Timeout("challenge"),
            ..
        })
    ));
}

#[tokio::test]
async fn test_udp_server_query() {
    let mut greeting = server_data("baseq2");
    greeting.extend(config_string(0, "Fake Q2"));
    greeting.extend(config_string(31, "q2dm1"));
    greeting.extend(config_string(30, "8"));
    greeting.extend(config_string(1312, "Alice\\female/athena"));
    greeting.extend(frame(1));
    let server = FakeServer::start(Behavior::Accept { greeting }).await;
    let client = NetworkClient::new(ClientConfig::default());

    let info = client.query_server(&server.url()).await.unwrap();

    assert_eq!(info.address, server.url());
    assert_eq!(info.name, "Fake Q2");
    assert_eq!(info.map, "q2dm1");
    assert_eq!(info.players, 1);
    assert_eq!(info.max_players, 8);
    assert_eq!(info.gamemode, "baseq2");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
