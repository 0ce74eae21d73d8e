#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock Hyperion server for testing
//!
//! Accepts FlatBuffers clients on a random port, decodes every
//! length-prefixed request and records it.

use flatbuffers::{ForwardsUOffset, Table, Vector};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One decoded request
#[derive(Debug, Clone, PartialEq)]
pub enum HyperionMessage {
    Register { origin: String, priority: i32 },
    Clear { priority: i32 },
    Color { rgb: [u8; 3], duration: i32 },
    Image { data: Vec<u8>, width: i32, height: i32 },
}

#[derive(Default)]
struct MockHyperionState {
    messages: Vec<HyperionMessage>,
    connections: usize,
    clients: Vec<JoinHandle<()>>,
}

/// Mock Hyperion server
pub struct MockHyperionServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockHyperionState>>,
    handle: JoinHandle<()>,
}

impl MockHyperionServer {
    /// Start a mock Hyperion server on a random port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// Start on a specific address, e.g. to come back after `stop`.
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener)
    }

    fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockHyperionState::default()));

        let state_clone = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = state_clone.clone();
                let client = tokio::spawn(handle_connection(stream, state.clone()));
                let mut guard = state.lock().unwrap();
                guard.connections += 1;
                guard.clients.push(client);
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Get the server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn messages(&self) -> Vec<HyperionMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Close every client connection but keep listening.
    pub fn kick_clients(&self) {
        for client in self.state.lock().unwrap().clients.drain(..) {
            client.abort();
        }
    }

    /// Wait until `pred` holds for the recorded messages.
    pub async fn wait_for(&self, pred: impl Fn(&[HyperionMessage]) -> bool) -> Vec<HyperionMessage> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let messages = self.messages();
                if pred(&messages) {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hyperion mock did not see the expected messages")
    }

    /// Stop listening and drop every client.
    pub async fn stop(self) {
        self.kick_clients();
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<Mutex<MockHyperionState>>) {
    loop {
        let mut len = [0u8; 4];
        if stream.read_exact(&mut len).await.is_err() {
            return;
        }
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
        let message = decode_request(&body);
        state.lock().unwrap().messages.push(message);
    }
}

/// Decode a `hyperionnet.Request` body (length prefix already stripped).
pub fn decode_request(body: &[u8]) -> HyperionMessage {
    let root = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    // SAFETY: mock only; a malformed buffer fails the test.
    unsafe {
        let request = Table::new(body, root);
        let kind = request.get::<u8>(4, Some(0)).unwrap();
        let command = request.get::<ForwardsUOffset<Table>>(6, None).unwrap();
        match kind {
            1 => {
                let packed = command.get::<i32>(4, Some(0)).unwrap() as u32;
                HyperionMessage::Color {
                    rgb: [(packed >> 16) as u8, (packed >> 8) as u8, packed as u8],
                    duration: command.get::<i32>(6, Some(-1)).unwrap(),
                }
            }
            2 => {
                let raw = command.get::<ForwardsUOffset<Table>>(6, None).unwrap();
                HyperionMessage::Image {
                    data: raw
                        .get::<ForwardsUOffset<Vector<u8>>>(4, None)
                        .unwrap()
                        .bytes()
                        .to_vec(),
                    width: raw.get::<i32>(6, Some(-1)).unwrap(),
                    height: raw.get::<i32>(8, Some(-1)).unwrap(),
                }
            }
            3 => HyperionMessage::Clear {
                priority: command.get::<i32>(4, Some(0)).unwrap(),
            },
            4 => HyperionMessage::Register {
                origin: command
                    .get::<ForwardsUOffset<&str>>(4, None)
                    .unwrap()
                    .to_string(),
                priority: command.get::<i32>(6, Some(0)).unwrap(),
            },
            other => panic!("unknown hyperion command {}", other),
        }
    }
}
