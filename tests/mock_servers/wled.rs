#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock WLED device for testing
//!
//! A UDP socket that records realtime datagrams (DDP, DRGB, DNRGB) and an
//! HTTP server answering `GET /json/info`.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// What `/json/info` reports
#[derive(Debug, Clone)]
pub struct MockWledInfo {
    pub name: String,
    pub version: String,
    pub led_count: u32,
}

impl Default for MockWledInfo {
    fn default() -> Self {
        Self {
            name: "Mock WLED".to_string(),
            version: "0.14.4".to_string(),
            led_count: 60,
        }
    }
}

/// Mock WLED device
pub struct MockWledDevice {
    udp_addr: SocketAddr,
    http_addr: SocketAddr,
    datagrams: Arc<Mutex<Vec<Vec<u8>>>>,
    udp_handle: JoinHandle<()>,
    http_handle: JoinHandle<()>,
}

impl MockWledDevice {
    /// Start both listeners on random ports
    pub async fn start(info: MockWledInfo) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp_addr = socket.local_addr().unwrap();
        let datagrams = Arc::new(Mutex::new(Vec::new()));

        let sink = datagrams.clone();
        let udp_handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((n, _)) = socket.recv_from(&mut buf).await {
                sink.lock().unwrap().push(buf[..n].to_vec());
            }
        });

        let app = Router::new()
            .route("/json/info", get(handle_info))
            .with_state(Arc::new(info));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = listener.local_addr().unwrap();
        let http_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            udp_addr,
            http_addr,
            datagrams,
            udp_handle,
            http_handle,
        }
    }

    /// Realtime (UDP) address
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// HTTP API address
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        self.datagrams.lock().unwrap().clone()
    }

    pub fn clear_datagrams(&self) {
        self.datagrams.lock().unwrap().clear();
    }

    /// Wait until at least `count` datagrams arrived.
    pub async fn wait_for_datagrams(&self, count: usize) -> Vec<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let datagrams = self.datagrams();
                if datagrams.len() >= count {
                    return datagrams;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("wled mock did not receive enough datagrams")
    }

    /// Stop the mock device
    pub async fn stop(self) {
        self.udp_handle.abort();
        self.http_handle.abort();
    }
}

async fn handle_info(State(info): State<Arc<MockWledInfo>>) -> Json<Value> {
    Json(json!({
        "ver": info.version,
        "name": info.name,
        "leds": { "count": info.led_count, "rgbw": false },
        "udpport": 21324,
        "arch": "esp32",
    }))
}
