//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use sticky_proxy::config::{ClusterConfig, ProxyConfig, StaticSrvRecord};
use sticky_proxy::discovery::{LocalIdentity, StaticResolver};
use sticky_proxy::http::HttpServer;
use sticky_proxy::lifecycle::Shutdown;
use sticky_proxy::proxy::ProxyRouter;
use sticky_proxy::session::cipher::generate_key;

pub const HOST: &str = "chat.test";
pub const SRV_NAME: &str = "_signalr._tcp.chat.test";

/// Read an HTTP request head.
async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
    })
}

/// Read an HTTP request head and return the `Host` header value.
async fn read_host(socket: &mut TcpStream) -> String {
    let head = read_head(socket).await;
    header_value(&head, "host").unwrap_or_default()
}

/// Start a mock backend that answers every request with the `Host` header it
/// received. The proxy sets `Host` to the chosen upstream, so the body names
/// the SRV target the request was routed to.
pub async fn start_host_echo_backend() -> SocketAddr {
    start_status_backend(200).await
}

/// Like [`start_host_echo_backend`] with a fixed status code.
pub async fn start_status_backend(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let host = read_host(&mut socket).await;
                        let status_text = match status {
                            200 => "200 OK",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            host.len(),
                            host
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn echo_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
        if socket.send(msg).await.is_err() {
            break;
        }
    }
}

async fn echo_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(echo_socket)
}

/// Start a backend that accepts every WebSocket handshake, then aborts the
/// connection with a TCP reset.
pub async fn start_resetting_websocket_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let key = header_value(&head, "sec-websocket-key").unwrap_or_default();
                let response = format!(
                    "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                    derive_accept_key(key.as_bytes())
                );
                let _ = socket.write_all(response.as_bytes()).await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = socket.set_zero_linger();
                drop(socket);
            });
        }
    });

    addr
}

/// Start a WebSocket backend echoing every message on `/hub`.
pub async fn start_websocket_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/hub", get(echo_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

pub fn srv(target: &str, port: u16) -> StaticSrvRecord {
    StaticSrvRecord {
        target: target.into(),
        port,
        priority: 0,
        weight: 0,
        addresses: vec![],
    }
}

/// One cluster serving [`HOST`], discovered via [`SRV_NAME`] on `port`.
pub fn proxy_config(port: u16) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.clusters.push(ClusterConfig {
        name: "chat".into(),
        hosts: vec![HOST.into()],
        discovery_name: SRV_NAME.into(),
        port,
        scheme: "http".into(),
        local_address: None,
        strategy: Default::default(),
    });
    config.discovery.interval_secs = 1;
    config.session.keys = vec![generate_key()];
    config.session.cookie_secure = false;
    config.observability.metrics_enabled = false;
    config.observability.debug_headers = true;
    config.timeouts.request_secs = 2;
    config
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub resolver: Arc<StaticResolver>,
    pub proxy: Arc<ProxyRouter>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a proxy answering SRV queries from `records`.
pub async fn start_proxy(config: ProxyConfig, records: Vec<StaticSrvRecord>) -> TestProxy {
    let resolver = Arc::new(StaticResolver::default());
    resolver.set(SRV_NAME, records);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::with_discovery(config, resolver.clone(), LocalIdentity::default()).unwrap();
    let proxy = server.proxy().clone();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy {
        addr,
        shutdown,
        resolver,
        proxy,
    }
}

/// `name=value` pair of the first Set-Cookie header, if any.
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn upstream_header(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("x-upstream-host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Wait out at least one discovery tick.
pub async fn next_discovery_tick() {
    tokio::time::sleep(Duration::from_millis(1_500)).await;
}
