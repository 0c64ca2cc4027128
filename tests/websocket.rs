//! WebSocket upgrades through the proxy.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

mod common;

use common::{
    session_cookie, srv, start_proxy, start_resetting_websocket_backend, start_websocket_backend, HOST,
};

#[tokio::test]
async fn websocket_echo_keeps_session_pin() {
    let backend = start_websocket_backend().await;
    let port = backend.port();
    let proxy = start_proxy(common::proxy_config(port), vec![srv("127.0.0.1", port)]).await;

    // Negotiate first, like a SignalR client.
    let negotiate = reqwest::Client::new()
        .get(proxy.url("/hub"))
        .header("host", HOST)
        .send()
        .await
        .unwrap();
    let cookie = session_cookie(&negotiate).unwrap();

    let mut request = format!("ws://{}/hub", proxy.addr).into_client_request().unwrap();
    request.headers_mut().insert("host", HOST.parse().unwrap());
    request.headers_mut().insert("cookie", cookie.parse().unwrap());

    let (mut ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);
    assert!(response.headers().get("set-cookie").is_none());
    assert_eq!(
        response.headers()["x-upstream-host"].to_str().unwrap(),
        format!("127.0.0.1:{port}")
    );
    assert_eq!(proxy.proxy.connections().active_count(), 1);

    for text in ["hello", "world"] {
        ws.send(Message::text(text)).await.unwrap();
        let echoed = ws.next().await.unwrap().unwrap();
        assert_eq!(echoed.to_text().unwrap(), text);
    }

    ws.close(None).await.unwrap();
    while let Some(Ok(_)) = ws.next().await {}
    drop(ws);

    assert!(proxy.proxy.connections().wait_idle(Duration::from_secs(5)).await);
    let snapshot = proxy.proxy.metrics().snapshot();
    assert_eq!(snapshot.connections_established, 1);
    assert_eq!(snapshot.current_connections, 0);
    assert_eq!(snapshot.handshake_failures, 0);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn rejected_handshake_is_counted() {
    let backend = common::start_host_echo_backend().await;
    let port = backend.port();
    let proxy = start_proxy(common::proxy_config(port), vec![srv("127.0.0.1", port)]).await;

    let mut request = format!("ws://{}/hub", proxy.addr).into_client_request().unwrap();
    request.headers_mut().insert("host", HOST.parse().unwrap());

    // The backend answers 200, so the client handshake fails.
    assert!(tokio_tungstenite::connect_async(request).await.is_err());

    let snapshot = proxy.proxy.metrics().snapshot();
    assert_eq!(snapshot.connections_established, 1);
    assert_eq!(snapshot.handshake_failures, 1);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn upstream_reset_is_an_outbound_failure() {
    let backend = start_resetting_websocket_backend().await;
    let port = backend.port();
    let proxy = start_proxy(common::proxy_config(port), vec![srv("127.0.0.1", port)]).await;

    let mut request = format!("ws://{}/hub", proxy.addr).into_client_request().unwrap();
    request.headers_mut().insert("host", HOST.parse().unwrap());

    let (mut ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);

    // The tunnel ends when the backend resets; the client only sees a close.
    while let Some(Ok(_)) = ws.next().await {}
    drop(ws);

    assert!(proxy.proxy.connections().wait_idle(Duration::from_secs(5)).await);
    let snapshot = proxy.proxy.metrics().snapshot();
    assert_eq!(snapshot.connections_established, 1);
    assert_eq!(snapshot.outbound_failures, 1);
    assert_eq!(snapshot.current_connections, 0);

    proxy.shutdown.trigger();
}
