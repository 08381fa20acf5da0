//! End-to-end tests of the channel over a real WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};
use url::Url;

use topup_realtime::{
    ChannelError, ConnectionState, EventKind, OrderFilter, OrderStatus, OrderWatch, RealtimeOrderChannel,
    ReconnectPolicy, Transport, TransportError, WebSocketTransport,
};
use topup_protocol::ClientEvent;

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerWs = WebSocketStream<TcpStream>;

fn channel_for(url: Url, policy: ReconnectPolicy) -> RealtimeOrderChannel {
    let transport = WebSocketTransport::new(url, Duration::from_secs(2), policy);
    RealtimeOrderChannel::new(Arc::new(transport), OrderFilter::Subscribed)
}

async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("ws://{}/realtime", addr)).unwrap();
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn recv_frame(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsMessage::Close(_) => panic!("client closed while a frame was expected"),
            _ => {}
        }
    }
}

async fn send_frame(ws: &mut ServerWs, event: &str, data: Value) {
    let text = json!({ "event": event, "data": data }).to_string();
    ws.send(WsMessage::Text(text)).await.unwrap();
}

fn counter(channel: &RealtimeOrderChannel, kind: EventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    channel.on_fn(kind, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// Read until the socket closes so the client sees a clean shutdown.
async fn drain(mut ws: ServerWs) {
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_close() {
            break;
        }
    }
}

#[tokio::test]
async fn authenticates_subscribes_and_receives_order_updates() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let auth = recv_frame(&mut ws).await;
        assert_eq!(auth, json!({"event": "authenticate", "data": {"principalId": "user-42"}}));
        send_frame(&mut ws, "authenticated", json!({"principalId": "user-42"})).await;

        let subscribe = recv_frame(&mut ws).await;
        assert_eq!(
            subscribe,
            json!({"event": "subscribe_transaction", "data": {"orderId": "ORD-1"}})
        );
        send_frame(&mut ws, "subscribed", json!({"orderId": "ORD-1"})).await;
        send_frame(&mut ws, "transaction_update", json!({"orderId": "ORD-2", "status": "completed"})).await;
        send_frame(&mut ws, "payment_processing", json!({"orderId": "ORD-1"})).await;
        send_frame(&mut ws, "transaction_update", json!({"orderId": "ORD-1", "status": "completed"})).await;

        drain(ws).await;
    });

    let channel = channel_for(url, ReconnectPolicy::disabled());
    channel.connect("user-42").await.unwrap();
    assert_eq!(channel.connection().state, ConnectionState::Connected);

    let mut watch = OrderWatch::start(&channel, "ORD-1");
    let first = tokio::time::timeout(TIMEOUT, watch.next_update())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, Some(OrderStatus::Processing));

    let done = tokio::time::timeout(TIMEOUT, watch.wait_terminal())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.order_id.as_str(), "ORD-1");
    assert_eq!(done.status, Some(OrderStatus::Completed));
    assert!(channel.connection().is_authenticated());

    drop(watch);
    channel.disconnect().await;
    assert_eq!(channel.connection().state, ConnectionState::Closed);
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnect_reauthenticates_and_replays_subscriptions() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        assert_eq!(recv_frame(&mut first).await["event"], "authenticate");
        assert_eq!(recv_frame(&mut first).await["event"], "subscribe_transaction");
        // Unexpected drop, no close handshake
        drop(first);

        let mut second = accept(&listener).await;
        let auth = recv_frame(&mut second).await;
        assert_eq!(auth["event"], "authenticate");
        assert_eq!(auth["data"]["principalId"], "user-7");
        let replay = recv_frame(&mut second).await;
        assert_eq!(replay["event"], "subscribe_transaction");
        assert_eq!(replay["data"]["orderId"], "ORD-5");

        send_frame(&mut second, "payment_completed", json!({"orderId": "ORD-5"})).await;
        drain(second).await;
    });

    let policy = ReconnectPolicy {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        max_attempts: 5,
    };
    let channel = channel_for(url, policy);
    let reconnects = counter(&channel, EventKind::Reconnect);
    let disconnects = counter(&channel, EventKind::Disconnect);
    channel.connect("user-7").await.unwrap();
    let mut watch = OrderWatch::start(&channel, "ORD-5");

    let done = tokio::time::timeout(TIMEOUT, watch.wait_terminal())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, Some(OrderStatus::Completed));
    assert!(channel.is_subscribed("ORD-5"));

    assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(channel.connection().state, ConnectionState::Connected);

    drop(watch);
    channel.disconnect().await;
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn emit_is_deliverable_as_soon_as_open_returns() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let first = recv_frame(&mut ws).await;
        drain(ws).await;
        first
    });

    let transport = WebSocketTransport::new(url, Duration::from_secs(2), ReconnectPolicy::disabled());
    let (events, _events_rx) = mpsc::unbounded_channel();
    transport.open(events).await.unwrap();
    transport.emit(&ClientEvent::Ping).unwrap();
    transport.close().await;

    let first = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(first, json!({"event": "ping"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authenticate_reaches_the_server_on_every_connect() {
    for round in 0..10 {
        let (listener, url) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let auth = recv_frame(&mut ws).await;
            drain(ws).await;
            auth
        });

        let channel = channel_for(url, ReconnectPolicy::disabled());
        let principal = format!("user-{}", round);
        channel.connect(&principal).await.unwrap();
        // Queued frames are flushed before the close frame
        channel.disconnect().await;

        let auth = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
        assert_eq!(auth["event"], "authenticate", "round {}", round);
        assert_eq!(auth["data"]["principalId"], principal.as_str());
    }
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let (listener, url) = bind().await;
    drop(listener);

    let channel = channel_for(url, ReconnectPolicy::disabled());
    let err = channel.connect("user-1").await.unwrap_err();

    assert!(matches!(err, ChannelError::TransportConnect(_)));
    assert_eq!(channel.connection().state, ConnectionState::Disconnected);
    assert!(channel.connection().last_error.is_some());
}

#[tokio::test]
async fn non_websocket_scheme_is_rejected() {
    let url = Url::parse("http://127.0.0.1:1/realtime").unwrap();
    let channel = channel_for(url, ReconnectPolicy::disabled());

    let err = channel.connect("user-1").await.unwrap_err();
    assert!(matches!(
        err,
        ChannelError::TransportConnect(TransportError::InvalidUrl(_))
    ));
}
