use futures_util::SinkExt;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, RawQuery,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use callpilot_ari::{
    wait_for_reachable, AriClient, AriConfig, AriError, AriEvent, ChannelSignal, ControlChannel,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const STASIS_START: &str = r#"{"type":"StasisStart","args":[],"channel":{"id":"chan-1","caller":{"number":"+15551230000"}}}"#;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr) -> AriConfig {
    AriConfig {
        url: format!("http://{}", addr),
        username: "bot".to_string(),
        secret: "s3cret".to_string(),
        app: "callpilot".to_string(),
        reachability_timeout_ms: 500,
        max_retries: 2,
        retry_base_ms: 10,
        retry_cap_ms: 20,
    }
}

async fn next(channel: &mut ControlChannel) -> ChannelSignal {
    tokio::time::timeout(Duration::from_secs(5), channel.next_signal())
        .await
        .expect("timed out waiting for signal")
        .expect("channel closed")
}

/// Sends one StasisStart and an unknown event on every connection, then
/// closes. Connections after the first `accept` are refused.
async fn events(
    ws: WebSocketUpgrade,
    Extension((connections, accept)): Extension<(Arc<AtomicUsize>, usize)>,
) -> Response {
    let n = connections.fetch_add(1, Ordering::SeqCst);
    if n >= accept {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket
            .send(Message::Text(r#"{"type":"DeviceStateChanged"}"#.into()))
            .await;
        let _ = socket.send(Message::Text(STASIS_START.into())).await;
        let _ = socket.close().await;
    })
}

fn events_app(accept: usize) -> (Router, Arc<AtomicUsize>) {
    let connections = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/ari/events", get(events))
        .layer(Extension((connections.clone(), accept)));
    (app, connections)
}

#[tokio::test]
async fn test_unreachable_engine_fails_within_window() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let started = std::time::Instant::now();
    let err = wait_for_reachable(&format!("http://{}", addr), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, AriError::Unreachable { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_reachable_engine_passes() {
    let (app, _) = events_app(1);
    let addr = serve(app).await;
    wait_for_reachable(&format!("http://{}", addr), Duration::from_secs(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_events_flow_and_reconnect_after_drop() {
    let (app, connections) = events_app(2);
    let addr = serve(app).await;

    let mut channel = ControlChannel::connect(reqwest::Client::new(), &config(addr))
        .await
        .unwrap();

    // Unknown events are filtered out before they reach the owner.
    match next(&mut channel).await {
        ChannelSignal::Event(AriEvent::StasisStart { channel, .. }) => {
            assert_eq!(channel.id, "chan-1")
        }
        other => panic!("expected StasisStart, got {:?}", other),
    }

    assert_eq!(next(&mut channel).await, ChannelSignal::Reconnecting { attempt: 1 });
    assert_eq!(next(&mut channel).await, ChannelSignal::Connected);
    assert!(matches!(
        next(&mut channel).await,
        ChannelSignal::Event(AriEvent::StasisStart { .. })
    ));
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_max_retries_exceeded_after_budget() {
    let (app, _) = events_app(1);
    let addr = serve(app).await;

    let mut channel = ControlChannel::connect(reqwest::Client::new(), &config(addr))
        .await
        .unwrap();

    assert!(matches!(next(&mut channel).await, ChannelSignal::Event(_)));
    assert_eq!(next(&mut channel).await, ChannelSignal::Reconnecting { attempt: 1 });
    assert_eq!(next(&mut channel).await, ChannelSignal::Reconnecting { attempt: 2 });
    assert_eq!(next(&mut channel).await, ChannelSignal::MaxRetriesExceeded);
    assert_eq!(channel.next_signal().await, None);
}

#[tokio::test]
async fn test_first_connect_failure_is_an_error() {
    let (app, _) = events_app(0);
    let addr = serve(app).await;
    let err = ControlChannel::connect(reqwest::Client::new(), &config(addr))
        .await
        .unwrap_err();
    assert!(matches!(err, AriError::Connect(_)));
}

// ── REST commands ────────────────────────────────────────────────────

type Commands = Arc<Mutex<Vec<String>>>;

async fn record_command(
    Extension(commands): Extension<Commands>,
    method: Method,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> StatusCode {
    assert!(headers.contains_key("authorization"));
    let line = match query {
        Some(q) => format!("{} /{}?{}", method, rest, q),
        None => format!("{} /{}", method, rest),
    };
    commands.lock().unwrap().push(line);
    if rest.starts_with("channels/gone") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

#[tokio::test]
async fn test_rest_commands_hit_ari_paths() {
    let commands: Commands = Arc::default();
    let app = Router::new()
        .route("/ari/{*rest}", any(record_command))
        .layer(Extension(commands.clone()));
    let addr = serve(app).await;

    let client = AriClient::new(reqwest::Client::new(), &config(addr)).unwrap();
    client.answer("c1").await.unwrap();
    client
        .play("c1", "sound:http://host/sounds/p1.sln16", "p1")
        .await
        .unwrap();
    client.stop_playback("p1").await.unwrap();
    client.send_dtmf("c1", "12#").await.unwrap();
    client.redirect("c1", "PJSIP/+15550001111@trunk").await.unwrap();
    client.hangup("c1").await.unwrap();

    let commands = commands.lock().unwrap().clone();
    assert_eq!(commands[0], "POST /channels/c1/answer");
    assert!(commands[1].starts_with("POST /channels/c1/play/p1?media=sound%3Ahttp"));
    assert_eq!(commands[2], "DELETE /playbacks/p1");
    assert_eq!(commands[3], "POST /channels/c1/dtmf?dtmf=12%23");
    assert!(commands[4].starts_with("POST /channels/c1/redirect?endpoint=PJSIP"));
    assert_eq!(commands[5], "DELETE /channels/c1");
}

#[tokio::test]
async fn test_rejected_command_maps_status() {
    let commands: Commands = Arc::default();
    let app = Router::new()
        .route("/ari/{*rest}", any(record_command))
        .layer(Extension(commands));
    let addr = serve(app).await;

    let client = AriClient::new(reqwest::Client::new(), &config(addr)).unwrap();
    let err = client.hangup("gone").await.unwrap_err();
    assert!(err.is_not_found());
}
