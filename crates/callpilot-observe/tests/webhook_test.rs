use axum::{extract::Extension, http::HeaderMap, routing::post, Json, Router};
use callpilot_observe::{deliver_webhook, EventPublisher, PublishError, WebhookBody};
use callpilot_types::{ChatMessage, EventsHook, LifecycleEventType, Role};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

type Received = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

async fn record(
    Extension(received): Extension<Received>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> &'static str {
    received.lock().unwrap().push((headers, body));
    "ok"
}

async fn start_receiver() -> (SocketAddr, Received) {
    let received: Received = Arc::default();
    let app = Router::new()
        .route("/hook", post(record))
        .route(
            "/broken",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        )
        .layer(Extension(received.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, received)
}

fn history() -> Vec<ChatMessage> {
    vec![
        ChatMessage::assistant("Hello, this is Ava."),
        ChatMessage::user("I need to reschedule."),
        ChatMessage::assistant("Sure, which day works?"),
        ChatMessage::user("Friday."),
    ]
}

#[tokio::test]
async fn test_conversation_ended_delivered_with_ordered_history() {
    let (addr, received) = start_receiver().await;
    let mut headers = HashMap::new();
    headers.insert("x-api-key".to_string(), "hook-secret".to_string());
    let hook = EventsHook {
        url: format!("http://{}/hook", addr),
        events: vec![LifecycleEventType::ConversationEnded],
        headers,
    };

    let publisher = EventPublisher::new(None, reqwest::Client::new());
    publisher
        .notify_webhook(&hook, LifecycleEventType::ConversationEnded, &history())
        .expect("hook subscribes to CONVERSATION_ENDED")
        .await
        .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (headers, body) = &received[0];
    assert_eq!(headers["x-api-key"], "hook-secret");
    assert_eq!(body["eventType"], "CONVERSATION_ENDED");

    let chat: Vec<ChatMessage> = serde_json::from_value(body["chatHistory"].clone()).unwrap();
    assert_eq!(chat, history());
    assert_eq!(chat[0].role, Role::Assistant);
}

#[tokio::test]
async fn test_wildcard_hook_receives_conversation_ended() {
    let (addr, received) = start_receiver().await;
    let hook = EventsHook {
        url: format!("http://{}/hook", addr),
        events: vec![LifecycleEventType::All],
        headers: HashMap::new(),
    };

    let publisher = EventPublisher::new(None, reqwest::Client::new());
    publisher
        .notify_webhook(&hook, LifecycleEventType::ConversationEnded, &history())
        .expect("ALL matches every event")
        .await
        .unwrap();

    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsubscribed_hook_is_never_called() {
    let (addr, received) = start_receiver().await;
    let hook = EventsHook {
        url: format!("http://{}/hook", addr),
        events: vec![LifecycleEventType::Created, LifecycleEventType::Tracked],
        headers: HashMap::new(),
    };

    let publisher = EventPublisher::new(None, reqwest::Client::new());
    assert!(publisher
        .notify_webhook(&hook, LifecycleEventType::ConversationEnded, &history())
        .is_none());

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_delivery_failure_is_reported_not_panicked() {
    let (addr, _received) = start_receiver().await;
    let hook = EventsHook {
        url: format!("http://{}/broken", addr),
        events: vec![LifecycleEventType::All],
        headers: HashMap::new(),
    };
    let body = WebhookBody {
        event_type: LifecycleEventType::ConversationEnded,
        chat_history: history(),
    };

    let err = deliver_webhook(&reqwest::Client::new(), &hook, &body)
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Webhook(_)));

    // The spawned delivery swallows the same failure.
    let publisher = EventPublisher::new(None, reqwest::Client::new());
    publisher
        .notify_webhook(&hook, LifecycleEventType::ConversationEnded, &history())
        .unwrap()
        .await
        .unwrap();
}
