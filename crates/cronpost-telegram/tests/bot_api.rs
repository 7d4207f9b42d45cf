// TelegramGateway against a local stand-in for the Bot API.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use cronpost_core::config::TelegramConfig;
use cronpost_scheduler::{MessagingGateway, PhotoItem, SendTarget};
use cronpost_telegram::TelegramGateway;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct MockApi {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    fail_with: Option<u16>,
}

impl MockApi {
    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

async fn method(State(mock): State<MockApi>, Path(path): Path<String>, body: Bytes) -> (StatusCode, String) {
    let parsed = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
    let n = {
        let mut calls = mock.calls.lock().unwrap();
        calls.push((path.clone(), parsed.clone()));
        calls.len() as i64
    };

    if let Some(status) = mock.fail_with {
        let body = json!({"ok": false, "error_code": status, "description": "scripted failure"});
        return (StatusCode::from_u16(status).unwrap(), body.to_string());
    }

    let result = match path.rsplit('/').next().unwrap_or_default() {
        "sendMediaGroup" => {
            let count = parsed["media"].as_array().map(Vec::len).unwrap_or(2);
            json!((0..count as i64).map(|i| json!({"message_id": n * 10 + i})).collect::<Vec<_>>())
        }
        "deleteMessage" => json!(true),
        "getFile" => json!({"file_id": parsed["file_id"], "file_path": "photos/file_1.jpg"}),
        _ => json!({"message_id": n}),
    };
    (StatusCode::OK, json!({"ok": true, "result": result}).to_string())
}

async fn file(Path(path): Path<String>) -> (StatusCode, Vec<u8>) {
    assert!(path.ends_with("photos/file_1.jpg"), "{path}");
    (StatusCode::OK, vec![0xFF, 0xD8, 0xFF, 0xE0])
}

async fn serve(mock: MockApi) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/{*path}", post(method).get(file))
        .with_state(mock);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn gateway(api_base: String) -> TelegramGateway {
    TelegramGateway::new(&TelegramConfig {
        bot_token: "111:default".to_string(),
        api_base,
    })
    .unwrap()
}

fn target(bot_token: Option<&str>) -> SendTarget {
    SendTarget {
        chat_id: -100777,
        message_thread_id: None,
        bot_token: bot_token.map(str::to_string),
    }
}

#[tokio::test]
async fn send_text_returns_message_id() {
    let mock = MockApi::default();
    let gw = gateway(serve(mock.clone()).await);

    let id = gw.send_text(&target(None), "<b>hello</b>").await.unwrap();
    assert_eq!(id, "1");

    let calls = mock.calls();
    assert_eq!(calls[0].0, "bot111:default/sendMessage");
    assert_eq!(calls[0].1["parse_mode"], "HTML");
    assert_eq!(calls[0].1["chat_id"], -100777);
}

#[tokio::test]
async fn media_group_ids_keep_order() {
    let mock = MockApi::default();
    let gw = gateway(serve(mock.clone()).await);
    let items = [
        PhotoItem {
            photo_id: "p1".to_string(),
            caption: Some("cap".to_string()),
        },
        PhotoItem {
            photo_id: "p2".to_string(),
            caption: None,
        },
    ];

    let ids = gw.send_photo_group(&target(None), &items).await.unwrap();
    assert_eq!(ids, ["10", "11"]);
}

#[tokio::test]
async fn server_error_is_transient_with_status() {
    let mock = MockApi {
        fail_with: Some(500),
        ..MockApi::default()
    };
    let gw = gateway(serve(mock).await);

    let err = gw.send_text(&target(None), "hi").await.unwrap_err();
    assert_eq!(err.status, Some(500));
    assert!(err.is_transient());
}

#[tokio::test]
async fn forbidden_is_permanent() {
    let mock = MockApi {
        fail_with: Some(403),
        ..MockApi::default()
    };
    let gw = gateway(serve(mock).await);

    let err = gw.send_text(&target(None), "hi").await.unwrap_err();
    assert_eq!(err.status, Some(403));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn custom_bot_reuploads_photo() {
    let mock = MockApi::default();
    let gw = gateway(serve(mock.clone()).await);

    gw.send_photo(&target(Some("222:custom")), "AgADphoto", "caption")
        .await
        .unwrap();

    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "bot111:default/getFile");
    assert_eq!(calls[0].1["file_id"], "AgADphoto");
    assert_eq!(calls[1].0, "bot222:custom/sendPhoto");
    let form = calls[1].1.as_str().unwrap_or_default().to_string();
    assert!(form.contains("name=\"photo\""), "{form}");
    assert!(form.contains("name=\"caption\""), "{form}");
}

#[tokio::test]
async fn delete_message_sends_numeric_id() {
    let mock = MockApi::default();
    let gw = gateway(serve(mock.clone()).await);

    gw.delete_message(&target(None), "4242").await.unwrap();
    assert_eq!(mock.calls()[0].1["message_id"], 4242);

    let err = gw.delete_message(&target(None), "abc").await.unwrap_err();
    assert!(!err.is_transient());
}
