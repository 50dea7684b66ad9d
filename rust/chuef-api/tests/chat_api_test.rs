mod common;

use std::time::Duration;

use common::{TestServer, session_for, test_config};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

#[tokio::test]
async fn test_health_and_ready() {
    let server = TestServer::start(test_config()).await;

    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = server.client.get(server.url("/ready")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["redis"], "disabled");
}

#[tokio::test]
async fn test_history_is_oldest_first_per_room() {
    let server = TestServer::start(test_config()).await;
    let token = session_for(Uuid::new_v4(), None);

    for (text, room) in [("one", "lobby"), ("elsewhere", "garden"), ("two", "lobby")] {
        let resp = server
            .ingest(
                &json!({"kind": "chat_message", "text": text, "room": room}),
                "10.1.0.1",
                Some(&token),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let resp = server
        .client
        .get(server.url("/api/chat/messages?room=lobby"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["room"], "lobby");
    let texts: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, ["one", "two"]);

    let resp = server
        .client
        .get(server.url("/api/chat/messages?room=lobby&limit=1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["text"], "two");
}

#[tokio::test]
async fn test_stream_delivers_new_messages() {
    let server = TestServer::start(test_config()).await;
    let user_id = Uuid::new_v4();
    let token = session_for(user_id, None);

    let mut stream = server
        .client
        .get(server.url("/api/chat/stream?room=lobby"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(
        stream.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    for (text, room) in [("not for lobby", "garden"), ("hello lobby", "lobby")] {
        let resp = server
            .ingest(
                &json!({"kind": "chat_message", "text": text, "room": room}),
                "10.1.0.2",
                Some(&token),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let mut received = String::new();
    let read = tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains("hello lobby") {
            let Some(chunk) = stream.chunk().await.unwrap() else {
                break;
            };
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await;
    assert!(read.is_ok(), "no chat event within timeout: {received:?}");

    assert!(received.contains("event: message"));
    assert!(received.contains(&user_id.to_string()));
    assert!(!received.contains("not for lobby"));
}
