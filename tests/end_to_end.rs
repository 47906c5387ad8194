use std::sync::Arc;

use ask_api::{AskApiConfig, RetryPolicy};
use ask_stream::{ChannelObserver, SessionCoordinator, SessionUpdate};
use history_store::{HistoryStore, JsonFileHistoryStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Answers every connection with the same chunked event-stream body.
async fn serve_stream(body: &'static str) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("local TCP listener should bind");
    let base_url = format!("http://{}", listener.local_addr().expect("local address"));

    let handle = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buffer = [0_u8; 2048];
                loop {
                    match socket.read(&mut buffer).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buffer[..n]),
                    }
                    if request.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:X}\r\n{body}\r\n0\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (base_url, handle)
}

#[tokio::test]
async fn ask_streams_answer_into_json_history() {
    let (base_url, server) = serve_stream(concat!(
        ": keep-alive\n",
        "data: {\"delta\":\"Rust is \"}\n",
        "data: not-json\n",
        "data: {\"delta\":\"fast.\"}\n",
        "data: {\"finish\":true}\n",
    ))
    .await;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let history_path = dir.path().join(".ask").join("history.json");
    let history = Arc::new(JsonFileHistoryStore::new(&history_path));
    let (observer, mut updates) = ChannelObserver::channel();

    let coordinator = SessionCoordinator::from_config(
        AskApiConfig::new(&base_url).with_timeout(Duration::from_secs(5)),
        history.clone(),
        Arc::new(observer),
    )
    .expect("coordinator");

    let outcome = coordinator.ask("What is Rust?", "e2e-1").await;
    assert!(outcome.done, "{outcome:?}");

    let records = JsonFileHistoryStore::new(&history_path)
        .list()
        .expect("history file readable");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "e2e-1");
    assert_eq!(records[0].question, "What is Rust?");
    assert_eq!(records[0].answer, "Rust is fast.");

    let mut deltas = String::new();
    let mut finished = false;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::Event { event, .. } => {
                if let Some(delta) = event.delta_text() {
                    deltas.push_str(delta);
                }
                finished |= event.is_finish();
            }
            SessionUpdate::Error { message, .. } => panic!("unexpected error: {message}"),
            SessionUpdate::Attempt { attempt, .. } => assert_eq!(attempt, 1),
        }
    }
    assert_eq!(deltas, "Rust is fast.");
    assert!(finished);

    server.abort();
}

#[tokio::test]
async fn unreachable_service_fails_with_single_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("local TCP listener should bind");
    let base_url = format!("http://{}", listener.local_addr().expect("local address"));
    drop(listener);

    let history = Arc::new(history_store::InMemoryHistoryStore::new());
    let (observer, mut updates) = ChannelObserver::channel();
    let coordinator = SessionCoordinator::from_config(
        AskApiConfig::new(&base_url),
        history.clone(),
        Arc::new(observer),
    )
    .expect("coordinator")
    .with_retry_policy(RetryPolicy::default().with_base_delay(Duration::from_millis(1)));

    let outcome = coordinator.ask("anyone there?", "e2e-2").await;

    assert!(!outcome.done);
    assert!(history.list().expect("list").is_empty());
    let mut errors = 0;
    let mut attempts = 0;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::Error { .. } => errors += 1,
            SessionUpdate::Attempt { .. } => attempts += 1,
            SessionUpdate::Event { .. } => {}
        }
    }
    assert_eq!(errors, 1);
    assert_eq!(attempts, 3);
}
