//! Streamable HTTP against a live axum listener on 127.0.0.1:0

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use mcplink_http::{
    SESSION_ID_HEADER, SseEvent, SseParser, StaticTokenVerifier, StreamableHttpClientConfig,
    StreamableHttpClientTransport, StreamableHttpServerConfig, StreamableHttpServerTransport,
};
use mcplink_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
use mcplink_transport_traits::{
    AuthInfo, EventStore, InMemoryEventStore, SendOptions, StoredEvent, Transport,
    TransportError, TransportHandler, TransportResult,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

type Inbound = (Value, Option<AuthInfo>);

struct Recorder {
    tx: mpsc::UnboundedSender<Inbound>,
    closes: AtomicUsize,
}

impl TransportHandler for Recorder {
    fn on_message(&self, message: Value, auth: Option<AuthInfo>) {
        let _ = self.tx.send((message, auth));
    }
    fn on_error(&self, _error: TransportError) {}
    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Inbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(Recorder {
            tx,
            closes: AtomicUsize::new(0),
        }),
        rx,
    )
}

struct Server {
    transport: Arc<StreamableHttpServerTransport>,
    recorder: Arc<Recorder>,
    url: String,
    base: String,
}

/// Start a server whose requests are answered with `{"echo": <method>}` by a
/// background task; every notification is forwarded to the returned channel.
async fn serve(config: StreamableHttpServerConfig) -> (Server, mpsc::UnboundedReceiver<Inbound>) {
    let transport = Arc::new(StreamableHttpServerTransport::new(
        config.with_bind_addr("127.0.0.1:0"),
    ));
    let (recorder, mut inbound) = recorder();
    transport.set_handler(recorder.clone());
    transport.start().await.unwrap();

    let (notes_tx, notes_rx) = mpsc::unbounded_channel();
    let responder = Arc::clone(&transport);
    tokio::spawn(async move {
        while let Some((message, auth)) = inbound.recv().await {
            let docs = match message {
                Value::Array(items) => items,
                single => vec![single],
            };
            for doc in docs {
                match (doc.get("id"), doc.get("method").and_then(Value::as_str)) {
                    (Some(id), Some(method)) => {
                        let id: RequestId = serde_json::from_value(id.clone()).unwrap();
                        let reply = JsonRpcResponse::success(id.clone(), json!({"echo": method}));
                        let _ = responder
                            .send(
                                JsonRpcMessage::from(reply).into(),
                                SendOptions::related_to(id),
                            )
                            .await;
                    }
                    _ => {
                        let _ = notes_tx.send((doc, auth.clone()));
                    }
                }
            }
        }
    });

    let base = format!("http://{}", transport.local_addr().unwrap());
    (
        Server {
            url: format!("{base}/mcp"),
            base,
            transport,
            recorder,
        },
        notes_rx,
    )
}

fn initialize_body(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0"}
        }
    })
}

fn post(http: &reqwest::Client, url: &str, body: &Value) -> reqwest::RequestBuilder {
    http.post(url)
        .header("Accept", "application/json, text/event-stream")
        .json(body)
}

fn parse_sse(text: &str) -> Vec<SseEvent> {
    SseParser::new().feed(text.as_bytes())
}

async fn initialize(http: &reqwest::Client, url: &str) -> String {
    let response = post(http, url, &initialize_body(0)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let session = response.headers()[SESSION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let events = parse_sse(&response.text().await.unwrap());
    let reply: Value = serde_json::from_str(&events[0].data).unwrap();
    assert_eq!(reply["result"]["echo"], "initialize");
    session
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

async fn next_event(body: &mut ByteStream, parser: &mut SseParser) -> SseEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let chunk = body.next().await.expect("stream ended").unwrap();
            if let Some(event) = parser.feed(&chunk).into_iter().next() {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for SSE event")
}

#[tokio::test]
async fn test_session_is_assigned_on_initialize_and_required_afterwards() {
    let (server, mut notes) = serve(StreamableHttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});

    let early = post(&http, &server.url, &initialized).send().await.unwrap();
    assert_eq!(early.status(), 400);

    let session = initialize(&http, &server.url).await;
    assert_eq!(server.transport.session_id().as_deref(), Some(session.as_str()));

    let missing = post(&http, &server.url, &initialized).send().await.unwrap();
    assert_eq!(missing.status(), 400);

    let wrong = post(&http, &server.url, &initialized)
        .header(SESSION_ID_HEADER, "not-the-session")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 404);

    let accepted = post(&http, &server.url, &initialized)
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 202);
    let (note, _) = notes.recv().await.unwrap();
    assert_eq!(note["method"], "notifications/initialized");

    let again = post(&http, &server.url, &initialize_body(1))
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 400);
}

#[tokio::test]
async fn test_malformed_json_gets_parse_error() {
    let (server, _notes) = serve(StreamableHttpServerConfig::default()).await;
    let response = reqwest::Client::new()
        .post(&server.url)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_batch_stream_closes_after_all_responses() {
    let (server, _notes) = serve(StreamableHttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let session = initialize(&http, &server.url).await;

    let batch = json!([
        {"jsonrpc": "2.0", "id": 1, "method": "tools/list"},
        {"jsonrpc": "2.0", "method": "notifications/roots/list_changed"},
        {"jsonrpc": "2.0", "id": "two", "method": "prompts/list"}
    ]);
    let response = post(&http, &server.url, &batch)
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let events = parse_sse(&response.text().await.unwrap());
    let mut ids: Vec<Value> = events
        .iter()
        .map(|e| serde_json::from_str::<Value>(&e.data).unwrap()["id"].clone())
        .collect();
    ids.sort_by_key(Value::to_string);
    assert_eq!(ids, vec![json!("two"), json!(1)]);
}

#[tokio::test]
async fn test_json_response_mode() {
    let (server, _notes) =
        serve(StreamableHttpServerConfig::default().with_json_response(true)).await;
    let http = reqwest::Client::new();

    let response = post(&http, &server.url, &initialize_body(5)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key(SESSION_ID_HEADER));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"jsonrpc": "2.0", "id": 5, "result": {"echo": "initialize"}}));
}

#[tokio::test]
async fn test_related_notifications_share_the_request_stream_and_replay() {
    let store = Arc::new(InMemoryEventStore::new());
    let transport = Arc::new(StreamableHttpServerTransport::new(
        StreamableHttpServerConfig::default()
            .with_bind_addr("127.0.0.1:0")
            .with_event_store(store),
    ));
    let (recorder, mut inbound) = recorder();
    transport.set_handler(recorder);
    transport.start().await.unwrap();
    let url = format!("http://{}/mcp", transport.local_addr().unwrap());
    let http = reqwest::Client::new();

    let server = Arc::clone(&transport);
    let responder = tokio::spawn(async move {
        // initialize, then one tools/call answered with a progress note first
        for _ in 0..2 {
            let (message, _) = inbound.recv().await.unwrap();
            let id: RequestId = serde_json::from_value(message["id"].clone()).unwrap();
            if message["method"] == "tools/call" {
                let progress = JsonRpcNotification::new(
                    "notifications/progress",
                    Some(json!({"progressToken": id, "progress": 50})),
                );
                server
                    .send(
                        JsonRpcMessage::from(progress).into(),
                        SendOptions::related_to(id.clone()),
                    )
                    .await
                    .unwrap();
            }
            let reply = JsonRpcResponse::success(id.clone(), json!({}));
            server
                .send(JsonRpcMessage::from(reply).into(), SendOptions::related_to(id))
                .await
                .unwrap();
        }
    });

    let init = post(&http, &url, &initialize_body(0)).send().await.unwrap();
    let session = init.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
    let _ = init.text().await.unwrap();

    let call = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": "slow"}
    });
    let response = post(&http, &url, &call)
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    let events = parse_sse(&response.text().await.unwrap());
    responder.await.unwrap();

    assert_eq!(events.len(), 2);
    let first: Value = serde_json::from_str(&events[0].data).unwrap();
    assert_eq!(first["method"], "notifications/progress");
    let first_id = events[0].id.clone().expect("event ids with a store");

    let resumed = http
        .get(&url)
        .header("Accept", "text/event-stream")
        .header(SESSION_ID_HEADER, &session)
        .header("Last-Event-ID", &first_id)
        .send()
        .await
        .unwrap();
    assert_eq!(resumed.status(), 200);
    let mut body: ByteStream = Box::pin(resumed.bytes_stream());
    let mut parser = SseParser::new();
    let replayed = next_event(&mut body, &mut parser).await;
    assert_eq!(replayed.id, events[1].id);
    let reply: Value = serde_json::from_str(&replayed.data).unwrap();
    assert_eq!(reply["id"], 7);

    let second = http
        .get(&url)
        .header("Accept", "text/event-stream")
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
}

#[tokio::test]
async fn test_standalone_stream_receives_unrelated_messages() {
    let (server, _notes) = serve(StreamableHttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let session = initialize(&http, &server.url).await;

    let not_acceptable = http
        .get(&server.url)
        .header("Accept", "application/json")
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(not_acceptable.status(), 406);

    let stream = http
        .get(&server.url)
        .header("Accept", "text/event-stream")
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    let mut body: ByteStream = Box::pin(stream.bytes_stream());
    let mut parser = SseParser::new();

    let changed = JsonRpcNotification::new("notifications/tools/list_changed", None);
    server
        .transport
        .send(JsonRpcMessage::from(changed).into(), SendOptions::default())
        .await
        .unwrap();

    let event = next_event(&mut body, &mut parser).await;
    assert_eq!(event.event.as_deref(), Some("message"));
    let message: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(message["method"], "notifications/tools/list_changed");
}

/// Store whose replay lingers after reading, leaving a window before the
/// replaying stream is installed
#[derive(Debug, Default)]
struct LingeringReplay {
    inner: InMemoryEventStore,
    stored: parking_lot::Mutex<Vec<String>>,
    replaying: Notify,
}

#[async_trait::async_trait]
impl EventStore for LingeringReplay {
    async fn store_event(&self, stream_id: &str, message: Value) -> TransportResult<String> {
        let id = self.inner.store_event(stream_id, message).await?;
        self.stored.lock().push(id.clone());
        Ok(id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sender: mpsc::UnboundedSender<StoredEvent>,
    ) -> TransportResult<String> {
        let stream_id = self.inner.replay_events_after(last_event_id, sender).await?;
        self.replaying.notify_one();
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(stream_id)
    }
}

#[tokio::test]
async fn test_message_sent_during_replay_reaches_the_resumed_stream() {
    let store = Arc::new(LingeringReplay::default());
    let (server, _notes) =
        serve(StreamableHttpServerConfig::default().with_event_store(store.clone())).await;
    let http = reqwest::Client::new();
    let session = initialize(&http, &server.url).await;

    let before = JsonRpcNotification::new("notifications/message", Some(json!({"n": 1})));
    server
        .transport
        .send(JsonRpcMessage::from(before).into(), SendOptions::default())
        .await
        .unwrap();
    let last_event_id = store.stored.lock().last().cloned().unwrap();
    assert!(last_event_id.starts_with("standalone_"));

    let resume = {
        let http = http.clone();
        let url = server.url.clone();
        let session = session.clone();
        tokio::spawn(async move {
            http.get(&url)
                .header("Accept", "text/event-stream")
                .header(SESSION_ID_HEADER, &session)
                .header("Last-Event-ID", &last_event_id)
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::timeout(Duration::from_secs(2), store.replaying.notified())
        .await
        .unwrap();

    let during = JsonRpcNotification::new("notifications/message", Some(json!({"n": 2})));
    server
        .transport
        .send(JsonRpcMessage::from(during).into(), SendOptions::default())
        .await
        .unwrap();

    let resumed = resume.await.unwrap();
    assert_eq!(resumed.status(), 200);
    let mut body: ByteStream = Box::pin(resumed.bytes_stream());
    let mut parser = SseParser::new();
    let event = next_event(&mut body, &mut parser).await;
    let message: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(message["params"]["n"], 2);
}

#[tokio::test]
async fn test_delete_terminates_session_and_closes_transport() {
    let (server, _notes) = serve(StreamableHttpServerConfig::default()).await;
    let http = reqwest::Client::new();
    let session = initialize(&http, &server.url).await;

    let deleted = http
        .delete(&server.url)
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    assert_eq!(server.recorder.closes.load(Ordering::SeqCst), 1);
    assert_eq!(server.transport.session_id(), None);

    let note: JsonRpcPayload =
        JsonRpcMessage::from(JsonRpcNotification::new("notifications/message", None)).into();
    assert_eq!(
        server.transport.send(note, SendOptions::default()).await.unwrap_err(),
        TransportError::NotConnected
    );

    server.transport.close().await.unwrap();
    assert_eq!(server.recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delete_disallowed_and_unsupported_methods() {
    let config = StreamableHttpServerConfig {
        allow_delete: false,
        ..StreamableHttpServerConfig::default()
    };
    let (server, _notes) = serve(config).await;
    let http = reqwest::Client::new();

    let deleted = http.delete(&server.url).send().await.unwrap();
    assert_eq!(deleted.status(), 405);

    let put = http.put(&server.url).body("{}").send().await.unwrap();
    assert_eq!(put.status(), 405);
    let allow = put.headers()["allow"].to_str().unwrap();
    assert!(allow.contains("POST"));
    assert!(allow.contains("GET"));
}

#[tokio::test]
async fn test_bearer_token_is_verified_and_forwarded() {
    let verifier = StaticTokenVerifier::new().with_token("good", "client-1", ["tools"]);
    let (server, mut notes) =
        serve(StreamableHttpServerConfig::default().with_token_verifier(Arc::new(verifier))).await;
    let http = reqwest::Client::new();

    let rejected = post(&http, &server.url, &initialize_body(0))
        .bearer_auth("bad")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 401);
    assert!(rejected.headers().contains_key("www-authenticate"));

    let response = post(&http, &server.url, &initialize_body(0))
        .bearer_auth("good")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let session = response.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
    let _ = response.text().await.unwrap();

    post(
        &http,
        &server.url,
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .bearer_auth("good")
    .header(SESSION_ID_HEADER, &session)
    .send()
    .await
    .unwrap();
    let (_, auth) = notes.recv().await.unwrap();
    assert_eq!(auth.unwrap().client_id, "client-1");
}

#[tokio::test]
async fn test_client_transport_round_trip() {
    let (server, mut notes) = serve(StreamableHttpServerConfig::default()).await;

    let client = StreamableHttpClientTransport::new(StreamableHttpClientConfig::new(&server.base))
        .unwrap();
    let (handler, mut replies) = recorder();
    client.set_handler(handler.clone());
    client.start().await.unwrap();

    let init: JsonRpcPayload = JsonRpcMessage::from(JsonRpcRequest::new(
        0,
        "initialize",
        Some(initialize_body(0)["params"].clone()),
    ))
    .into();
    client.send(init, SendOptions::default()).await.unwrap();

    let (reply, _) = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply["result"]["echo"], "initialize");
    assert_eq!(client.session_id(), server.transport.session_id());

    let initialized: JsonRpcPayload = JsonRpcMessage::from(JsonRpcNotification::new(
        "notifications/initialized",
        None,
    ))
    .into();
    client.send(initialized, SendOptions::default()).await.unwrap();
    let (note, _) = notes.recv().await.unwrap();
    assert_eq!(note["method"], "notifications/initialized");

    client.close().await.unwrap();
    assert_eq!(handler.closes.load(Ordering::SeqCst), 1);
    assert_eq!(client.session_id(), None);

    // DELETE reached the server
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.recorder.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_reports_expired_session() {
    let (server, _notes) = serve(StreamableHttpServerConfig::default()).await;
    let client = StreamableHttpClientTransport::new(StreamableHttpClientConfig::new(&server.base))
        .unwrap();
    let (handler, _replies) = recorder();
    client.set_handler(handler);
    client.start().await.unwrap();
    client.set_session_id(Some("stale".to_string()));

    let ping: JsonRpcPayload = JsonRpcMessage::from(JsonRpcNotification::new(
        "notifications/initialized",
        None,
    ))
    .into();
    // The server has no session yet: 400, not a session expiry
    let err = client.send(ping.clone(), SendOptions::default()).await.unwrap_err();
    assert!(matches!(err, TransportError::SendFailed(_)));

    let http = reqwest::Client::new();
    initialize(&http, &server.url).await;
    let err = client.send(ping, SendOptions::default()).await.unwrap_err();
    assert!(matches!(err, TransportError::SessionExpired(_)));
    assert_eq!(client.session_id(), None);
}

#[tokio::test]
async fn test_router_answers_in_process() {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;

    let transport = StreamableHttpServerTransport::new(StreamableHttpServerConfig {
        allow_delete: false,
        ..StreamableHttpServerConfig::default()
    });
    let request = |method: Method| {
        Request::builder()
            .method(method)
            .uri("/mcp")
            .header(header::ACCEPT, "text/event-stream")
            .body(Body::empty())
            .unwrap()
    };

    let response = transport.router().oneshot(request(Method::PUT)).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST, DELETE");

    let response = transport.router().oneshot(request(Method::DELETE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST");

    // No session until a client initializes
    let response = transport.router().oneshot(request(Method::GET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = tokio_test::assert_ok!(to_bytes(response.into_body(), usize::MAX).await);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["message"], "Bad Request: Server not initialized");
}
