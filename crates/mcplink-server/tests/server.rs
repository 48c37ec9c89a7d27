//! Server lifecycle tests driven by a bare client-side engine over the
//! in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mcplink_core::{
    Negotiated, ProtocolEngine, RequestContext, RequestOptions, Session, SessionState,
};
use mcplink_protocol::{
    ClientCapabilities, ErrorKind, Implementation, InitializeResult, LoggingLevel, McpResult,
    NegotiatedCapabilities, Role, ServerCapabilities,
};
use mcplink_server::{Server, ServerSession};
use mcplink_transport_traits::InMemoryTransport;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn add(params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
    let args = params.unwrap_or_default();
    let a = args["arguments"]["a"].as_i64().unwrap_or(0);
    let b = args["arguments"]["b"].as_i64().unwrap_or(0);
    Ok(json!({"content": [{"type": "text", "text": (a + b).to_string()}]}))
}

fn calculator() -> Server {
    Server::builder()
        .server_info(Implementation::new("calculator", "1.2.3"))
        .capabilities(ServerCapabilities::default().enable_tools(false))
        .instructions("Call add with a and b")
        .request_handler("tools/call", add)
        .build()
}

async fn serve(server: &Server) -> (ServerSession, InMemoryTransport) {
    let (client_side, server_side) = InMemoryTransport::pair();
    let session = server.serve(server_side).await.unwrap();
    (session, client_side)
}

async fn raw_client(
    transport: InMemoryTransport,
    capabilities: ClientCapabilities,
) -> ProtocolEngine {
    let session = Session::new(Role::Client).with_client_capabilities(capabilities);
    let engine = ProtocolEngine::new(Arc::new(transport), Arc::new(session));
    engine.start().await.unwrap();
    engine
}

/// Send `initialize` and record the outcome, without announcing `initialized`
async fn initialize(engine: &ProtocolEngine, version: &str) -> InitializeResult {
    let session = engine.session();
    session
        .transition(SessionState::Connecting, SessionState::Initializing)
        .unwrap();
    let client_caps = session.local_capabilities().client;
    let params = json!({
        "protocolVersion": version,
        "capabilities": client_caps,
        "clientInfo": {"name": "raw-client", "version": "0.0.1"}
    });
    let result = engine
        .send_request("initialize", Some(params), RequestOptions::default())
        .await
        .unwrap();
    let result: InitializeResult = serde_json::from_value(result).unwrap();
    session
        .complete_handshake(Negotiated {
            capabilities: NegotiatedCapabilities::new(client_caps, result.capabilities.clone()),
            protocol_version: result.protocol_version.clone(),
            peer_info: result.server_info.clone(),
            instructions: result.instructions.clone(),
        })
        .unwrap();
    result
}

async fn finish_handshake(engine: &ProtocolEngine) {
    engine
        .send_notification("notifications/initialized", None, None)
        .await
        .unwrap();
    let session = engine.session();
    session
        .transition(SessionState::Initializing, SessionState::Initialized)
        .unwrap();
    session
        .transition(SessionState::Initialized, SessionState::Operating)
        .unwrap();
}

async fn wait_for_state(session: &ServerSession, state: SessionState) {
    timeout(WAIT, async {
        while session.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("server stuck in {}", session.state()));
}

#[tokio::test]
async fn test_handshake_then_tool_call() {
    let hook_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hook_runs);
    let server = Server::builder()
        .server_info(Implementation::new("calculator", "1.2.3"))
        .capabilities(ServerCapabilities::default().enable_tools(false))
        .instructions("Call add with a and b")
        .request_handler("tools/call", add)
        .on_initialized(move |negotiated: &Negotiated| {
            assert_eq!(negotiated.peer_info.name, "raw-client");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let (session, client_side) = serve(&server).await;
    assert_eq!(session.state(), SessionState::Initializing);

    let client = raw_client(client_side, ClientCapabilities::default()).await;
    let result = initialize(&client, "2025-06-18").await;
    assert_eq!(result.protocol_version, "2025-06-18");
    assert_eq!(result.server_info, Implementation::new("calculator", "1.2.3"));
    assert_eq!(result.instructions.as_deref(), Some("Call add with a and b"));
    assert!(result.capabilities.tools.is_some());

    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert_eq!(session.client_info().unwrap().name, "raw-client");
    assert_eq!(session.protocol_version().as_deref(), Some("2025-06-18"));

    let reply = client
        .send_request(
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 2, "b": 40}})),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply["content"][0]["text"], "42");
}

#[tokio::test]
async fn test_requests_wait_for_initialized() {
    let (session, client_side) = serve(&calculator()).await;
    let client = raw_client(client_side, ClientCapabilities::default()).await;
    initialize(&client, "2025-06-18").await;

    let err = client
        .send_request(
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 1, "b": 1}})),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(err.message, "Server not initialized");

    // ping is always allowed
    client
        .send_request("ping", None, RequestOptions::default())
        .await
        .unwrap();

    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;
    let reply = client
        .send_request(
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 1, "b": 1}})),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply["content"][0]["text"], "2");
}

#[tokio::test]
async fn test_unknown_client_version_gets_latest() {
    let (_session, client_side) = serve(&calculator()).await;
    let client = raw_client(client_side, ClientCapabilities::default()).await;
    let result = initialize(&client, "2023-01-01").await;
    assert_eq!(
        result.protocol_version,
        mcplink_protocol::LATEST_PROTOCOL_VERSION
    );
}

#[tokio::test]
async fn test_second_initialize_is_rejected() {
    let (_session, client_side) = serve(&calculator()).await;
    let client = raw_client(client_side, ClientCapabilities::default()).await;
    initialize(&client, "2025-06-18").await;

    let err = client
        .send_request(
            "initialize",
            Some(json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "again", "version": "1"}
            })),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert_eq!(err.message, "Server already initialized");
}

#[tokio::test]
async fn test_handler_without_capability_fails_serve() {
    let server = Server::builder()
        .request_handler("tools/list", |_p: Option<Value>, _ctx: RequestContext| async move {
            McpResult::Ok(json!({"tools": []}))
        })
        .build();
    let (_client_side, server_side) = InMemoryTransport::pair();
    let err = server.serve(server_side).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);
}

#[tokio::test]
async fn test_log_messages_respect_client_level() {
    let server = Server::builder()
        .capabilities(ServerCapabilities::default().enable_logging())
        .build();
    let (session, client_side) = serve(&server).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = {
        let session = Session::new(Role::Client);
        let engine = ProtocolEngine::new(Arc::new(client_side), Arc::new(session));
        engine
            .set_notification_handler("notifications/message", move |params: Option<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(params.unwrap_or_default());
                    McpResult::Ok(())
                }
            })
            .unwrap();
        engine.start().await.unwrap();
        engine
    };
    initialize(&client, "2025-06-18").await;
    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;

    client
        .send_request(
            "logging/setLevel",
            Some(json!({"level": "warning"})),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(session.logging_level(), Some(LoggingLevel::Warning));

    session
        .send_log_message(LoggingLevel::Info, None, json!("chatty"))
        .await
        .unwrap();
    session
        .send_log_message(LoggingLevel::Error, Some("db"), json!({"failed": "connect"}))
        .await
        .unwrap();

    let message = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        message,
        json!({"level": "error", "logger": "db", "data": {"failed": "connect"}})
    );
    tokio_test::assert_err!(timeout(Duration::from_millis(200), rx.recv()).await);
}

#[tokio::test]
async fn test_server_requests_are_gated_on_client_capabilities() {
    let (session, client_side) = serve(&calculator()).await;
    let client = raw_client(
        client_side,
        ClientCapabilities::default().enable_roots(false),
    )
    .await;
    client
        .set_request_handler("roots/list", |_p: Option<Value>, _ctx: RequestContext| async move {
            McpResult::Ok(json!({"roots": [{"uri": "file:///srv", "name": "srv"}]}))
        })
        .unwrap();
    initialize(&client, "2025-06-18").await;
    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;

    let roots = session.list_roots().await.unwrap();
    assert_eq!(roots["roots"][0]["uri"], "file:///srv");

    let err = session
        .create_message(json!({"messages": [], "maxTokens": 10}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);
    let err = session.elicit(json!({"message": "name?"})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);
    assert_eq!(session.engine().pending_requests(), 0);
}

#[tokio::test]
async fn test_notifications_are_gated_on_server_capabilities() {
    let server = Server::builder()
        .capabilities(ServerCapabilities::default().enable_resources(true, false))
        .build();
    let (session, client_side) = serve(&server).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = {
        let session = Arc::new(Session::new(Role::Client));
        let engine = ProtocolEngine::new(Arc::new(client_side), session);
        engine
            .set_notification_handler(
                "notifications/resources/updated",
                move |params: Option<Value>| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(params.unwrap_or_default());
                        McpResult::Ok(())
                    }
                },
            )
            .unwrap();
        engine.start().await.unwrap();
        engine
    };
    initialize(&client, "2025-06-18").await;
    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;

    let err = session.notify_tools_list_changed().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);
    let err = session.notify_prompts_list_changed().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);

    session
        .notify_resource_updated("file:///srv/report.csv")
        .await
        .unwrap();
    let update = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(update, json!({"uri": "file:///srv/report.csv"}));
}

#[tokio::test]
async fn test_chained_initialized_handler_runs() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = Server::builder()
        .notification_handler("notifications/initialized", move |_params: Option<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                McpResult::Ok(())
            }
        })
        .build();
    let (session, client_side) = serve(&server).await;
    let client = raw_client(client_side, ClientCapabilities::default()).await;
    initialize(&client, "2025-06-18").await;
    finish_handshake(&client).await;

    timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Operating);
}

#[tokio::test]
async fn test_shutdown_closes_both_sides() {
    let (session, client_side) = serve(&calculator()).await;
    let client = raw_client(client_side, ClientCapabilities::default()).await;
    initialize(&client, "2025-06-18").await;
    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;

    session.shutdown().await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
    timeout(WAIT, client.wait_closed()).await.unwrap();
    timeout(WAIT, session.wait_closed()).await.unwrap();
    assert_eq!(client.state(), SessionState::Terminated);

    let err = session.notify_resources_list_changed().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_client_disconnect_terminates_session() {
    let (session, client_side) = serve(&calculator()).await;
    let client = raw_client(client_side, ClientCapabilities::default()).await;
    initialize(&client, "2025-06-18").await;
    finish_handshake(&client).await;
    wait_for_state(&session, SessionState::Operating).await;

    client.close().await.unwrap();
    timeout(WAIT, session.wait_closed()).await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
}
