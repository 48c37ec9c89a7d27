//! Protocol engine behavior over a scripted transport (raw wire view) and
//! over a linked in-memory pair (engine to engine).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use mcplink_core::{
    CancellationToken, Negotiated, ProtocolEngine, RequestContext, RequestOptions, Session,
    SessionState,
};
use mcplink_protocol::{
    ClientCapabilities, ErrorKind, Implementation, JsonRpcPayload, McpError, McpResult,
    NegotiatedCapabilities, RequestId, Role, ServerCapabilities,
};
use mcplink_transport_traits::{
    AuthInfo, HandlerSlot, InMemoryTransport, SendOptions, Transport, TransportCapabilities,
    TransportError, TransportFuture, TransportHandler, TransportState, TransportType,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Transport whose inbound side is driven by the test and whose outbound
/// side is captured as JSON.
#[derive(Debug)]
struct Scripted {
    slot: HandlerSlot,
    started: AtomicBool,
    outbound: mpsc::UnboundedSender<Value>,
    capabilities: TransportCapabilities,
}

impl Scripted {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            slot: HandlerSlot::new(),
            started: AtomicBool::new(false),
            outbound,
            capabilities: TransportCapabilities::default(),
        });
        (transport, rx)
    }

    fn inject(&self, document: Value) {
        self.slot.message(document, None);
    }

    fn inject_with_auth(&self, document: Value, auth: AuthInfo) {
        self.slot.message(document, Some(auth));
    }

    fn hang_up(&self) {
        self.slot.close();
    }
}

impl Transport for Scripted {
    fn transport_type(&self) -> TransportType {
        TransportType::InMemory
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    fn state(&self) -> TransportState {
        if self.slot.is_closed() {
            TransportState::Disconnected
        } else {
            TransportState::Connected
        }
    }

    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.slot.set(handler);
    }

    fn start(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn send(&self, payload: JsonRpcPayload, _options: SendOptions) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.started.load(Ordering::SeqCst) || self.slot.is_closed() {
                return Err(TransportError::NotConnected);
            }
            let value = serde_json::to_value(&payload)?;
            self.outbound
                .send(value)
                .map_err(|_| TransportError::ConnectionLost("test dropped".to_string()))
        })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.slot.close();
            Ok(())
        })
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Value>) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected message: {outcome:?}");
}

fn negotiated(client: ClientCapabilities, server: ServerCapabilities) -> Negotiated {
    Negotiated {
        capabilities: NegotiatedCapabilities::new(client, server),
        protocol_version: mcplink_protocol::LATEST_PROTOCOL_VERSION.to_string(),
        peer_info: Implementation::new("peer", "0.0.1"),
        instructions: None,
    }
}

fn full_server_caps() -> ServerCapabilities {
    ServerCapabilities::default()
        .enable_tools(true)
        .enable_resources(true, true)
        .enable_prompts(true)
        .enable_logging()
        .enable_completions()
}

/// Walk a started engine's session through the handshake states
fn operate(engine: &ProtocolEngine, outcome: Negotiated) {
    let session = engine.session();
    session
        .transition(SessionState::Connecting, SessionState::Initializing)
        .unwrap();
    session.complete_handshake(outcome).unwrap();
    session
        .transition(SessionState::Initializing, SessionState::Initialized)
        .unwrap();
    session
        .transition(SessionState::Initialized, SessionState::Operating)
        .unwrap();
}

async fn scripted_server(
    capabilities: ServerCapabilities,
) -> (ProtocolEngine, Arc<Scripted>, mpsc::UnboundedReceiver<Value>) {
    let (transport, sent) = Scripted::new();
    let session = Session::new(Role::Server).with_server_capabilities(capabilities);
    let engine = ProtocolEngine::new(transport.clone(), Arc::new(session));
    (engine, transport, sent)
}

async fn scripted_client(
    server: ServerCapabilities,
) -> (ProtocolEngine, Arc<Scripted>, mpsc::UnboundedReceiver<Value>) {
    let (transport, sent) = Scripted::new();
    let engine = ProtocolEngine::new(transport.clone(), Arc::new(Session::new(Role::Client)));
    engine.start().await.unwrap();
    operate(&engine, negotiated(ClientCapabilities::default(), server));
    (engine, transport, sent)
}

/// Client and server engines over an in-memory pair, not yet started
fn linked_pair() -> (ProtocolEngine, ProtocolEngine) {
    let (a, b) = InMemoryTransport::pair();
    let client = ProtocolEngine::new(Arc::new(a), Arc::new(Session::new(Role::Client)));
    let server = ProtocolEngine::new(
        Arc::new(b),
        Arc::new(Session::new(Role::Server).with_server_capabilities(full_server_caps())),
    );
    (client, server)
}

async fn bring_up(client: &ProtocolEngine, server: &ProtocolEngine) {
    server.start().await.unwrap();
    client.start().await.unwrap();
    operate(server, negotiated(ClientCapabilities::default(), full_server_caps()));
    operate(client, negotiated(ClientCapabilities::default(), full_server_caps()));
}

#[tokio::test]
async fn test_ping_is_answered_before_initialization() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    server.start().await.unwrap();
    assert_eq!(server.state(), SessionState::Connecting);

    transport.inject(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));
    assert_eq!(
        next(&mut sent).await,
        json!({"jsonrpc": "2.0", "id": 1, "result": {}})
    );
}

#[tokio::test]
async fn test_timeout_removes_pending_and_discards_late_reply() {
    let (client, transport, mut sent) = scripted_client(full_server_caps()).await;

    let started = Instant::now();
    let err = client
        .send_request(
            "tools/call",
            Some(json!({"name": "slow"})),
            RequestOptions::new()
                .with_timeout(Duration::from_millis(100))
                .with_request_id("abc"),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind, ErrorKind::RequestTimeout);
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(client.pending_requests(), 0);

    let request = next(&mut sent).await;
    assert_eq!(request["id"], "abc");
    let cancel = next(&mut sent).await;
    assert_eq!(cancel["method"], "notifications/cancelled");
    assert_eq!(cancel["params"]["requestId"], "abc");

    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.inject(json!({"jsonrpc": "2.0", "id": "abc", "result": {"late": true}}));

    // Still healthy after the stray reply.
    transport.inject(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}));
    assert_eq!(
        next(&mut sent).await,
        json!({"jsonrpc": "2.0", "id": 2, "result": {}})
    );
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_notification_dispatch_sends_no_reply() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    let (tx, mut seen) = mpsc::unbounded_channel();
    server
        .set_notification_handler("notifications/progress", move |params: Option<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(params);
                McpResult::Ok(())
            }
        })
        .unwrap();
    server.start().await.unwrap();

    transport.inject(json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}}));
    assert_eq!(next(&mut seen).await, Some(json!({})));
    assert_silent(&mut sent).await;
}

#[tokio::test]
async fn test_notifications_are_handled_in_order() {
    let (server, transport, _sent) = scripted_server(ServerCapabilities::default()).await;
    let (tx, mut seen) = mpsc::unbounded_channel();
    server
        .set_fallback_notification_handler(move |params: Option<Value>| {
            let tx = tx.clone();
            async move {
                let n = params.as_ref().and_then(|p| p["n"].as_u64()).unwrap_or(0);
                // Later notifications finish faster; order must still hold.
                tokio::time::sleep(Duration::from_millis(20 - n * 4)).await;
                let _ = tx.send(n);
                McpResult::Ok(())
            }
        })
        .unwrap();
    server.start().await.unwrap();

    for n in 0..5 {
        transport.inject(json!({"jsonrpc": "2.0", "method": "vendor/tick", "params": {"n": n}}));
    }
    let mut order = Vec::new();
    for _ in 0..5 {
        order.push(next(&mut seen).await);
    }
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

async fn exploding(_params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_panicking_handler_gets_exactly_one_reply() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    server.set_request_handler("vendor/explode", exploding).unwrap();
    server.start().await.unwrap();
    operate(&server, negotiated(ClientCapabilities::default(), ServerCapabilities::default()));

    transport.inject(json!({"jsonrpc": "2.0", "id": 3, "method": "vendor/explode"}));
    assert_eq!(
        next(&mut sent).await,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32603, "message": "request handler panicked"}
        })
    );

    transport.inject(json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}));
    assert_eq!(next(&mut sent).await["id"], 4);
}

async fn exploding_notification(_params: Option<Value>) -> McpResult<()> {
    panic!("notification handler exploded")
}

#[tokio::test]
async fn test_panicking_notification_handler_keeps_the_queue_running() {
    let (server, transport, _sent) = scripted_server(ServerCapabilities::default()).await;
    let (tx, mut seen) = mpsc::unbounded_channel();
    server
        .set_notification_handler("notifications/boom", exploding_notification)
        .unwrap();
    server
        .set_notification_handler("notifications/after", move |params: Option<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(params);
                McpResult::Ok(())
            }
        })
        .unwrap();
    server.start().await.unwrap();

    transport.inject(json!({"jsonrpc": "2.0", "method": "notifications/boom"}));
    transport.inject(json!({
        "jsonrpc": "2.0",
        "method": "notifications/after",
        "params": {"n": 1}
    }));
    assert_eq!(next(&mut seen).await, Some(json!({"n": 1})));
}

#[tokio::test]
async fn test_notification_without_negotiated_capability_is_dropped() {
    let (client, transport, _sent) =
        scripted_client(ServerCapabilities::default().enable_tools(true)).await;
    let (tx, mut seen) = mpsc::unbounded_channel();
    for method in [
        "notifications/resources/updated",
        "notifications/tools/list_changed",
    ] {
        let tx = tx.clone();
        client
            .set_notification_handler(method, move |_params: Option<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(method);
                    McpResult::Ok(())
                }
            })
            .unwrap();
    }

    transport.inject(json!({
        "jsonrpc": "2.0",
        "method": "notifications/resources/updated",
        "params": {"uri": "file:///a"}
    }));
    transport.inject(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}));
    assert_eq!(next(&mut seen).await, "notifications/tools/list_changed");
    let outcome = tokio::time::timeout(Duration::from_millis(100), seen.recv()).await;
    assert!(outcome.is_err(), "gated notification reached its handler");
}

#[tokio::test]
async fn test_premature_request_gets_error_until_initialized() {
    let (server, transport, mut sent) =
        scripted_server(ServerCapabilities::default().enable_tools(false)).await;
    server
        .set_request_handler("tools/list", |_p: Option<Value>, _ctx: RequestContext| async {
            McpResult::Ok(json!({"tools": []}))
        })
        .unwrap();
    server.start().await.unwrap();
    server
        .session()
        .transition(SessionState::Connecting, SessionState::Initializing)
        .unwrap();

    transport.inject(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}));
    let reply = next(&mut sent).await;
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["error"]["message"], "Server not initialized");

    transport.inject(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    transport.inject(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}));
    assert_eq!(
        next(&mut sent).await,
        json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": []}})
    );
    assert_eq!(server.state(), SessionState::Initialized);
}

#[tokio::test]
async fn test_unknown_method_and_invalid_messages() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    server.start().await.unwrap();
    operate(&server, negotiated(ClientCapabilities::default(), ServerCapabilities::default()));

    transport.inject(json!({"jsonrpc": "2.0", "id": 9, "method": "vendor/missing"}));
    let reply = next(&mut sent).await;
    assert_eq!(reply["id"], 9);
    assert_eq!(reply["error"]["code"], -32601);

    transport.inject(json!({"jsonrpc": "1.0", "id": 5, "method": "ping"}));
    let reply = next(&mut sent).await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["error"]["code"], -32600);

    transport.inject(json!({"unrelated": true}));
    assert_silent(&mut sent).await;

    transport.inject(json!([]));
    let reply = next(&mut sent).await;
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn test_batch_elements_are_each_answered() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    server.start().await.unwrap();

    transport.inject(json!([
        {"jsonrpc": "2.0", "id": 1, "method": "ping"},
        {"jsonrpc": "2.0", "method": "notifications/whatever"},
        {"jsonrpc": "2.0", "id": 2, "method": "ping"}
    ]));
    let ids: HashSet<i64> = [next(&mut sent).await, next(&mut sent).await]
        .iter()
        .map(|reply| reply["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, HashSet::from([1, 2]));
    assert_silent(&mut sent).await;
}

#[tokio::test]
async fn test_auth_reaches_the_handler() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    server
        .set_request_handler("whoami", |_p: Option<Value>, ctx: RequestContext| async move {
            McpResult::Ok(json!({"client": ctx.auth().map(|a| a.client_id.clone())}))
        })
        .unwrap();
    server.start().await.unwrap();
    operate(&server, negotiated(ClientCapabilities::default(), ServerCapabilities::default()));

    let auth = AuthInfo {
        token: "t".to_string(),
        client_id: "client-7".to_string(),
        ..AuthInfo::default()
    };
    transport.inject_with_auth(json!({"jsonrpc": "2.0", "id": 1, "method": "whoami"}), auth);
    assert_eq!(next(&mut sent).await["result"]["client"], "client-7");
}

#[tokio::test]
async fn test_duplicate_handlers_are_rejected() {
    let (server, _transport, _sent) =
        scripted_server(ServerCapabilities::default().enable_tools(false)).await;
    let handler = |_p: Option<Value>, _ctx: RequestContext| async { McpResult::Ok(json!({})) };

    server.set_request_handler("tools/call", handler).unwrap();
    let err = server.set_request_handler("tools/call", handler).unwrap_err();
    assert_eq!(err.kind, ErrorKind::HandlerAlreadyRegistered);

    assert!(server.remove_request_handler("tools/call"));
    assert!(!server.remove_request_handler("tools/call"));
    server.set_request_handler("tools/call", handler).unwrap();

    let err = server.set_request_handler("prompts/get", handler).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);

    server.set_fallback_request_handler(handler).unwrap();
    assert_eq!(
        server.set_fallback_request_handler(handler).unwrap_err().kind,
        ErrorKind::HandlerAlreadyRegistered
    );

    let noop = |_p: Option<Value>| async { McpResult::Ok(()) };
    server.set_notification_handler("vendor/n", noop).unwrap();
    assert!(server.set_notification_handler("vendor/n", noop).is_err());
    assert!(server.remove_notification_handler("vendor/n"));
}

#[tokio::test]
async fn test_capability_gate_writes_nothing() {
    let (client, _transport, mut sent) =
        scripted_client(ServerCapabilities::default().enable_resources(false, false)).await;

    let err = client
        .send_request(
            "resources/subscribe",
            Some(json!({"uri": "file:///a"})),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapabilityNotSupported);
    assert!(err.is_local());
    assert!(sent.try_recv().is_err());
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.next_request_id(), 0);
}

#[tokio::test]
async fn test_inbound_cancellation_suppresses_reply() {
    let (server, transport, mut sent) = scripted_server(ServerCapabilities::default()).await;
    let (tx, mut cancelled) = mpsc::unbounded_channel();
    server
        .set_request_handler("vendor/long", move |_p: Option<Value>, ctx: RequestContext| {
            let tx = tx.clone();
            async move {
                ctx.cancellation_token().cancelled().await;
                let _ = tx.send(ctx.request_id().clone());
                McpResult::Ok(json!({"finished": true}))
            }
        })
        .unwrap();
    server.start().await.unwrap();
    operate(&server, negotiated(ClientCapabilities::default(), ServerCapabilities::default()));

    transport.inject(json!({"jsonrpc": "2.0", "id": 7, "method": "vendor/long"}));
    transport.inject(json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": 7, "reason": "user gave up"}
    }));

    assert_eq!(next(&mut cancelled).await, RequestId::Number(7));
    assert_silent(&mut sent).await;
}

#[tokio::test]
async fn test_outbound_cancellation_notifies_peer() {
    let (client, _transport, mut sent) = scripted_client(full_server_caps()).await;
    let token = CancellationToken::new();

    let call = {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move {
            client
                .send_request(
                    "tools/call",
                    None,
                    RequestOptions::new().with_cancellation(token),
                )
                .await
        })
    };
    let request = next(&mut sent).await;
    token.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    let cancel = next(&mut sent).await;
    assert_eq!(cancel["method"], "notifications/cancelled");
    assert_eq!(cancel["params"]["requestId"], request["id"]);
    assert!(cancel["params"]["reason"].is_string());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_transport_close_fails_pending_calls() {
    let (client, transport, mut sent) = scripted_client(full_server_caps()).await;
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    client.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut closed = tokio_test::task::spawn(client.wait_closed());
    tokio_test::assert_pending!(closed.poll());

    let call = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_request("tools/list", None, RequestOptions::default())
                .await
        })
    };
    next(&mut sent).await;
    transport.hang_up();

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionClosed);
    assert_eq!(client.state(), SessionState::Terminated);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    tokio_test::assert_ready!(closed.poll());

    let err = client
        .send_request("ping", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_shutdown_fails_pending_with_closing() {
    let (client, _transport, mut sent) = scripted_client(full_server_caps()).await;
    let call = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_request("tools/list", None, RequestOptions::default())
                .await
        })
    };
    next(&mut sent).await;

    client.shutdown().await.unwrap();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionClosed);
    assert_eq!(err.message, "connection closing");
    assert_eq!(client.state(), SessionState::Terminated);

    // Second shutdown and close are no-ops.
    client.shutdown().await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_ids() {
    let (client, server) = linked_pair();
    server
        .set_request_handler("tools/call", |_p: Option<Value>, ctx: RequestContext| async move {
            McpResult::Ok(json!({"id": ctx.request_id()}))
        })
        .unwrap();
    bring_up(&client, &server).await;

    let calls: Vec<_> = (0..32)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .send_request("tools/call", None, RequestOptions::default())
                    .await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for call in calls {
        let result = call.await.unwrap().unwrap();
        ids.insert(result["id"].as_i64().unwrap());
    }
    assert_eq!(ids, (0..32).collect::<HashSet<_>>());
    assert_eq!(client.next_request_id(), 32);
}

#[tokio::test]
async fn test_remote_error_is_returned_verbatim() {
    let (client, server) = linked_pair();
    server
        .set_request_handler("tools/call", |_p: Option<Value>, _ctx: RequestContext| async {
            Err::<Value, _>(
                McpError::application(-32042, "quota exceeded").with_data(json!({"retryAfter": 5})),
            )
        })
        .unwrap();
    bring_up(&client, &server).await;

    let err = client
        .send_request("tools/call", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote(-32042));
    assert_eq!(err.message, "quota exceeded");
    assert_eq!(err.data, Some(json!({"retryAfter": 5})));
    assert!(!err.is_local());
}

async fn slow_with_progress(_params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
    for step in 1..=4 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.report_progress(f64::from(step), Some(4.0), None).await?;
    }
    Ok(json!({"done": true}))
}

#[tokio::test]
async fn test_progress_resets_timeout() {
    let (client, server) = linked_pair();
    server
        .set_request_handler("tools/call", slow_with_progress)
        .unwrap();
    bring_up(&client, &server).await;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let result = client
        .send_request(
            "tools/call",
            None,
            RequestOptions::new()
                .with_timeout(Duration::from_millis(150))
                .reset_timeout_on_progress(true)
                .with_progress(move |progress| {
                    assert_eq!(progress.total, Some(4.0));
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await
        .unwrap();

    assert_eq!(result, json!({"done": true}));
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_max_total_timeout_caps_progress() {
    let (client, server) = linked_pair();
    server
        .set_request_handler("tools/call", slow_with_progress)
        .unwrap();
    bring_up(&client, &server).await;

    let err = client
        .send_request(
            "tools/call",
            None,
            RequestOptions::new()
                .with_timeout(Duration::from_millis(100))
                .reset_timeout_on_progress(true)
                .with_max_total_timeout(Duration::from_millis(120))
                .with_progress(|_| {}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RequestTimeout);
    assert_eq!(err.message, "Maximum total timeout exceeded");
}

async fn echo_through_peer(_params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
    let echoed = ctx
        .send_request("vendor/echo", Some(json!({"x": 1})), RequestOptions::default())
        .await?;
    Ok(json!({"echoed": echoed}))
}

#[tokio::test]
async fn test_handler_can_call_back_into_the_peer() {
    let (client, server) = linked_pair();
    client
        .set_request_handler(
            "vendor/echo",
            |params: Option<Value>, _ctx: RequestContext| async move {
                McpResult::Ok(params.unwrap_or(Value::Null))
            },
        )
        .unwrap();
    server
        .set_request_handler("tools/call", echo_through_peer)
        .unwrap();
    bring_up(&client, &server).await;

    let result = client
        .send_request("tools/call", None, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!({"echoed": {"x": 1}}));
}

#[tokio::test]
async fn test_peer_close_terminates_both_sides() {
    let (client, server) = linked_pair();
    bring_up(&client, &server).await;

    server.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), client.wait_closed())
        .await
        .unwrap();
    assert_eq!(client.state(), SessionState::Terminated);
    assert_eq!(server.state(), SessionState::Terminated);
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let (client, _transport, _sent) = scripted_client(full_server_caps()).await;
    let err = client.start().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidStateTransition);
}
