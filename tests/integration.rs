use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

use hub_rpc::protocol::{RequestPayload, ResponseMessage};
use hub_rpc::{
    //
    codes,
    create_memory_transport_with_hub,
    ChannelEvent,
    ChannelHandle,
    ClientConfig,
    HubClient,
    HubClientBuilder,
    MemoryHub,
    OutboundMessage,
    RequestOptions,
    Result,
    RpcError,
    TransportConfig,
    TransportPtr,
};

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AddResponse {
    sum: i32,
}

const GUARD: Duration = Duration::from_secs(2);

async fn memory_transport(hub: &Arc<MemoryHub>, name: &str) -> TransportPtr {
    let config = TransportConfig {
        hub_url: "memory://".into(),
        service_name: name.into(),
    };
    create_memory_transport_with_hub(config, hub.clone())
        .await
        .expect("failed to create memory transport")
}

fn builder(transport: TransportPtr) -> HubClientBuilder {
    HubClientBuilder::new(transport)
        .request_timeout(Duration::from_millis(300))
        .heartbeat_interval(Duration::ZERO)
}

async fn client(hub: &Arc<MemoryHub>, name: &str) -> HubClient {
    builder(memory_transport(hub, name).await)
        .build()
        .await
        .expect("client failed to start")
}

/// A bare transport standing in for a remote service we control by hand.
async fn raw_peer(hub: &Arc<MemoryHub>, name: &str) -> (TransportPtr, ChannelHandle) {
    let transport = memory_transport(hub, name).await;
    let mut handle = transport.connect().await.expect("peer connect failed");
    assert_eq!(handle.inbox.recv().await, Some(ChannelEvent::Connect));
    (transport, handle)
}

async fn next_request(handle: &mut ChannelHandle) -> RequestPayload {
    loop {
        let event = timeout(GUARD, handle.inbox.recv())
            .await
            .expect("timed out waiting for request")
            .expect("peer channel closed");
        if let ChannelEvent::Request(req) = event {
            return req;
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + GUARD;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_basic_request() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let math = client(&hub, "math").await;
    let caller = client(&hub, "caller").await;

    math.on_request("add", |req: AddRequest| {
        Ok::<_, String>(AddResponse { sum: req.a + req.b })
    });

    let resp: AddResponse = timeout(GUARD, caller.send_request("math", "add", AddRequest { a: 2, b: 3 }))
        .await
        .expect("request hung")?;

    assert_eq!(resp, AddResponse { sum: 5 });
    assert_eq!(caller.pending_count(), 0);
    assert_eq!(hub.open_routes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_match_by_id() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let echo = client(&hub, "echo").await;
    let caller = client(&hub, "caller").await;

    echo.on_request("ping", |v: Value| {
        let n = v["n"].as_i64().unwrap_or_default();
        Ok::<_, String>(json!({"n": n + 1}))
    });

    let calls = (0..50).map(|n| {
        let caller = caller.clone();
        async move {
            let reply: Value = caller.send_request("echo", "ping", json!({"n": n})).await?;
            Ok::<_, RpcError>((n, reply))
        }
    });

    let results = timeout(GUARD, futures::future::join_all(calls))
        .await
        .expect("requests hung");

    for result in results {
        let (n, reply) = result?;
        assert_eq!(reply, json!({"n": n + 1}));
    }
    assert_eq!(caller.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_timeout_settles_with_request_timeout() {
    // ---
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller").await;
    let (_peer, mut peer_rx) = raw_peer(&hub, "silent").await;

    let started = Instant::now();
    let options = RequestOptions::new().timeout(Duration::from_millis(50));
    let err = caller
        .send_request_with::<_, Value>("silent", "ping", json!({"n": 1}), options)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.code(), Some(codes::REQUEST_TIMEOUT));
    assert!(elapsed >= Duration::from_millis(50), "settled early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "settled late: {elapsed:?}");

    let body = err.body().unwrap();
    assert_eq!(
        body.error_data,
        Some(json!({"targetService": "silent", "event": "ping", "data": {"n": 1}}))
    );

    // The request did go out.
    assert_eq!(next_request(&mut peer_rx).await.event, "ping");
    assert_eq!(caller.pending_count(), 0);
    assert_eq!(caller.timed_out_count(), 0);
}

#[tokio::test]
async fn test_late_reply_reaches_observer_when_enabled() {
    // ---
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller").await;
    let (peer, mut peer_rx) = raw_peer(&hub, "slow").await;

    let (tx, rx) = oneshot::channel();
    let options = RequestOptions::new()
        .timeout(Duration::from_millis(50))
        .allow_late_response()
        .on_late_response(move |late| {
            let _ = tx.send(late);
        });

    let call = tokio::spawn({
        let caller = caller.clone();
        async move {
            caller
                .send_request_with::<_, Value>("slow", "ping", json!({"n": 1}), options)
                .await
        }
    });

    let request = next_request(&mut peer_rx).await;
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some(codes::REQUEST_TIMEOUT));
    assert_eq!(caller.timed_out_count(), 1);

    sleep(Duration::from_millis(100)).await;
    peer.emit(OutboundMessage::Response(ResponseMessage::ok(
        request.id.clone(),
        json!({"ok": true}),
    )))
    .await
    .unwrap();

    let late = timeout(GUARD, rx)
        .await
        .expect("observer never called")
        .expect("observer dropped")
        .expect("late reply should be a success");

    assert_eq!(late.response, json!({"ok": true}));
    assert_eq!(late.original_payload, request);
    assert_eq!(caller.timed_out_count(), 0);
    assert_eq!(caller.pending_count(), 0);
}

#[tokio::test]
async fn test_late_reply_dropped_without_opt_in() {
    // ---
    let hub = MemoryHub::new();
    let caller = client(&hub, "caller").await;
    let (peer, mut peer_rx) = raw_peer(&hub, "slow").await;

    let observed = Arc::new(AtomicUsize::new(0));
    let seen = observed.clone();
    // Observer without the opt-in flag is ignored.
    let options = RequestOptions::new()
        .timeout(Duration::from_millis(50))
        .on_late_response(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    let call = tokio::spawn({
        let caller = caller.clone();
        async move {
            caller
                .send_request_with::<_, Value>("slow", "ping", Value::Null, options)
                .await
        }
    });

    let request = next_request(&mut peer_rx).await;
    assert!(call.await.unwrap().is_err());
    assert_eq!(caller.timed_out_count(), 0);

    peer.emit(OutboundMessage::Response(ResponseMessage::ok(request.id, json!({"ok": true}))))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(observed.load(Ordering::SeqCst), 0);
    assert_eq!(caller.pending_count(), 0);
    assert_eq!(caller.timed_out_count(), 0);
}

#[tokio::test]
async fn test_second_handler_replaces_first() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let server = client(&hub, "server").await;
    let caller = client(&hub, "caller").await;

    let first_calls = Arc::new(AtomicUsize::new(0));
    let counter = first_calls.clone();
    server.on_request("who", move |_: Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>("first")
    });
    server.on_request("who", |_: Value| Ok::<_, String>("second"));

    for _ in 0..3 {
        let who: String = caller.send_request("server", "who", Value::Null).await?;
        assert_eq!(who, "second");
    }
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_handler_is_isolated() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let server = client(&hub, "server").await;
    let caller = client(&hub, "caller").await;

    server.on_request("fail", |_: Value| Err::<Value, _>("disk full"));
    server.on_request("panic", |_: Value| -> std::result::Result<Value, String> {
        panic!("handler exploded")
    });
    server.on_request("ping", |_: Value| Ok::<_, String>("pong"));

    let err = caller
        .send_request::<_, Value>("server", "fail", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)));
    assert_eq!(err.code(), Some(codes::INTERNAL_SERVER_ERROR));
    let data = err.body().unwrap().error_data.clone().unwrap();
    assert_eq!(data["event"], json!("fail"));
    assert_eq!(data["originalErrorMessage"], json!("disk full"));

    let err = caller
        .send_request::<_, Value>("server", "panic", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(codes::INTERNAL_SERVER_ERROR));

    let pong: String = caller.send_request("server", "ping", Value::Null).await?;
    assert_eq!(pong, "pong");
    Ok(())
}

#[tokio::test]
async fn test_unknown_event_yields_event_not_found() {
    // ---
    let hub = MemoryHub::new();
    let _server = client(&hub, "server").await;
    let caller = client(&hub, "caller").await;

    let err = caller
        .send_request::<_, Value>("server", "nope", Value::Null)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(codes::EVENT_NOT_FOUND));
    let data = err.body().unwrap().error_data.clone().unwrap();
    assert_eq!(data["event"], json!("nope"));
    assert_eq!(data["serviceName"], json!("server"));
}

#[tokio::test]
async fn test_duplicate_registration_is_fatal_for_client() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let original = client(&hub, "orders").await;
    original.on_request("ping", |_: Value| Ok::<_, String>("pong"));

    let impostor = client(&hub, "orders").await;

    let outcome = timeout(GUARD, impostor.closed()).await.expect("never closed");
    assert!(matches!(outcome, Err(RpcError::DuplicateService(ref name)) if name == "orders"));
    assert!(impostor.is_closed());

    let err = impostor
        .send_request::<_, Value>("orders", "ping", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(codes::DUPLICATE_SERVICE_REGISTRATION));

    // The original registration keeps working.
    let pong: String = original.send_request("orders", "ping", Value::Null).await?;
    assert_eq!(pong, "pong");
    Ok(())
}

#[tokio::test]
async fn test_disconnect_fails_pending_when_enabled() {
    // ---
    let hub = MemoryHub::new();
    let caller = builder(memory_transport(&hub, "caller").await)
        .request_timeout(Duration::from_secs(5))
        .fail_pending_on_disconnect(true)
        .build()
        .await
        .unwrap();
    let (_peer, _peer_rx) = raw_peer(&hub, "silent").await;

    let call = tokio::spawn({
        let caller = caller.clone();
        async move { caller.send_request::<_, Value>("silent", "ping", Value::Null).await }
    });

    wait_until(|| caller.pending_count() == 1).await;
    assert!(hub.disconnect("caller"));

    let result = timeout(GUARD, call).await.expect("call not failed").unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionLost)));
    assert_eq!(caller.pending_count(), 0);
}

#[tokio::test]
async fn test_disconnect_keeps_pending_by_default() {
    // ---
    let hub = MemoryHub::new();
    let caller = builder(memory_transport(&hub, "caller").await)
        .request_timeout(Duration::from_millis(100))
        .build()
        .await
        .unwrap();
    let (_peer, _peer_rx) = raw_peer(&hub, "silent").await;

    let call = tokio::spawn({
        let caller = caller.clone();
        async move { caller.send_request::<_, Value>("silent", "ping", Value::Null).await }
    });

    wait_until(|| caller.pending_count() == 1).await;
    hub.disconnect("caller");
    sleep(Duration::from_millis(20)).await;
    assert_eq!(caller.pending_count(), 1);

    let err = timeout(GUARD, call).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err.code(), Some(codes::REQUEST_TIMEOUT));
}

#[tokio::test]
async fn test_heartbeats_start_on_connect_and_stop_on_disconnect() {
    // ---
    let hub = MemoryHub::new();
    let _client = builder(memory_transport(&hub, "beater").await)
        .heartbeat_interval(Duration::from_millis(20))
        .build()
        .await
        .unwrap();

    wait_until(|| hub.heartbeat_count("beater") >= 3).await;
    assert!(hub.last_heartbeat("beater").is_some());

    hub.disconnect("beater");
    sleep(Duration::from_millis(30)).await;
    let stopped_at = hub.heartbeat_count("beater");
    sleep(Duration::from_millis(80)).await;
    assert_eq!(hub.heartbeat_count("beater"), stopped_at);

    // Reconnect notification restarts them.
    hub.inject("beater", ChannelEvent::Connect);
    wait_until(|| hub.heartbeat_count("beater") > stopped_at).await;
}

#[tokio::test]
async fn test_shutdown_fails_pending_and_releases_name() {
    // ---
    let hub = MemoryHub::new();
    let caller = builder(memory_transport(&hub, "caller").await)
        .request_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap();
    let (_peer, _peer_rx) = raw_peer(&hub, "silent").await;

    let call = tokio::spawn({
        let caller = caller.clone();
        async move { caller.send_request::<_, Value>("silent", "ping", Value::Null).await }
    });
    wait_until(|| caller.pending_count() == 1).await;

    caller.shutdown().await;

    let result = timeout(GUARD, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    assert!(caller.closed().await.is_ok());
    assert!(!hub.is_connected("caller"));

    let err = caller
        .send_request::<_, Value>("silent", "ping", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed));
}

#[tokio::test]
async fn test_connect_from_config_uses_global_hub() -> Result<()> {
    // ---
    let server = HubClient::connect(
        &ClientConfig::memory("integration-global-server").with_heartbeat_interval(Duration::ZERO),
    )
    .await?;
    let caller = HubClient::connect(
        &ClientConfig::memory("integration-global-caller")
            .with_request_timeout(Duration::from_millis(500)),
    )
    .await?;

    server.on_request("add", |req: AddRequest| {
        Ok::<_, String>(AddResponse { sum: req.a + req.b })
    });

    let resp: AddResponse = caller
        .send_request("integration-global-server", "add", AddRequest { a: 20, b: 22 })
        .await?;
    assert_eq!(resp.sum, 42);

    caller.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_hub_url_is_rejected() {
    // ---
    let config = ClientConfig::new("wss://hub.example.com", "svc");
    let result = HubClient::connect(&config).await;
    assert!(matches!(result, Err(RpcError::InvalidConfig(_))));

    let result = HubClient::connect(&ClientConfig::new("memory://", "")).await;
    assert!(matches!(result, Err(RpcError::MissingConfig(_))));
}
