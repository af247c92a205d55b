//! In-memory transport implementation.
//!
//! This module provides a pure in-process hub and a transport that connects
//! to it. It is intended for testing, local execution, and as the reference
//! for transport semantics.
//!
//! ## Reference Semantics
//!
//! - `connect()` registers the service name and delivers `Connect`. A second
//!   live connection under the same name receives a `ConnectError` carrying
//!   `DUPLICATE_SERVICE_REGISTRATION` instead.
//! - A `Request` is routed to the inbox of its `targetService`; the hub
//!   remembers the requester so the matching `Response` can be routed back.
//!   Open routes die with either end: detaching a service drops every route
//!   it originated or was addressed by.
//! - Heartbeat records live as long as the service's connection.
//! - Messages cross the hub as encoded JSON frames, so the wire shapes are
//!   exercised exactly as a network hub would see them.
//! - Unroutable messages are logged and dropped. Nothing is retried.
//!
//! ## Non-Goals
//!
//! This hub does not emulate reconnects, persistence, or network failure.
//! Tests trigger lifecycle events explicitly through [`MemoryHub::disconnect`]
//! and [`MemoryHub::inject`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::ConnectErrorData;
use crate::sync::{lock_ignore_poison, read_ignore_poison, write_ignore_poison};
use crate::{
    // ---
    codes,
    log_debug,
    log_warn,
    ChannelEvent,
    ChannelHandle,
    CorrelationId,
    ErrorBody,
    OutboundMessage,
    Result,
    RpcError,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Inbox depth for decoded events on the client side of a memory connection.
const INBOX_CAPACITY: usize = 64;

struct ServiceSlot {
    conn_id: u64,
    frames: mpsc::UnboundedSender<Bytes>,
}

/// Where the response to an open request goes, and who owes it.
struct Route {
    origin: String,
    target: String,
}

#[derive(Clone, Copy)]
struct HeartbeatRecord {
    last_seen: Instant,
    count: u64,
}

/// Shared relay for the in-memory transport.
///
/// Simulates a hub within a single process. All `MemoryTransport` instances
/// that share a `MemoryHub` can exchange requests and responses exactly as
/// services connected to a real hub would.
///
/// For tests that need isolation from each other, construct a hub explicitly
/// and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use hub_rpc::{MemoryHub, TransportConfig};
/// # async fn example() -> hub_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let config = TransportConfig {
///     hub_url: "memory://".into(),
///     service_name: "billing".into(),
/// };
/// let transport = hub_rpc::create_memory_transport_with_hub(config, hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    services: RwLock<HashMap<String, ServiceSlot>>,
    routes: Mutex<HashMap<CorrelationId, Route>>,
    heartbeats: Mutex<HashMap<String, HeartbeatRecord>>,
    next_conn_id: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a service currently holds a live connection.
    pub fn is_connected(&self, service: &str) -> bool {
        // ---
        read_ignore_poison(&self.services)
            .get(service)
            .map(|slot| !slot.frames.is_closed())
            .unwrap_or(false)
    }

    /// Number of requests the hub is still waiting to route a response for.
    pub fn open_routes(&self) -> usize {
        lock_ignore_poison(&self.routes).len()
    }

    /// Time of the most recent heartbeat from `service`, or `None` once it
    /// has detached.
    pub fn last_heartbeat(&self, service: &str) -> Option<Instant> {
        lock_ignore_poison(&self.heartbeats)
            .get(service)
            .map(|r| r.last_seen)
    }

    /// Number of heartbeats received from `service`.
    pub fn heartbeat_count(&self, service: &str) -> u64 {
        lock_ignore_poison(&self.heartbeats)
            .get(service)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// Deliver `Disconnect` to a connected service.
    ///
    /// The registration is kept, mirroring a transport that is about to
    /// reconnect under the same name.
    pub fn disconnect(&self, service: &str) -> bool {
        self.deliver(service, &ChannelEvent::Disconnect)
    }

    /// Deliver an arbitrary event to a connected service.
    pub fn inject(&self, service: &str, event: ChannelEvent) -> bool {
        self.deliver(service, &event)
    }

    fn attach(&self, service: &str) -> Result<(u64, mpsc::UnboundedReceiver<Bytes>)> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let mut services = write_ignore_poison(&self.services);

        let taken = services
            .get(service)
            .map(|slot| !slot.frames.is_closed())
            .unwrap_or(false);

        if taken {
            log_warn!("{service}: rejected duplicate connection (conn {conn_id})");

            let event = ChannelEvent::ConnectError(ConnectErrorData {
                message: format!("service name '{service}' is already registered"),
                data: Some(ErrorBody::new(
                    codes::DUPLICATE_SERVICE_REGISTRATION,
                    format!("service name '{service}' is already registered"),
                    Some(serde_json::json!({ "serviceName": service })),
                )),
            });
            let _ = tx.send(encode(&event)?);
            return Ok((conn_id, rx));
        }

        tx.send(encode(&ChannelEvent::Connect)?)
            .map_err(|_| RpcError::Transport("memory channel closed during connect".into()))?;

        services.insert(
            service.to_string(),
            ServiceSlot {
                conn_id,
                frames: tx,
            },
        );

        log_debug!("{service}: attached to memory hub (conn {conn_id})");
        Ok((conn_id, rx))
    }

    fn detach(&self, service: &str, conn_id: u64) {
        // ---
        let mut services = write_ignore_poison(&self.services);
        if services.get(service).map(|s| s.conn_id) != Some(conn_id) {
            return;
        }
        services.remove(service);
        drop(services);

        let mut routes = lock_ignore_poison(&self.routes);
        let before = routes.len();
        routes.retain(|_, route| route.origin != service && route.target != service);
        let _dropped = before - routes.len();
        drop(routes);

        lock_ignore_poison(&self.heartbeats).remove(service);

        log_debug!("{service}: detached from memory hub (conn {conn_id}, {_dropped} open routes dropped)");
    }

    fn route(&self, from: &str, frame: Bytes) -> Result<()> {
        // ---
        let msg: OutboundMessage = serde_json::from_slice(&frame)?;

        match msg {
            OutboundMessage::Request(req) => {
                let id = req.payload.id.clone();
                let target = req.target_service;
                lock_ignore_poison(&self.routes).insert(
                    id.clone(),
                    Route {
                        origin: from.to_string(),
                        target: target.clone(),
                    },
                );

                if !self.deliver(&target, &ChannelEvent::Request(req.payload)) {
                    lock_ignore_poison(&self.routes).remove(&id);
                    log_warn!("{from}: dropped request {id}, service '{target}' is not connected");
                }
            }
            OutboundMessage::Response(resp) => {
                let route = lock_ignore_poison(&self.routes).remove(&resp.id);
                match route {
                    Some(Route { origin, .. }) => {
                        let id = resp.id.clone();
                        if !self.deliver(&origin, &ChannelEvent::Response(resp)) {
                            log_warn!("{from}: dropped response {id}, '{origin}' went away");
                        }
                    }
                    None => {
                        log_warn!("{from}: dropped response {}, no open route", resp.id);
                    }
                }
            }
            OutboundMessage::Heartbeat(hb) => {
                let mut beats = lock_ignore_poison(&self.heartbeats);
                let record = beats.entry(hb.service_name).or_insert(HeartbeatRecord {
                    last_seen: Instant::now(),
                    count: 0,
                });
                record.last_seen = Instant::now();
                record.count += 1;
            }
        }

        Ok(())
    }

    fn deliver(&self, service: &str, event: &ChannelEvent) -> bool {
        // ---
        let frame = match encode(event) {
            Ok(frame) => frame,
            Err(_err) => {
                log_warn!("{service}: failed to encode event: {_err}");
                return false;
            }
        };

        let services = read_ignore_poison(&self.services);
        match services.get(service) {
            Some(slot) => slot.frames.send(frame).is_ok(),
            None => false,
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            services: RwLock::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            heartbeats: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Process-global hub used for `memory://` URLs.
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Connects to a shared [`MemoryHub`]. Inbound frames are decoded by a small
/// pump task into [`ChannelEvent`]s; frames that fail to decode are logged
/// and skipped.
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
    conn_id: Mutex<Option<u64>>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn connect(&self) -> Result<ChannelHandle> {
        // ---
        let service = self.service_name().to_string();

        // Reconnecting releases our own previous registration first.
        let previous = lock_ignore_poison(&self.conn_id).take();
        if let Some(previous) = previous {
            self.hub.detach(&service, previous);
        }

        let (conn_id, mut frames) = self.hub.attach(&service)?;
        *lock_ignore_poison(&self.conn_id) = Some(conn_id);

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        tokio::spawn(async move {
            // ---
            while let Some(frame) = frames.recv().await {
                match serde_json::from_slice::<ChannelEvent>(&frame) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(_err) => {
                        log_warn!("{service}: undecodable frame skipped: {_err}");
                    }
                }
            }
            log_debug!("{service}: memory channel pump stopped");
        });

        Ok(ChannelHandle { inbox: rx })
    }

    async fn emit(&self, msg: OutboundMessage) -> Result<()> {
        // ---
        if lock_ignore_poison(&self.conn_id).is_none() {
            return Err(RpcError::Transport(format!(
                "{}: emit on a transport that is not connected",
                self.service_name()
            )));
        }
        let frame = encode(&msg)?;
        self.hub.route(self.service_name(), frame)
    }

    /// Close the transport.
    ///
    /// Releases the service name at the hub. The inbox closes once the pump
    /// drains any frames already in flight.
    async fn close(&self) -> Result<()> {
        // ---
        if let Some(conn_id) = lock_ignore_poison(&self.conn_id).take() {
            self.hub.detach(self.service_name(), conn_id);
        }
        Ok(())
    }
}

/// Create a new in-memory transport on the process-global hub.
///
/// All transports created with this function share one relay, matching
/// services connected to a single real hub. For isolated parallel tests, use
/// [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport on the provided hub.
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.service_name);

    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        hub,
        conn_id: Mutex::new(None),
    };

    Ok(Arc::new(transport))
}
