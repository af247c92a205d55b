//! Hub client.
//!
//! A single type that is both caller and callee: it sends requests to other
//! services through the hub and answers requests addressed to its own
//! service name.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::heartbeat::HeartbeatTask;
use crate::server::HandlerRegistry;
use crate::sync::lock_ignore_poison;
use crate::tracker::{IssuedCall, LateReplyOptions, RequestTracker};
use crate::transport::runner::{self, EventConsumer, Flow};
use crate::{
    // ---
    codes,
    log_debug,
    log_error,
    log_info,
    log_warn,
    ChannelEvent,
    ClientConfig,
    ErrorBody,
    HubClientBuilder,
    LateReply,
    LateReplyObserver,
    OutboundMessage,
    Result,
    RpcError,
    TransportPtr,
};

/// Per-call options for [`HubClient::send_request_with`].
#[derive(Default)]
pub struct RequestOptions {
    /// Keep tracking the call after it times out so a late reply can still
    /// reach `on_late_response`.
    pub allow_late_response_after_timeout: bool,

    /// Observer for a late reply. Ignored unless
    /// `allow_late_response_after_timeout` is set.
    pub on_late_response: Option<LateReplyObserver>,

    /// Override the client's request timeout for this call.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_late_response(mut self) -> Self {
        self.allow_late_response_after_timeout = true;
        self
    }

    pub fn on_late_response<F>(mut self, observer: F) -> Self
    where
        F: FnOnce(std::result::Result<LateReply, ErrorBody>) + Send + 'static,
    {
        self.on_late_response = Some(Box::new(observer));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field(
                "allow_late_response_after_timeout",
                &self.allow_late_response_after_timeout,
            )
            .field("on_late_response", &self.on_late_response.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClientState {
    Running,
    ShutDown,
    /// The hub rejected our service name.
    Rejected(String),
}

/// Client connected to a hub.
///
/// Cheap to clone; clones share one connection, one request tracker and one
/// handler table. Dropping the last clone fails any call still pending with
/// [`RpcError::ConnectionClosed`].
///
/// # Example
///
/// ```no_run
/// use hub_rpc::{ClientConfig, HubClient};
///
/// # async fn example() -> hub_rpc::Result<()> {
/// let client = HubClient::connect(&ClientConfig::memory("billing")).await?;
///
/// client.on_request("ping", |n: u64| Ok::<_, String>(n + 1));
///
/// let reply: u64 = client.send_request("billing", "ping", 41).await?;
/// assert_eq!(reply, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    transport: TransportPtr,
    service_name: String,
    request_timeout: Duration,
    fail_pending_on_disconnect: bool,

    tracker: RequestTracker,
    handlers: HandlerRegistry,
    heartbeat: HeartbeatTask,

    state: watch::Sender<ClientState>,
    rx_task: Mutex<Option<JoinHandle<()>>>,
}

/// Settings resolved by [`HubClientBuilder`].
pub(crate) struct ClientSettings {
    pub(crate) service_name: String,
    pub(crate) request_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) late_reply_retention: Option<Duration>,
    pub(crate) fail_pending_on_disconnect: bool,
}

impl HubClient {
    /// Build a transport from `config.hub_url` and connect a client over it.
    ///
    /// Also installs the log subscriber at `config.log_level` unless one is
    /// already set.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        // ---
        #[cfg(feature = "logging")]
        crate::init_logging(config.log_level);

        let transport = crate::create_transport(config).await?;
        HubClientBuilder::from_config(transport, config).build().await
    }

    /// Connect the transport and start the receive loop (internal use by
    /// `HubClientBuilder`).
    pub(crate) async fn start(transport: TransportPtr, settings: ClientSettings) -> Result<Self> {
        // ---
        let ClientSettings {
            service_name,
            request_timeout,
            heartbeat_interval,
            late_reply_retention,
            fail_pending_on_disconnect,
        } = settings;

        let (state, _) = watch::channel(ClientState::Running);

        let inner = Arc::new(Inner {
            transport: transport.clone(),
            service_name: service_name.clone(),
            request_timeout,
            fail_pending_on_disconnect,
            tracker: RequestTracker::new(service_name.clone(), late_reply_retention),
            handlers: HandlerRegistry::new(service_name.clone()),
            heartbeat: HeartbeatTask::new(transport.clone(), heartbeat_interval),
            state,
            rx_task: Mutex::new(None),
        });

        let handle = transport.connect().await?;
        let consumer = ClientEvents {
            label: service_name,
            inner: Arc::downgrade(&inner),
        };
        *lock_ignore_poison(&inner.rx_task) = Some(runner::run(handle, consumer));

        log_debug!("{}: client started", inner.service_name);
        Ok(Self { inner })
    }

    /// Service name this client is registered under.
    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// Register the handler for inbound requests named `event`.
    ///
    /// The handler runs synchronously on the receive loop. Its `Ok` value is
    /// sent back as the response; an `Err` or a panic is reported to the
    /// remote caller as `INTERNAL_SERVER_ERROR`. Registering again for the
    /// same event replaces the earlier handler.
    pub fn on_request<TReq, TResp, E, F>(&self, event: &str, handler: F)
    where
        TReq: DeserializeOwned + 'static,
        TResp: Serialize + 'static,
        E: std::fmt::Display + 'static,
        F: Fn(TReq) -> std::result::Result<TResp, E> + Send + Sync + 'static,
    {
        self.inner.handlers.register(event, handler);
    }

    /// Call `event` on `target_service` with the client's default timeout.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no reply arrives in time
    /// - [`RpcError::Remote`] if the remote service replied with an error
    /// - [`RpcError::Transport`] if the request could not be emitted
    /// - [`RpcError::DuplicateService`] if the hub rejected this client
    pub async fn send_request<TReq, TResp>(
        &self,
        target_service: &str,
        event: &str,
        data: TReq,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        self.send_request_with(target_service, event, data, RequestOptions::default())
            .await
    }

    /// Call `event` on `target_service` with per-call options.
    ///
    /// The result settles exactly once. A late reply, if enabled, goes to
    /// `options.on_late_response` and never to this result.
    pub async fn send_request_with<TReq, TResp>(
        &self,
        target_service: &str,
        event: &str,
        data: TReq,
        options: RequestOptions,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        self.ensure_running()?;

        let data: Value = serde_json::to_value(data)?;
        let timeout = options.timeout.unwrap_or(self.inner.request_timeout);
        let late = LateReplyOptions {
            allow: options.allow_late_response_after_timeout,
            observer: options.on_late_response,
        };

        let IssuedCall { request, reply } =
            self.inner
                .tracker
                .issue(target_service, event, data, timeout, late);

        let id = reply.id().clone();
        if let Err(err) = self.inner.transport.emit(OutboundMessage::Request(request)).await {
            log_error!("{}: failed to emit request {id}: {err}", self.inner.service_name);
            self.inner.tracker.abandon(&id, err);
        }

        let value = reply.await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Stop the receive loop and heartbeats, fail pending calls with
    /// [`RpcError::ConnectionClosed`], and close the transport.
    ///
    /// Later calls to `shutdown` do nothing.
    pub async fn shutdown(&self) {
        // ---
        if !self.inner.leave_running(ClientState::ShutDown) {
            return;
        }

        self.inner.stop_background();
        self.inner.tracker.fail_pending(|| RpcError::ConnectionClosed);
        self.inner.tracker.clear_timed_out();

        if let Err(_err) = self.inner.transport.close().await {
            log_warn!("{}: transport close failed: {_err}", self.inner.service_name);
        }
        log_info!("{}: client shut down", self.inner.service_name);
    }

    /// Wait until the client stops.
    ///
    /// Resolves `Ok(())` after [`shutdown`](Self::shutdown), or
    /// `Err(RpcError::DuplicateService)` if the hub rejected this client's
    /// service name.
    pub async fn closed(&self) -> Result<()> {
        // ---
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|s| *s != ClientState::Running)
            .await
            .map(|s| (*s).clone())
            .map_err(|_| RpcError::ConnectionClosed)?;

        match state {
            ClientState::Rejected(name) => Err(RpcError::DuplicateService(name)),
            _ => Ok(()),
        }
    }

    /// Whether the client has shut down or been rejected by the hub.
    pub fn is_closed(&self) -> bool {
        *self.inner.state.borrow() != ClientState::Running
    }

    /// Number of calls awaiting their first reply.
    pub fn pending_count(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    /// Number of timed-out calls still accepting a late reply.
    pub fn timed_out_count(&self) -> usize {
        self.inner.tracker.timed_out_count()
    }

    fn ensure_running(&self) -> Result<()> {
        // ---
        match &*self.inner.state.borrow() {
            ClientState::Running => Ok(()),
            ClientState::ShutDown => Err(RpcError::ConnectionClosed),
            ClientState::Rejected(name) => Err(RpcError::DuplicateService(name.clone())),
        }
    }
}

impl Inner {
    // ---
    /// Move out of `Running`. Returns `false` if the client already left it.
    fn leave_running(&self, next: ClientState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Running {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn stop_background(&self) {
        // ---
        self.heartbeat.stop();
        if let Some(task) = lock_ignore_poison(&self.rx_task).take() {
            task.abort();
        }
    }

    fn reject(&self, error: Option<&ErrorBody>) {
        // ---
        let name = self.service_name.clone();
        if !self.leave_running(ClientState::Rejected(name.clone())) {
            return;
        }

        log_error!(
            "{name}: hub rejected service registration: {}",
            error.map(|e| e.message.as_str()).unwrap_or("duplicate service name")
        );

        self.heartbeat.stop();
        let failed = self
            .tracker
            .fail_pending(|| RpcError::DuplicateService(name.clone()));
        self.tracker.clear_timed_out();

        if failed > 0 {
            log_warn!("{name}: failed {failed} pending call(s) after rejection");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = lock_ignore_poison(&self.rx_task).take() {
            task.abort();
        }
    }
}

/// Receive-loop consumer for one client.
///
/// Holds the client weakly so the loop never keeps a dropped client alive.
struct ClientEvents {
    label: String,
    inner: Weak<Inner>,
}

#[async_trait::async_trait]
impl EventConsumer for ClientEvents {
    // ---
    fn label(&self) -> &str {
        &self.label
    }

    async fn handle_event(&self, event: ChannelEvent) -> Result<Flow> {
        // ---
        let Some(inner) = self.inner.upgrade() else {
            return Ok(Flow::Stop);
        };

        match event {
            ChannelEvent::Connect => {
                log_info!("{}: connected to hub at {}", inner.service_name, inner.transport.hub_url());
                inner.heartbeat.start();
            }

            ChannelEvent::Disconnect => {
                log_warn!("{}: disconnected from hub", inner.service_name);
                inner.heartbeat.stop();

                if inner.fail_pending_on_disconnect {
                    let failed = inner.tracker.fail_pending(|| RpcError::ConnectionLost);
                    if failed > 0 {
                        log_warn!("{}: failed {failed} pending call(s) on disconnect", inner.service_name);
                    }
                }
            }

            ChannelEvent::Request(request) => {
                let response = inner.handlers.dispatch(request);
                inner
                    .transport
                    .emit(OutboundMessage::Response(response))
                    .await?;
            }

            ChannelEvent::Response(response) => {
                inner.tracker.complete(response);
            }

            ChannelEvent::ConnectError(err) => {
                if err.code() == Some(codes::DUPLICATE_SERVICE_REGISTRATION) {
                    inner.reject(err.data.as_ref());
                    if let Err(_err) = inner.transport.close().await {
                        log_warn!("{}: transport close failed: {_err}", inner.service_name);
                    }
                    return Ok(Flow::Stop);
                }
                log_warn!("{}: connection error: {}", inner.service_name, err.message);
            }
        }

        Ok(Flow::Continue)
    }

    async fn on_closed(&self) {
        // ---
        if let Some(inner) = self.inner.upgrade() {
            inner.heartbeat.stop();
            log_debug!("{}: receive loop ended", inner.service_name);
        }
    }
}
