/*! HTTP/WebSocket facade over a single reader connection.

The reader accepts exactly one useful management connection, while a
browser test tool wants many concurrent callers. This bridge owns at
most one [`ReaderSession`] process-wide, serializes every reader
operation behind its lock, and fans live tag events out to WebSocket
subscribers.

Error mapping: not connected → 400, transport/timeout → 504, protocol
or device trouble → 502, all with a `{"detail": …}` body. Reboot and
factory reset report success even though the reader drops TCP before
answering.

Every operation writes into the [`LogRing`]: `SYS` lifecycle, `CMD`
outcomes, `PROTO` raw frame hex, `TAG` records. `/api/logs` serves
the ring with index/category/level filters.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Mutex;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::client::{REBOOT_GRACE, ReaderSession, WireDir};
use crate::inventory::{InventoryEvent, InventoryTask};
use crate::logring::{Category, Level, LogRing};
use crate::proto::{self, MacAddr, NetworkConfig, RelayConfig};
use crate::{Error, Result};

/// Default reader service port.
pub const READER_PORT: u16 = 9090;

/// Antenna-tuning TLVs sent with the WebSocket-initiated inventory
/// start: antenna 1, session, target, Q. These are the defaults the
/// vendor test tool uses.
pub const DEFAULT_TUNING: [u8; 8] = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x04];

/// Process-wide bridge state: the reader singleton, the inventory
/// task, the log ring, and the WebSocket client count.
pub struct AppState {
    reader: Mutex<Option<ReaderSession>>,
    inventory: Mutex<Option<InventoryTask>>,
    log: Arc<LogRing>,
    ws_clients: AtomicUsize,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Fresh state with an empty log ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(None),
            inventory: Mutex::new(None),
            log: Arc::new(LogRing::default()),
            ws_clients: AtomicUsize::new(0),
        }
    }

    /// The bridge's log ring.
    #[must_use]
    pub fn log(&self) -> &LogRing {
        &self.log
    }
}

/// HTTP error carrying the status mapping and a human-readable
/// detail string.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::State(_) | Error::Usage(_) => StatusCode::BAD_REQUEST,
            Error::Transport(_) | Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Protocol(_) | Error::Device(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Run a closure against the connected reader, on the blocking pool,
/// under the session lock. Logs the outcome and invalidates the
/// session on fatal transport errors.
async fn with_reader<T, F>(state: Arc<AppState>, name: &'static str, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut ReaderSession) -> Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = state.reader.lock().unwrap();
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::State("not connected".into()))?;
        let out = f(session);
        match &out {
            Ok(_) => {
                state.log.push(Category::Cmd, Level::Info, format!("{name}: ok"));
            }
            Err(e) => {
                state
                    .log
                    .push(Category::Cmd, Level::Error, format!("{name}: {e}"));
                if e.is_fatal() {
                    state
                        .log
                        .push(Category::Sys, Level::Warn, "session invalidated");
                    *guard = None;
                }
            }
        };
        out
    })
    .await
    .map_err(|e| Error::State(format!("worker died: {e}")))?;
    Ok(result?)
}

// ─── Connection lifecycle ───

#[derive(Deserialize)]
struct ConnectRequest {
    ip: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_port() -> u16 {
    READER_PORT
}

async fn api_connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<Value>> {
    let st = Arc::clone(&state);
    let ip = req.ip.clone();
    let result = tokio::task::spawn_blocking(move || {
        stop_inventory_blocking(&st);
        let mut guard = st.reader.lock().unwrap();
        if let Some(mut old) = guard.take() {
            old.close();
            st.log
                .push(Category::Sys, Level::Info, "previous session replaced");
        }
        let mut session = ReaderSession::connect(&ip, req.port, None)?;
        let log = Arc::clone(&st.log);
        session.set_wire_tap(Box::new(move |dir, bytes| {
            let arrow = match dir {
                WireDir::Tx => "tx",
                WireDir::Rx => "rx",
            };
            log.push(
                Category::Proto,
                Level::Debug,
                format!("{arrow} {}", proto::hex(bytes)),
            );
        }));
        st.log
            .push(Category::Sys, Level::Info, format!("connected to {ip}:{}", req.port));
        *guard = Some(session);
        Ok::<_, Error>(())
    })
    .await
    .map_err(|e| Error::State(format!("worker died: {e}")))?;

    match result {
        Ok(()) => Ok(Json(json!({
            "status": "connected",
            "ip": req.ip,
            "port": req.port,
        }))),
        Err(e) => {
            state
                .log
                .push(Category::Sys, Level::Error, format!("connect failed: {e}"));
            Err(ApiError {
                status: StatusCode::BAD_GATEWAY,
                detail: format!("connection failed: {e}"),
            })
        }
    }
}

async fn api_disconnect(State(state): State<Arc<AppState>>) -> Json<Value> {
    tokio::task::spawn_blocking(move || {
        stop_inventory_blocking(&state);
        if let Some(mut session) = state.reader.lock().unwrap().take() {
            session.close();
        }
        state.log.push(Category::Sys, Level::Info, "disconnected");
    })
    .await
    .ok();
    Json(json!({ "status": "disconnected" }))
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let connected = state
        .reader
        .lock()
        .unwrap()
        .as_ref()
        .is_some_and(ReaderSession::is_valid);
    let inventory_active = state
        .inventory
        .lock()
        .unwrap()
        .as_ref()
        .is_some_and(InventoryTask::is_active);
    Json(json!({
        "connected": connected,
        "inventory_active": inventory_active,
        "ws_clients": state.ws_clients.load(Ordering::Relaxed),
    }))
}

#[derive(Deserialize)]
struct LogQuery {
    after: Option<u64>,
    cat: Option<String>,
    level: Option<String>,
}

async fn api_logs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LogQuery>,
) -> Json<Value> {
    let logs = state
        .log
        .read(q.after, q.cat.as_deref(), q.level.as_deref());
    Json(json!({ "logs": logs, "total": state.log.total() }))
}

// ─── GET commands ───

async fn api_info(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let info = with_reader(state, "info", |r| r.reader_info()).await?;
    Ok(Json(serde_json::to_value(info).unwrap_or_default()))
}

async fn api_network(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let net = with_reader(state, "network", |r| r.network()).await?;
    Ok(Json(serde_json::to_value(net).unwrap_or_default()))
}

async fn api_mac(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let mac = with_reader(state, "mac", |r| r.mac()).await?;
    Ok(Json(json!({ "mac": mac })))
}

async fn api_time(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let t = with_reader(state, "time", |r| r.time()).await?;
    let pc_time = chrono::Utc::now().timestamp();
    Ok(Json(json!({
        "seconds": t.seconds,
        "micros": t.micros,
        "pc_time": pc_time,
        "drift_seconds": i64::from(t.seconds) - pc_time,
    })))
}

async fn api_gpi(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let gpi = with_reader(state, "gpi", |r| r.gpi()).await?;
    Ok(Json(json!({ "inputs": gpi })))
}

async fn api_relay(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let relay = with_reader(state, "relay", |r| r.relay()).await?;
    Ok(Json(serde_json::to_value(relay).unwrap_or_default()))
}

async fn api_rs485(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "rs485", |r| r.rs485_config()).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_tagcache(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let enabled = with_reader(state, "tagcache", |r| r.tag_cache()).await?;
    Ok(Json(json!({ "enabled": enabled })))
}

async fn api_tagtime(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let time = with_reader(state, "tagtime", |r| r.tag_cache_time()).await?;
    Ok(Json(json!({ "cache_time": time })))
}

async fn api_wiegand(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "wiegand", |r| r.wiegand()).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_server(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "server", |r| r.server_config()).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_com(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "com", |r| r.com_config()).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_ping(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "ping", |r| r.ping_config()).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_tags(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let st = Arc::clone(&state);
    let tags = with_reader(state, "tags", |r| r.get_tags()).await?;
    for t in &tags {
        st.log.push(
            Category::Tag,
            Level::Info,
            format!("stored epc={} ant={:?}", t.epc.as_deref().unwrap_or("?"), t.antenna),
        );
    }
    Ok(Json(json!({ "count": tags.len(), "tags": tags })))
}

async fn api_antenna(
    State(state): State<Arc<AppState>>,
    Path(port): Path<u8>,
) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "antenna", move |r| r.antenna(port)).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_antennas(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfgs = with_reader(state, "antennas", |r| r.antennas()).await?;
    Ok(Json(json!({ "antennas": cfgs })))
}

async fn api_trigger(
    State(state): State<Arc<AppState>>,
    Path(gpi): Path<u8>,
) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "trigger", move |r| r.trigger(gpi)).await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

async fn api_triggers(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let cfgs = with_reader(state, "triggers", |r| r.triggers()).await?;
    Ok(Json(json!({ "triggers": cfgs })))
}

// ─── SET commands ───

#[derive(Deserialize)]
struct SetTimeRequest {
    timestamp: Option<u32>,
}

async fn api_settime(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetTimeRequest>,
) -> ApiResult<Json<Value>> {
    let t = with_reader(state, "settime", move |r| r.set_time(req.timestamp)).await?;
    Ok(Json(json!({ "status": "ok", "seconds": t.seconds })))
}

#[derive(Deserialize)]
struct SetPowerRequest {
    port: u8,
    power_dbm: u8,
}

async fn api_setpower(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetPowerRequest>,
) -> ApiResult<Json<Value>> {
    with_reader(state, "setpower", move |r| {
        r.set_antenna_power(req.port, req.power_dbm)
    })
    .await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct SetAntennaRequest {
    port: u8,
    power: u8,
    #[serde(default = "default_session")]
    session: u8,
    #[serde(default)]
    target: u8,
    #[serde(default = "default_q")]
    q_value: u8,
}

fn default_session() -> u8 {
    2
}

fn default_q() -> u8 {
    4
}

async fn api_setantenna(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetAntennaRequest>,
) -> ApiResult<Json<Value>> {
    with_reader(state, "setantenna", move |r| {
        let mut cfg = r.antenna(req.port)?;
        cfg.power_dbm = req.power;
        cfg.session = req.session;
        cfg.target = req.target;
        cfg.q_value = req.q_value;
        r.set_antenna(&cfg)
    })
    .await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct SetTriggerRequest {
    gpi_pin: u8,
    start_mode: u8,
    stop_mode: u8,
    #[serde(default)]
    delay_10ms: u32,
}

async fn api_settrigger(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetTriggerRequest>,
) -> ApiResult<Json<Value>> {
    with_reader(state, "settrigger", move |r| {
        r.set_trigger(req.gpi_pin, req.start_mode, req.stop_mode, req.delay_10ms)
    })
    .await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct SetRelayRequest {
    relay_num: u8,
    on_time_ms: u16,
}

async fn api_setrelay(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetRelayRequest>,
) -> ApiResult<Json<Value>> {
    let cfg = with_reader(state, "setrelay", move |r| {
        r.set_relay(&RelayConfig {
            relay_num: req.relay_num,
            on_time_ms: req.on_time_ms,
        })
    })
    .await?;
    Ok(Json(serde_json::to_value(cfg).unwrap_or_default()))
}

#[derive(Deserialize)]
struct SetIpRequest {
    ip: String,
    mask: String,
    gateway: String,
}

async fn api_setip(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetIpRequest>,
) -> ApiResult<Json<Value>> {
    let cfg = NetworkConfig {
        ip: req.ip.parse().map_err(|_| bad_request("bad ip"))?,
        mask: req.mask.parse().map_err(|_| bad_request("bad mask"))?,
        gateway: req.gateway.parse().map_err(|_| bad_request("bad gateway"))?,
    };
    let out = with_reader(state, "setip", move |r| r.set_network(&cfg)).await?;
    Ok(Json(serde_json::to_value(out).unwrap_or_default()))
}

#[derive(Deserialize)]
struct SetMacRequest {
    mac: String,
}

async fn api_setmac(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetMacRequest>,
) -> ApiResult<Json<Value>> {
    let mac: MacAddr = req.mac.parse().map_err(ApiError::from)?;
    let out = with_reader(state, "setmac", move |r| r.set_mac(mac)).await?;
    Ok(Json(json!({ "mac": out })))
}

#[derive(Deserialize)]
struct SetTagCacheRequest {
    enable: u8,
}

async fn api_settagcache(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetTagCacheRequest>,
) -> ApiResult<Json<Value>> {
    let enabled =
        with_reader(state, "settagcache", move |r| r.set_tag_cache(req.enable != 0)).await?;
    Ok(Json(json!({ "enabled": enabled })))
}

#[derive(Deserialize)]
struct SetTagCacheTimeRequest {
    cache_time: u16,
}

async fn api_settagcachetime(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetTagCacheTimeRequest>,
) -> ApiResult<Json<Value>> {
    let time = with_reader(state, "settagcachetime", move |r| {
        r.set_tag_cache_time(req.cache_time)
    })
    .await?;
    Ok(Json(json!({ "cache_time": time })))
}

#[derive(Deserialize)]
struct SetDhcpRequest {
    enable: u8,
}

async fn api_setdhcp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetDhcpRequest>,
) -> ApiResult<Json<Value>> {
    let mode = with_reader(state, "setdhcp", move |r| r.set_dhcp(req.enable)).await?;
    Ok(Json(json!({ "dhcp": mode })))
}

async fn api_cleartags(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    with_reader(state, "cleartags", |r| r.clear_tags()).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Reboot drops the TCP connection before any response; this endpoint
/// sends the command, releases the session, and reports success.
async fn api_reboot(State(state): State<Arc<AppState>>) -> Json<Value> {
    tokio::task::spawn_blocking(move || {
        stop_inventory_blocking(&state);
        let mut guard = state.reader.lock().unwrap();
        if let Some(mut session) = guard.take() {
            if let Err(e) = session.reboot() {
                warn!("reboot send failed: {e}");
            }
            session.close();
        }
        state
            .log
            .push(Category::Sys, Level::Info, "reboot requested, session released");
    })
    .await
    .ok();
    Json(json!({
        "status": "rebooting",
        "reconnect_after_secs": REBOOT_GRACE.as_secs(),
    }))
}

async fn api_factoryreset(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let st = Arc::clone(&state);
    with_reader(state, "factoryreset", |r| r.factory_reset()).await?;
    tokio::task::spawn_blocking(move || {
        if let Some(mut session) = st.reader.lock().unwrap().take() {
            session.close();
        }
        st.log
            .push(Category::Sys, Level::Info, "factory reset, session released");
    })
    .await
    .ok();
    Ok(Json(json!({ "status": "factory_reset" })))
}

fn bad_request(detail: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        detail: detail.to_string(),
    }
}

// ─── Inventory WebSocket ───

#[derive(Deserialize)]
struct WsCommand {
    #[serde(default)]
    action: String,
}

async fn ws_inventory(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    state.ws_clients.fetch_add(1, Ordering::Relaxed);
    let (mut sender, mut receiver) = socket.split();

    // Tag events and status messages funnel through one channel so
    // sends to this subscriber stay serialized.
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<String>(256);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut owns_inventory = false;
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let action = serde_json::from_str::<WsCommand>(text.as_str())
            .map(|c| c.action)
            .unwrap_or_default();
        match action.as_str() {
            "start" => match start_inventory(&state, out_tx.clone()).await {
                Ok(()) => {
                    owns_inventory = true;
                    let _ = out_tx
                        .send(json!({ "status": "inventory_started" }).to_string())
                        .await;
                }
                Err(detail) => {
                    let _ = out_tx.send(json!({ "error": detail }).to_string()).await;
                }
            },
            "stop" => {
                stop_inventory(&state).await;
                owns_inventory = false;
                let _ = out_tx
                    .send(json!({ "status": "inventory_stopped" }).to_string())
                    .await;
            }
            other => {
                let _ = out_tx
                    .send(json!({ "error": format!("unknown action: {other}") }).to_string())
                    .await;
            }
        }
    }

    // The browser went away; a stream it started must not keep
    // hammering the RF section.
    if owns_inventory {
        info!("websocket gone, cancelling inventory");
        stop_inventory(&state).await;
    }
    state.ws_clients.fetch_sub(1, Ordering::Relaxed);
    send_task.abort();
}

/// Start the inventory task and a forwarder that pumps its events to
/// the WebSocket channel. Returns a human-readable error string for
/// the `{"error": …}` reply.
async fn start_inventory(
    state: &Arc<AppState>,
    out_tx: tokio::sync::mpsc::Sender<String>,
) -> std::result::Result<(), String> {
    let st = Arc::clone(state);
    tokio::task::spawn_blocking(move || {
        let mut inv_guard = st.inventory.lock().unwrap();
        if inv_guard.as_ref().is_some_and(InventoryTask::is_active) {
            return Err("inventory already running".to_string());
        }
        let reader_guard = st.reader.lock().unwrap();
        let session = reader_guard.as_ref().ok_or("Not connected")?;
        let (task, events) =
            InventoryTask::start(session, &DEFAULT_TUNING).map_err(|e| e.to_string())?;
        drop(reader_guard);
        *inv_guard = Some(task);
        st.log
            .push(Category::Sys, Level::Info, "inventory started");

        // Forwarder: std channel → tokio channel, plus TAG logging.
        let log = Arc::clone(&st.log);
        std::thread::Builder::new()
            .name("inventory-forward".into())
            .spawn(move || {
                loop {
                    match events.recv_timeout(Duration::from_secs(1)) {
                        Ok(InventoryEvent::Tag(tag)) => {
                            log.push(
                                Category::Tag,
                                Level::Info,
                                format!(
                                    "epc={} ant={} rssi={}",
                                    tag.epc.as_deref().unwrap_or("?"),
                                    tag.antenna.map_or("?".into(), |a| a.to_string()),
                                    tag.rssi.map_or("?".into(), |r| r.to_string()),
                                ),
                            );
                            let msg = serde_json::to_string(&*tag)
                                .unwrap_or_else(|_| "{}".to_string());
                            if out_tx.blocking_send(msg).is_err() {
                                break;
                            }
                        }
                        Ok(InventoryEvent::Terminated { reason }) => {
                            log.push(
                                Category::Sys,
                                Level::Info,
                                format!("inventory ended: {reason}"),
                            );
                            if reason != "stopped" {
                                let _ = out_tx
                                    .blocking_send(json!({ "error": reason }).to_string());
                            }
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if out_tx.is_closed() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| e.to_string())?;
        Ok(())
    })
    .await
    .unwrap_or_else(|e| Err(format!("worker died: {e}")))
}

async fn stop_inventory(state: &Arc<AppState>) {
    let st = Arc::clone(state);
    tokio::task::spawn_blocking(move || stop_inventory_blocking(&st))
        .await
        .ok();
}

fn stop_inventory_blocking(state: &Arc<AppState>) {
    let task = state.inventory.lock().unwrap().take();
    if let Some(task) = task {
        task.stop();
        state
            .log
            .push(Category::Sys, Level::Info, "inventory stopped");
    }
}

/// Build the bridge router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/connect", post(api_connect))
        .route("/api/disconnect", post(api_disconnect))
        .route("/api/status", get(api_status))
        .route("/api/logs", get(api_logs))
        .route("/api/info", get(api_info))
        .route("/api/network", get(api_network))
        .route("/api/mac", get(api_mac))
        .route("/api/time", get(api_time))
        .route("/api/gpi", get(api_gpi))
        .route("/api/relay", get(api_relay))
        .route("/api/rs485", get(api_rs485))
        .route("/api/tagcache", get(api_tagcache))
        .route("/api/tagtime", get(api_tagtime))
        .route("/api/wiegand", get(api_wiegand))
        .route("/api/server", get(api_server))
        .route("/api/com", get(api_com))
        .route("/api/ping", get(api_ping))
        .route("/api/tags", get(api_tags))
        .route("/api/antenna/{port}", get(api_antenna))
        .route("/api/antennas", get(api_antennas))
        .route("/api/trigger/{gpi}", get(api_trigger))
        .route("/api/triggers", get(api_triggers))
        .route("/api/settime", post(api_settime))
        .route("/api/setpower", post(api_setpower))
        .route("/api/setantenna", post(api_setantenna))
        .route("/api/settrigger", post(api_settrigger))
        .route("/api/setrelay", post(api_setrelay))
        .route("/api/setip", post(api_setip))
        .route("/api/setmac", post(api_setmac))
        .route("/api/settagcache", post(api_settagcache))
        .route("/api/settagcachetime", post(api_settagcachetime))
        .route("/api/setdhcp", post(api_setdhcp))
        .route("/api/cleartags", post(api_cleartags))
        .route("/api/reboot", post(api_reboot))
        .route("/api/factoryreset", post(api_factoryreset))
        .route("/ws/inventory", get(ws_inventory))
        .with_state(state)
}
