//! Async OBS Studio client: obs-websocket v5 over `tokio-tungstenite`.
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mixlink_protocol::obs::{
    generate_auth_string, normalize_scene_list, op, Envelope, HelloData, IdentifiedData,
    IdentifyData, RequestData, RequestResponseData, SceneEntry, EVENT_SUBSCRIPTION_TALLY,
};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::obs::state::ObsState;
use crate::types::{SwitcherEvent, SwitcherInfo, SwitcherState};

const SILENCE_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 32;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct PendingRequest {
    reply: oneshot::Sender<Result<Option<Value>>>,
}

enum Command {
    Request {
        request_type: String,
        request_id: String,
        request_data: Option<Value>,
        reply: oneshot::Sender<Result<Option<Value>>>,
    },
}

pub struct ObsClient {
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<ObsState>>,
    events: broadcast::Sender<SwitcherEvent>,
    connected: Arc<AtomicBool>,
    request_counter: Arc<AtomicU64>,
}

impl ObsClient {
    pub async fn connect(
        addr: SocketAddrV4,
        path: &str,
        password: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let url = format!("ws://{}:{}{}", addr.ip(), addr.port(), path);
        let (mut ws, _) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| Error::Timeout("OBS connect"))?
            .map_err(Error::WebSocket)?;

        let hello: Envelope = tokio::time::timeout(connect_timeout, recv_envelope(&mut ws))
            .await
            .map_err(|_| Error::Timeout("OBS hello"))??
            .ok_or(Error::Disconnected)?;
        if hello.op != op::HELLO {
            return Err(Error::Protocol(mixlink_protocol::Error::UnexpectedOpcode(hello.op)));
        }
        let hello_data: HelloData = serde_json::from_value(hello.d)?;

        let authentication = match (&hello_data.authentication, password) {
            (Some(challenge), Some(pw)) => Some(generate_auth_string(
                pw,
                &challenge.salt,
                &challenge.challenge,
            )),
            (Some(_), None) => return Err(Error::InvalidParam("OBS requires a password")),
            (None, _) => None,
        };
        let auth_required = hello_data.authentication.is_some();

        let identify = Envelope {
            op: op::IDENTIFY,
            d: serde_json::to_value(&IdentifyData {
                rpc_version: hello_data.rpc_version,
                authentication,
                event_subscriptions: EVENT_SUBSCRIPTION_TALLY,
            })?,
        };
        send_envelope(&mut ws, &identify).await?;

        let identified: Envelope = tokio::time::timeout(connect_timeout, recv_envelope(&mut ws))
            .await
            .map_err(|_| Error::Timeout("OBS identify"))??
            .ok_or(Error::Disconnected)?;
        if identified.op != op::IDENTIFIED {
            return Err(Error::Protocol(mixlink_protocol::Error::UnexpectedOpcode(identified.op)));
        }
        let _identified_data: IdentifiedData = serde_json::from_value(identified.d)?;

        let mut state = ObsState::default();
        state.authenticated = hello_data.authentication.is_some();
        state.auth_required = auth_required;
        state.identified = true;
        let state = Arc::new(RwLock::new(state));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let request_counter = Arc::new(AtomicU64::new(0));
        let _ = events.send(SwitcherEvent::Connected);

        let (write, read) = ws.split();
        let task = ObsTask {
            write,
            read,
            state: state.clone(),
            events: events.clone(),
            cmd_rx,
            connected: connected.clone(),
            pending: HashMap::new(),
            internal_request_counter: 0,
            last_contact: Instant::now(),
            last_tally: 0,
        };
        tokio::task::spawn(task.run());

        let client = Self {
            cmd_tx,
            state,
            events,
            connected,
            request_counter,
        };

        let scene_list = client
            .request("GetSceneList", None)
            .await?
            .ok_or(Error::Disconnected)?;
        client.apply_scene_list_response(&scene_list).await;

        if let Some(studio) = client.request("GetStudioModeEnabled", None).await?.as_ref() {
            client.apply_studio_mode_response(studio).await;
        }

        Ok(client)
    }

    async fn apply_scene_list_response(&self, data: &Value) {
        let scenes: Vec<SceneEntry> = data
            .get("scenes")
            .cloned()
            .map(serde_json::from_value)
            .and_then(|r: std::result::Result<Vec<SceneEntry>, _>| r.ok())
            .unwrap_or_default();
        let program_name = data.get("currentProgramSceneName").and_then(Value::as_str);
        let preview_name = data.get("currentPreviewSceneName").and_then(Value::as_str);
        let (names, program_index, preview_index) =
            normalize_scene_list(scenes, program_name, preview_name);
        self.state
            .write()
            .await
            .apply_scene_list(names, program_index, preview_index);
    }

    async fn apply_studio_mode_response(&self, data: &Value) {
        if let Some(enabled) = data.get("studioModeEnabled").and_then(Value::as_bool) {
            self.state.write().await.studio_mode = enabled;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.identified
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub async fn get_info(&self) -> SwitcherInfo {
        self.state.read().await.info()
    }

    pub async fn get_state(&self) -> SwitcherState {
        self.state.read().await.state(self.is_connected())
    }

    pub async fn studio_mode(&self) -> bool {
        self.state.read().await.studio_mode
    }

    /// Whether the server's `Hello` presented an authentication challenge,
    /// distinct from whether this client actually authenticated.
    pub async fn auth_required(&self) -> bool {
        self.state.read().await.auth_required
    }

    pub async fn program_scene_name(&self) -> Option<String> {
        self.state.read().await.program_scene_name().map(str::to_string)
    }

    pub async fn preview_scene_name(&self) -> Option<String> {
        self.state.read().await.preview_scene_name().map(str::to_string)
    }

    pub async fn scene_name_at(&self, index: usize) -> Option<String> {
        self.state.read().await.scenes.get(index).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwitcherEvent> {
        self.events.subscribe()
    }

    pub async fn request(
        &self,
        request_type: impl Into<String>,
        request_data: Option<Value>,
    ) -> Result<Option<Value>> {
        let id = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let request_id = format!("mixlink-{id}");
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request {
                request_type: request_type.into(),
                request_id,
                request_data,
                reply,
            })
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub async fn set_program_scene(&self, scene: &str) -> Result<()> {
        self.request(
            "SetCurrentProgramScene",
            Some(serde_json::json!({ "sceneName": scene })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_preview_scene(&self, scene: &str) -> Result<()> {
        self.request(
            "SetCurrentPreviewScene",
            Some(serde_json::json!({ "sceneName": scene })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_studio_mode_enabled(&self, enabled: bool) -> Result<()> {
        self.request(
            "SetStudioModeEnabled",
            Some(serde_json::json!({ "studioModeEnabled": enabled })),
        )
        .await?;
        Ok(())
    }

    pub async fn trigger_studio_mode_transition(&self) -> Result<()> {
        self.request("TriggerStudioModeTransition", None).await?;
        Ok(())
    }
}

struct ObsTask {
    write: SplitSink<Stream, Message>,
    read: SplitStream<Stream>,
    state: Arc<RwLock<ObsState>>,
    events: broadcast::Sender<SwitcherEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    connected: Arc<AtomicBool>,
    pending: HashMap<String, PendingRequest>,
    internal_request_counter: u64,
    last_contact: Instant,
    last_tally: u64,
}

impl ObsTask {
    async fn run(mut self) {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if self.last_contact.elapsed() > SILENCE_TIMEOUT {
                        warn!("OBS session silent too long, disconnecting");
                        self.shut_down().await;
                        return;
                    }
                    if self.write.send(Message::Ping(Vec::new())).await.is_err() {
                        self.shut_down().await;
                        return;
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    match cmd {
                        Command::Request { request_type, request_id, request_data, reply } => {
                            let payload = RequestData {
                                request_type,
                                request_id: request_id.clone(),
                                request_data,
                            };
                            let encoded = serde_json::to_value(&payload).and_then(|d| {
                                serde_json::to_string(&Envelope { op: op::REQUEST, d })
                            });
                            match encoded {
                                Ok(text) => {
                                    self.pending.insert(request_id, PendingRequest { reply });
                                    if self.write.send(Message::Text(text)).await.is_err() {
                                        self.shut_down().await;
                                        return;
                                    }
                                }
                                Err(e) => {
                                    let _ = reply.send(Err(Error::Json(e)));
                                }
                            }
                        }
                    }
                }
                msg = self.read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.last_contact = Instant::now();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                            self.last_contact = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("OBS connection closed");
                            self.shut_down().await;
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(?e, "OBS socket error, disconnecting");
                            self.shut_down().await;
                            return;
                        }
                    }
                }
            }

            if !self.connected.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    async fn shut_down(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(SwitcherEvent::Disconnected);
    }

    async fn handle_text(&mut self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                warn!(?e, "unparseable OBS message");
                return;
            }
        };
        match envelope.op {
            op::REQUEST_RESPONSE => self.handle_request_response(envelope.d).await,
            op::EVENT => self.handle_event(envelope.d).await,
            _ => {}
        }
    }

    async fn handle_request_response(&mut self, data: Value) {
        let parsed: RequestResponseData = match serde_json::from_value(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(?e, "malformed OBS RequestResponse");
                return;
            }
        };

        if parsed.request_type == "GetSceneList" {
            if let Some(response_data) = &parsed.response_data {
                self.apply_scene_list(response_data).await;
            }
        } else if parsed.request_type == "GetStudioModeEnabled" {
            if let Some(response_data) = &parsed.response_data {
                self.apply_studio_mode(response_data).await;
            }
        }

        if let Some(pending) = self.pending.remove(&parsed.request_id) {
            let result = if parsed.request_status.result {
                Ok(parsed.response_data)
            } else {
                Err(Error::Protocol(mixlink_protocol::Error::RequestFailed(
                    parsed.request_status.code,
                )))
            };
            let _ = pending.reply.send(result);
        }
    }

    async fn handle_event(&mut self, data: Value) {
        let event_type = match data.get("eventType").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => return,
        };
        let event_data = data.get("eventData").cloned().unwrap_or(Value::Null);

        match event_type.as_str() {
            "CurrentProgramSceneChanged" => {
                if let Some(name) = event_data.get("sceneName").and_then(Value::as_str) {
                    self.state.write().await.set_program_by_name(name);
                    self.fire_tally_if_changed().await;
                }
            }
            "CurrentPreviewSceneChanged" => {
                if let Some(name) = event_data.get("sceneName").and_then(Value::as_str) {
                    self.state.write().await.set_preview_by_name(name);
                    self.fire_tally_if_changed().await;
                }
            }
            "StudioModeStateChanged" => {
                if let Some(enabled) = event_data.get("studioModeEnabled").and_then(Value::as_bool) {
                    {
                        let mut state = self.state.write().await;
                        state.studio_mode = enabled;
                        if !enabled {
                            state.clear_preview();
                        }
                    }
                    let _ = self.events.send(SwitcherEvent::StateChanged("studio_mode"));
                    self.fire_tally_if_changed().await;
                }
            }
            "SceneListChanged" => {
                self.refresh_scene_list().await;
            }
            _ => {}
        }
    }

    async fn apply_scene_list(&mut self, data: &Value) {
        let scenes: Vec<SceneEntry> = data
            .get("scenes")
            .cloned()
            .map(serde_json::from_value)
            .and_then(|r: std::result::Result<Vec<SceneEntry>, _>| r.ok())
            .unwrap_or_default();
        let program_name = data.get("currentProgramSceneName").and_then(Value::as_str);
        let preview_name = data.get("currentPreviewSceneName").and_then(Value::as_str);
        let (names, program_index, preview_index) =
            normalize_scene_list(scenes, program_name, preview_name);
        self.state
            .write()
            .await
            .apply_scene_list(names, program_index, preview_index);
        self.fire_tally_if_changed().await;
    }

    async fn apply_studio_mode(&mut self, data: &Value) {
        if let Some(enabled) = data.get("studioModeEnabled").and_then(Value::as_bool) {
            self.state.write().await.studio_mode = enabled;
        }
    }

    async fn fire_tally_if_changed(&mut self) {
        let packed = self.state.read().await.tally_packed;
        if packed != self.last_tally {
            self.last_tally = packed;
            let _ = self.events.send(SwitcherEvent::TallyChanged(packed));
        }
    }

    async fn refresh_scene_list(&mut self) {
        self.internal_request_counter += 1;
        let request_id = format!("mixlink-internal-{}", self.internal_request_counter);
        let envelope = Envelope {
            op: op::REQUEST,
            d: serde_json::to_value(RequestData {
                request_type: "GetSceneList".to_string(),
                request_id,
                request_data: None,
            })
            .expect("RequestData always serializes"),
        };
        if let Ok(text) = serde_json::to_string(&envelope) {
            let _ = self.write.send(Message::Text(text)).await;
        }
    }
}

async fn send_envelope(ws: &mut Stream, envelope: &Envelope) -> Result<()> {
    let text = serde_json::to_string(envelope)?;
    ws.send(Message::Text(text)).await.map_err(Error::WebSocket)
}

async fn recv_envelope(ws: &mut Stream) -> Result<Option<Envelope>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(Error::WebSocket(e)),
            None => return Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// The scene-list-applying path used by both the initial fetch and the
    /// `SceneListChanged` refresh is exercised directly against `ObsState`
    /// here; the socket-facing wiring around it is integration-tested at
    /// the facade level.
    #[tokio::test]
    async fn scene_list_apply_reorders_and_packs_tally() {
        let mut state = ObsState::default();
        let scenes: Vec<SceneEntry> = serde_json::from_value(serde_json::json!([
            {"sceneName": "C"}, {"sceneName": "B"}, {"sceneName": "A"}
        ]))
        .unwrap();
        let (names, program_index, preview_index) =
            normalize_scene_list(scenes, Some("A"), Some("B"));
        state.apply_scene_list(names, program_index, preview_index);

        assert_eq!(state.scenes, vec!["A", "B", "C"]);
        assert_eq!(state.program_index, Some(0));
        assert_eq!(state.preview_index, Some(1));
        assert_ne!(state.tally_packed, 0);
    }
}
