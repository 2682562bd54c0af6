use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;
use watch_presence_mirror::{
    ActivityPayload, StatusTransport, TransportEvent, TransportFactory,
};

const PORTS: [u16; 10] = [6463, 6464, 6465, 6466, 6467, 6468, 6469, 6470, 6471, 6472];
const IPC_SLOTS: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
const BACKOFF_STEPS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

const OPCODE_HANDSHAKE: i32 = 0;
const OPCODE_FRAME: i32 = 1;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// RPC-level error reported by Discord in a response frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("discord rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

enum Wire {
    Ipc(IpcWire),
    Ws(Ws),
}

#[cfg(unix)]
enum IpcWire {
    Unix(tokio::net::UnixStream),
}

#[cfg(windows)]
enum IpcWire {
    Pipe(tokio::net::windows::named_pipe::NamedPipeClient),
}

/// Builds [`DiscordRpcClient`] instances for the mirror; each gets the
/// mirror's event channel.
pub struct DiscordTransportFactory {
    client_id: String,
}

impl DiscordTransportFactory {
    pub fn new(client_id: String) -> Self {
        Self { client_id }
    }
}

impl TransportFactory for DiscordTransportFactory {
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn StatusTransport> {
        Box::new(DiscordRpcClient::new(self.client_id.clone(), events))
    }
}

/// Connection to the local Discord client, IPC socket first with a
/// WebSocket fallback.
///
/// Connection-state flips go out as [`TransportEvent`]s; RPC-level errors
/// are reported the same way and never tear the connection down.
pub struct DiscordRpcClient {
    client_id: String,
    wire: Option<Wire>,
    backoff_idx: usize,
    next_retry_at: Instant,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl DiscordRpcClient {
    pub fn new(client_id: String, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            client_id,
            wire: None,
            backoff_idx: 0,
            next_retry_at: Instant::now(),
            events,
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.wire.is_some() {
            return Ok(());
        }
        let now = Instant::now();
        if now < self.next_retry_at {
            return Err(anyhow!("discord reconnect backoff active"));
        }

        if let Some(ipc) = try_connect_ipc(&self.client_id).await {
            self.wire = Some(Wire::Ipc(ipc));
        } else if let Some(ws) = try_connect_ws(&self.client_id).await {
            self.wire = Some(Wire::Ws(ws));
        } else {
            self.schedule_backoff();
            return Err(anyhow!("unable to connect to local Discord RPC"));
        }

        self.backoff_idx = 0;
        self.next_retry_at = Instant::now();
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn send_payload(&mut self, payload: serde_json::Value) -> Result<Vec<u8>> {
        match self.wire.as_mut() {
            Some(Wire::Ipc(ipc)) => {
                send_ipc_frame(ipc, OPCODE_FRAME, payload.to_string().as_bytes()).await?;
                let (_, raw) = recv_ipc_frame(ipc).await?;
                Ok(raw)
            }
            Some(Wire::Ws(ws)) => {
                ws.send(Message::Text(payload.to_string()))
                    .await
                    .context("failed sending discord ws message")?;
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => Ok(text.into_bytes()),
                    Some(Ok(Message::Binary(bin))) => Ok(bin),
                    Some(Ok(_)) => Ok(Vec::new()),
                    Some(Err(err)) => Err(anyhow!("discord ws receive failed: {err}")),
                    None => Err(anyhow!("discord ws closed")),
                }
            }
            None => Err(anyhow!("discord transport not connected")),
        }
    }

    fn drop_connection(&mut self) {
        if self.wire.take().is_some() {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    fn schedule_backoff(&mut self) {
        let idx = self.backoff_idx.min(BACKOFF_STEPS.len() - 1);
        self.next_retry_at = Instant::now() + BACKOFF_STEPS[idx];
        self.backoff_idx = (self.backoff_idx + 1).min(BACKOFF_STEPS.len() - 1);
    }
}

#[async_trait]
impl StatusTransport for DiscordRpcClient {
    async fn connect(&mut self) -> Result<()> {
        self.ensure_connected().await
    }

    async fn disconnect(&mut self) {
        match self.wire.take() {
            Some(Wire::Ws(mut ws)) => {
                let _ = ws.close(None).await;
                let _ = self.events.send(TransportEvent::Disconnected);
            }
            Some(Wire::Ipc(_)) => {
                let _ = self.events.send(TransportEvent::Disconnected);
            }
            None => {}
        }
    }

    fn is_connected(&self) -> bool {
        self.wire.is_some()
    }

    async fn set_activity(&mut self, payload: &ActivityPayload) -> Result<()> {
        self.ensure_connected().await?;

        let mut activity = json!({
            "type": payload.activity_type,
            "name": payload.name,
            "details": payload.details,
            "state": payload.state,
            "buttons": payload.buttons.iter().map(|b| json!({"label": b.label, "url": b.url})).collect::<Vec<_>>()
        });
        if let Some(obj) = activity.as_object_mut() {
            if let Some(assets) = build_assets(payload) {
                obj.insert("assets".to_string(), assets);
            }
        }

        let frame = json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": std::process::id(),
                "activity": activity
            },
            "nonce": nonce()
        });

        match self.send_payload(frame).await {
            Ok(raw) => {
                if let Some(err) = parse_rpc_error(&raw) {
                    let _ = self.events.send(TransportEvent::Error {
                        code: err.code,
                        message: err.message,
                    });
                }
                Ok(())
            }
            Err(err) => {
                self.drop_connection();
                self.schedule_backoff();
                Err(err)
            }
        }
    }
}

async fn try_connect_ws(client_id: &str) -> Option<Ws> {
    for port in PORTS {
        let url = Url::parse(&format!("ws://127.0.0.1:{port}/?v=1&client_id={client_id}")).ok()?;
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                let handshake = json!({ "v": 1, "client_id": client_id });
                if ws.send(Message::Text(handshake.to_string())).await.is_err() {
                    continue;
                }
                if ws.next().await.is_some() {
                    debug!("connected to discord rpc websocket on port {}", port);
                    return Some(ws);
                }
            }
            Err(err) => {
                debug!("discord ws connect failed on port {}: {}", port, err);
            }
        }
    }
    None
}

async fn try_connect_ipc(client_id: &str) -> Option<IpcWire> {
    for slot in IPC_SLOTS {
        match connect_ipc_slot(slot).await {
            Ok(mut ipc) => {
                let hs = json!({"v": 1, "client_id": client_id}).to_string();
                if send_ipc_frame(&mut ipc, OPCODE_HANDSHAKE, hs.as_bytes())
                    .await
                    .is_err()
                {
                    continue;
                }
                if recv_ipc_frame(&mut ipc).await.is_ok() {
                    debug!("connected to discord ipc slot {}", slot);
                    return Some(ipc);
                }
            }
            Err(err) => {
                debug!("discord ipc slot {} unavailable: {}", slot, err);
            }
        }
    }
    None
}

#[cfg(unix)]
async fn connect_ipc_slot(slot: u8) -> Result<IpcWire> {
    use std::path::PathBuf;

    let mut paths: Vec<PathBuf> = Vec::new();
    if let Ok(tmpdir) = std::env::var("TMPDIR") {
        paths.push(PathBuf::from(tmpdir).join(format!("discord-ipc-{slot}")));
    }
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        paths.push(PathBuf::from(runtime_dir).join(format!("discord-ipc-{slot}")));
    }
    paths.push(PathBuf::from(format!("/tmp/discord-ipc-{slot}")));
    paths.push(PathBuf::from(format!("/private/tmp/discord-ipc-{slot}")));

    for p in paths {
        if let Ok(stream) = tokio::net::UnixStream::connect(&p).await {
            return Ok(IpcWire::Unix(stream));
        }
    }

    Err(anyhow!("no unix discord ipc socket found"))
}

#[cfg(windows)]
async fn connect_ipc_slot(slot: u8) -> Result<IpcWire> {
    use tokio::net::windows::named_pipe::ClientOptions;
    let path = format!(r"\\?\pipe\discord-ipc-{}", slot);
    let pipe = ClientOptions::new().open(&path)?;
    Ok(IpcWire::Pipe(pipe))
}

fn encode_frame(opcode: i32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

async fn send_ipc_frame(ipc: &mut IpcWire, opcode: i32, payload: &[u8]) -> Result<()> {
    let frame = encode_frame(opcode, payload);
    match ipc {
        #[cfg(unix)]
        IpcWire::Unix(stream) => {
            stream.write_all(&frame).await?;
            stream.flush().await?;
        }
        #[cfg(windows)]
        IpcWire::Pipe(pipe) => {
            pipe.write_all(&frame).await?;
            pipe.flush().await?;
        }
    }
    Ok(())
}

async fn recv_ipc_frame(ipc: &mut IpcWire) -> Result<(i32, Vec<u8>)> {
    let mut hdr = [0u8; 8];
    match ipc {
        #[cfg(unix)]
        IpcWire::Unix(stream) => stream.read_exact(&mut hdr).await?,
        #[cfg(windows)]
        IpcWire::Pipe(pipe) => pipe.read_exact(&mut hdr).await?,
    };

    let opcode = i32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let len = i32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    if len < 0 {
        return Err(anyhow!("invalid discord ipc frame length"));
    }

    let mut payload = vec![0u8; len as usize];
    match ipc {
        #[cfg(unix)]
        IpcWire::Unix(stream) => stream.read_exact(&mut payload).await?,
        #[cfg(windows)]
        IpcWire::Pipe(pipe) => pipe.read_exact(&mut payload).await?,
    };

    if opcode != OPCODE_FRAME && opcode != OPCODE_HANDSHAKE {
        warn!("discord ipc unexpected opcode {}", opcode);
    }

    Ok((opcode, payload))
}

fn nonce() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{n:x}")
}

fn build_assets(payload: &ActivityPayload) -> Option<serde_json::Value> {
    let mut assets = serde_json::Map::new();
    if let Some(v) = &payload.large_image {
        assets.insert("large_image".to_string(), json!(v));
    }
    if let Some(v) = &payload.large_text {
        assets.insert("large_text".to_string(), json!(v));
    }
    if let Some(v) = &payload.small_image {
        assets.insert("small_image".to_string(), json!(v));
    }
    if let Some(v) = &payload.small_text {
        assets.insert("small_text".to_string(), json!(v));
    }
    if assets.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(assets))
    }
}

fn parse_rpc_error(raw: &[u8]) -> Option<RpcError> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;

    let is_error = value
        .get("evt")
        .and_then(|v| v.as_str())
        .map(|evt| evt.eq_ignore_ascii_case("ERROR"))
        .unwrap_or(false);
    if !is_error {
        return None;
    }

    let data = value.get("data");
    Some(RpcError {
        code: data
            .and_then(|d| d.get("code"))
            .and_then(|c| c.as_i64())
            .unwrap_or_default(),
        message: data
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown discord rpc error")
            .to_string(),
    })
}
