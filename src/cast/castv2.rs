use anyhow::{anyhow, bail, Context, Result};
use native_tls::{TlsConnector, TlsStream};
use prost::Message;
use serde_json::{json, Value};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const DEFAULT_CAST_PORT: u16 = 8009;

const NS_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
const NS_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
const NS_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
const NS_DASHCAST: &str = "urn:x-cast:com.madmod.dashcast";
const DASHCAST_APP_ID: &str = "84912283";

const SENDER_ID: &str = "sender-0";
const RECEIVER_ID: &str = "receiver-0";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Largest frame a cast receiver sends.
const MAX_FRAME_LEN: usize = 64 * 1024;
/// A receiver that stays silent this long (no PONG either) is treated as gone.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a successful dashboard load command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAck {
    pub session_id: String,
    /// The DashCast receiver app had to be started (it was not already running).
    pub launched: bool,
}

#[derive(Debug, Clone)]
struct CastSession {
    app_id: String,
    session_id: String,
    transport_id: String,
}

/// Fetch one `RECEIVER_STATUS` payload.
pub fn receiver_status(host: &str, port: u16) -> Result<Value> {
    let mut conn = CastConnection::connect(host, port, CONNECT_TIMEOUT)
        .with_context(|| format!("Failed to connect to cast host {host}:{port}"))?;
    conn.send_connect(SENDER_ID, RECEIVER_ID)?;
    conn.receiver_status(SENDER_ID)
        .with_context(|| "failed to fetch receiver status")
}

/// Make the receiver show `url` through the DashCast app.
///
/// DashCast is only LAUNCHed when it is not already the running app; the URL
/// message is sent either way.
pub fn load_dashcast(host: &str, port: u16, url: &str) -> Result<LaunchAck> {
    let mut conn = CastConnection::connect(host, port, CONNECT_TIMEOUT)
        .with_context(|| format!("Failed to connect to cast host {host}:{port}"))?;
    conn.send_connect(SENDER_ID, RECEIVER_ID)?;

    let status = conn
        .receiver_status(SENDER_ID)
        .with_context(|| "failed to fetch initial receiver status")?;

    let (session, launched) = match running_dashcast_session(&status) {
        Some(session) => (session, false),
        None => {
            let session = conn
                .launch_app(SENDER_ID, DASHCAST_APP_ID)
                .with_context(|| "failed to launch DashCast receiver app")?;
            (session, true)
        }
    };

    conn.send_connect(SENDER_ID, &session.transport_id)?;
    conn.send_json(
        SENDER_ID,
        &session.transport_id,
        NS_DASHCAST,
        json!({
            "url": url,
            "force": false,
            "reload": false,
            "reload_time": 0
        }),
    )?;

    Ok(LaunchAck {
        session_id: session.session_id,
        launched,
    })
}

/// Hold a connection open and hand every `RECEIVER_STATUS` to `on_status`.
///
/// Returns `Ok(())` once `on_status` returns `false`. Any connection problem,
/// including a heartbeat timeout or a CLOSE from the receiver, is an error.
pub fn watch_receiver_status<F>(host: &str, port: u16, mut on_status: F) -> Result<()>
where
    F: FnMut(&Value) -> bool,
{
    let mut conn = CastConnection::connect(host, port, CONNECT_TIMEOUT)
        .with_context(|| format!("Failed to connect to cast host {host}:{port}"))?;
    conn.send_connect(SENDER_ID, RECEIVER_ID)?;

    let request_id = conn.next_request_id();
    conn.send_json(
        SENDER_ID,
        RECEIVER_ID,
        NS_RECEIVER,
        json!({"type":"GET_STATUS","requestId":request_id}),
    )?;

    let mut last_ping = Instant::now();
    let mut last_seen = Instant::now();

    loop {
        if last_ping.elapsed() >= HEARTBEAT_INTERVAL {
            conn.send_json(SENDER_ID, RECEIVER_ID, NS_HEARTBEAT, json!({"type":"PING"}))?;
            last_ping = Instant::now();
        }
        if last_seen.elapsed() >= HEARTBEAT_TIMEOUT {
            bail!(
                "No traffic from {host}:{port} for {}s",
                HEARTBEAT_TIMEOUT.as_secs()
            );
        }

        let Some(msg) = conn.read_message()? else {
            continue;
        };
        last_seen = Instant::now();

        let Some(value) = msg
            .payload_utf8
            .as_deref()
            .and_then(|p| serde_json::from_str::<Value>(p).ok())
        else {
            continue;
        };

        match classify_watch_message(&msg.namespace, &value) {
            WatchEvent::Ping => {
                conn.send_json(SENDER_ID, &msg.source_id, NS_HEARTBEAT, json!({"type":"PONG"}))?;
            }
            WatchEvent::Closed => {
                bail!("Cast receiver {host}:{port} closed the connection");
            }
            WatchEvent::ReceiverStatus => {
                if !on_status(&value) {
                    return Ok(());
                }
            }
            WatchEvent::Other => {}
        }
    }
}

/// What the status watch does with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchEvent {
    Ping,
    Closed,
    ReceiverStatus,
    Other,
}

fn classify_watch_message(namespace: &str, value: &Value) -> WatchEvent {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    trace!(namespace, kind, "cast message");

    match (namespace, kind) {
        (NS_HEARTBEAT, "PING") => WatchEvent::Ping,
        (NS_CONNECTION, "CLOSE") => WatchEvent::Closed,
        (NS_RECEIVER, "RECEIVER_STATUS") => WatchEvent::ReceiverStatus,
        _ => WatchEvent::Other,
    }
}

/// The DashCast session to reuse, if DashCast is already the running app.
fn running_dashcast_session(status_value: &Value) -> Option<CastSession> {
    extract_session(status_value).filter(|session| session.app_id == DASHCAST_APP_ID)
}

fn extract_session(status_value: &Value) -> Option<CastSession> {
    let applications = status_value
        .get("status")?
        .get("applications")?
        .as_array()?;
    let app = applications.first()?;

    let app_id = app.get("appId")?.as_str()?.to_string();
    let session_id = app.get("sessionId")?.as_str()?.to_string();
    let transport_id = app.get("transportId")?.as_str()?.to_string();

    Some(CastSession {
        app_id,
        session_id,
        transport_id,
    })
}

struct CastConnection<S = TlsStream<TcpStream>> {
    stream: S,
    request_id: u32,
}

impl CastConnection {
    fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let sockaddr = addr
            .to_socket_addrs()
            .with_context(|| format!("Could not resolve {addr}"))?
            .next()
            .ok_or_else(|| anyhow!("No socket address for {addr}"))?;

        let tcp = TcpStream::connect_timeout(&sockaddr, timeout)
            .with_context(|| format!("TCP connect timeout to {addr}"))?;
        tcp.set_read_timeout(Some(Duration::from_millis(500)))
            .with_context(|| "Failed to set read timeout")?;
        tcp.set_write_timeout(Some(Duration::from_secs(5)))
            .with_context(|| "Failed to set write timeout")?;

        // Cast devices present self-signed certificates.
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .with_context(|| "Failed to build TLS connector")?
            .connect(host, tcp)
            .with_context(|| format!("TLS handshake failed for {host}"))?;

        debug!(%addr, "cast connection established");
        Ok(Self::new(tls))
    }
}

impl<S: Read + Write> CastConnection<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            request_id: 1,
        }
    }

    fn next_request_id(&mut self) -> u32 {
        let id = self.request_id;
        self.request_id = self.request_id.saturating_add(1);
        id
    }

    fn send_connect(&mut self, source_id: &str, destination_id: &str) -> Result<()> {
        self.send_json(
            source_id,
            destination_id,
            NS_CONNECTION,
            json!({
                "type":"CONNECT",
                "origin":{},
                "userAgent":"dashcast",
                "senderInfo":{
                    "sdkType":2,
                    "version":"15.605.1.3",
                    "browserVersion":"44.0.2403.30",
                    "platform":4,
                    "systemVersion":"Linux",
                    "connectionType":1
                }
            }),
        )
    }

    fn receiver_status(&mut self, sender: &str) -> Result<Value> {
        let request_id = self.next_request_id();
        self.send_json(
            sender,
            RECEIVER_ID,
            NS_RECEIVER,
            json!({"type":"GET_STATUS","requestId":request_id}),
        )?;

        self.wait_for_json(sender, Duration::from_secs(5), |value| {
            value
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t == "RECEIVER_STATUS")
        })
    }

    fn launch_app(&mut self, sender: &str, app_id: &str) -> Result<CastSession> {
        let request_id = self.next_request_id();
        self.send_json(
            sender,
            RECEIVER_ID,
            NS_RECEIVER,
            json!({
                "type":"LAUNCH",
                "appId":app_id,
                "requestId":request_id
            }),
        )?;

        // Status broadcasts for the previous app may arrive first; wait for ours.
        let status = self.wait_for_json(sender, Duration::from_secs(10), |value| {
            match value.get("type").and_then(Value::as_str) {
                Some("LAUNCH_ERROR") => true,
                Some("RECEIVER_STATUS") => {
                    extract_session(value).is_some_and(|session| session.app_id == app_id)
                }
                _ => false,
            }
        })?;

        if status
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t == "LAUNCH_ERROR")
        {
            bail!("Cast receiver returned LAUNCH_ERROR: {status}");
        }

        extract_session(&status).ok_or_else(|| anyhow!("Failed to parse LAUNCH status"))
    }

    fn send_json(
        &mut self,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
        payload: Value,
    ) -> Result<()> {
        let payload_utf8 = serde_json::to_string(&payload)
            .with_context(|| format!("Failed to serialize payload for namespace {namespace}"))?;

        let message = CastMessage {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: source_id.to_string(),
            destination_id: destination_id.to_string(),
            namespace: namespace.to_string(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(payload_utf8),
            payload_binary: None,
        };

        let encoded = encode_frame(&message)?;
        self.stream
            .write_all(&encoded)
            .with_context(|| "Failed to write cast frame")?;
        self.stream
            .flush()
            .with_context(|| "Failed to flush cast frame")?;

        Ok(())
    }

    fn wait_for_json<F>(
        &mut self,
        sender: &str,
        timeout: Duration,
        mut predicate: F,
    ) -> Result<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut last_json: Option<Value> = None;

        while Instant::now() < deadline {
            let Some(msg) = self.read_message()? else {
                continue;
            };

            let Some(payload_str) = msg.payload_utf8 else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(&payload_str) else {
                continue;
            };

            if msg.namespace == NS_HEARTBEAT
                && value.get("type").and_then(Value::as_str) == Some("PING")
            {
                self.send_json(sender, &msg.source_id, NS_HEARTBEAT, json!({"type":"PONG"}))?;
                continue;
            }

            if predicate(&value) {
                return Ok(value);
            }

            last_json = Some(value);
        }

        let hint = last_json
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<no payload>".to_string());
        bail!("Timed out waiting for cast response. Last payload: {hint}")
    }

    fn read_message(&mut self) -> Result<Option<CastMessage>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if is_timeout(&err) => return Ok(None),
            Err(err) => return Err(err).with_context(|| "Failed to read cast frame length"),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            bail!("Cast frame length {len} exceeds {MAX_FRAME_LEN} bytes");
        }
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .with_context(|| "Failed to read cast frame payload")?;

        decode_frame_payload(&payload).map(Some)
    }
}

/// Length-prefix (big endian u32) a protobuf-encoded message.
fn encode_frame(message: &CastMessage) -> Result<Vec<u8>> {
    let body = message.encode_to_vec();
    let len = u32::try_from(body.len()).with_context(|| "Cast frame too large")?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_frame_payload(payload: &[u8]) -> Result<CastMessage> {
    CastMessage::decode(payload).with_context(|| "Failed to decode cast protobuf message")
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum ProtocolVersion {
    Castv210 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum PayloadType {
    String = 0,
    Binary = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", tag = "1")]
    protocol_version: i32,
    #[prost(string, tag = "2")]
    source_id: String,
    #[prost(string, tag = "3")]
    destination_id: String,
    #[prost(string, tag = "4")]
    namespace: String,
    #[prost(enumeration = "PayloadType", tag = "5")]
    payload_type: i32,
    #[prost(string, optional, tag = "6")]
    payload_utf8: Option<String>,
    #[prost(bytes, optional, tag = "7")]
    payload_binary: Option<Vec<u8>>,
}
