//! TCP client for the motion-control SDK sidecar
//!
//! The vendor SDK runs in a separate sidecar process that owns the controller
//! connection. Protocol is newline-delimited JSON:
//! - Request:      `{"id":N,"cmd":"move","ticket":T,"mode":0,"joints":[...]}`
//! - Reply:        `{"id":N,"status":0,"value":...}` (non-zero status = command error)
//! - Notification: `{"event":"motion_done","ticket":T}`
//!
//! The first request after connecting is always
//! `{"id":1,"cmd":"connect","address":"<controller>","mode":<mode>}`.
//!
//! Lines are written by a dedicated writer task, so a request dropped
//! mid-flight never leaves a partial line on the socket.

use crate::domain::types::{
    DigitalOutput, JointPose, MotionState, MoveMode, MoveTicket, OperationMode,
};
use crate::io::actuator::{Actuator, ActuatorError, NotifyCallback};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_MOTION_DONE: &str = "motion_done";

type PendingReplies = Arc<Mutex<FxHashMap<u64, oneshot::Sender<Reply>>>>;

/// Log an unparseable sidecar line (cold path)
#[cold]
fn log_bad_line(line: &str, e: &serde_json::Error) {
    warn!(line = %line, error = %e, "bridge_bad_line");
}

#[derive(Debug)]
struct Reply {
    status: Option<i64>,
    value: Option<Value>,
}

/// Any line the sidecar sends
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    status: Option<i64>,
    value: Option<Value>,
    event: Option<String>,
    ticket: Option<u64>,
}

/// Connection settings for the sidecar
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Sidecar TCP address
    pub bridge_addr: String,
    /// Controller address forwarded in the handshake
    pub controller_addr: String,
    pub connect_mode: u8,
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
}

pub struct BridgeActuator {
    lines_tx: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
    next_id: AtomicU64,
    reply_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BridgeActuator {
    /// Connect to the sidecar and open the controller session
    pub async fn connect(
        settings: &BridgeSettings,
        notify: NotifyCallback,
    ) -> Result<Self, ActuatorError> {
        let connect_err = |reason: String| ActuatorError::Connect {
            addr: settings.bridge_addr.clone(),
            reason,
        };

        let stream =
            match tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&settings.bridge_addr))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(connect_err(e.to_string())),
                Err(_) => return Err(connect_err("timed out".to_string())),
            };
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let pending: PendingReplies = Arc::new(Mutex::new(FxHashMap::default()));
        let reader = tokio::spawn(read_loop(read_half, pending.clone(), notify));
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(write_half, lines_rx, pending.clone()));

        let bridge = Self {
            lines_tx,
            pending,
            next_id: AtomicU64::new(1),
            reply_timeout: settings.reply_timeout,
            reader,
            writer,
        };

        let args = json!({
            "address": settings.controller_addr,
            "mode": settings.connect_mode,
        });
        match bridge.request("connect", args).await {
            Ok(_) => {}
            Err(ActuatorError::Status { code, .. }) => {
                return Err(connect_err(format!("controller refused session (status {})", code)))
            }
            Err(e) => return Err(connect_err(e.to_string())),
        }

        info!(
            bridge_addr = %settings.bridge_addr,
            controller = %settings.controller_addr,
            "bridge_connected"
        );
        Ok(bridge)
    }

    /// Send one command and wait for its reply
    async fn request(&self, op: &'static str, args: Value) -> Result<Option<Value>, ActuatorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut msg = Map::new();
        msg.insert("id".to_string(), id.into());
        msg.insert("cmd".to_string(), op.into());
        if let Value::Object(fields) = args {
            msg.extend(fields);
        }
        let mut line = serde_json::to_string(&Value::Object(msg))
            .map_err(|e| ActuatorError::Protocol(e.to_string()))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);

        if self.lines_tx.send(line).is_err() {
            self.pending.lock().remove(&id);
            return Err(ActuatorError::Disconnected);
        }

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(Reply { status: Some(0), value })) => Ok(value),
            Ok(Ok(Reply { status: Some(code), .. })) => Err(ActuatorError::Status { op, code }),
            Ok(Ok(Reply { status: None, .. })) => {
                Err(ActuatorError::Protocol(format!("{} reply carried no status", op)))
            }
            Ok(Err(_)) => Err(ActuatorError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(ActuatorError::ReplyTimeout {
                    op,
                    timeout_ms: self.reply_timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for BridgeActuator {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Write queued request lines in order; a write error fails every outstanding request
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut lines_rx: mpsc::UnboundedReceiver<String>,
    pending: PendingReplies,
) {
    while let Some(line) = lines_rx.recv().await {
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            warn!(error = %e, "bridge_write_error");
            break;
        }
    }
    pending.lock().clear();
}

/// Dispatch replies to waiting requests and notifications to the callback
async fn read_loop(read_half: OwnedReadHalf, pending: PendingReplies, notify: NotifyCallback) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "bridge_read_error");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let msg: Incoming = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(e) => {
                log_bad_line(line, &e);
                continue;
            }
        };

        match (msg.event.as_deref(), msg.ticket, msg.id) {
            (Some(EVENT_MOTION_DONE), Some(ticket), _) => notify(MoveTicket(ticket)),
            (Some(other), _, _) => debug!(event = %other, "bridge_event_ignored"),
            (None, _, Some(id)) => {
                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Reply { status: msg.status, value: msg.value });
                    }
                    None => debug!(id = %id, "bridge_reply_unmatched"),
                }
            }
            (None, _, None) => warn!(line = %line, "bridge_line_without_id"),
        }
    }

    // Dropping the senders fails every outstanding request with Disconnected
    pending.lock().clear();
    warn!("bridge_disconnected");
}

fn expect_u64(op: &'static str, value: Option<Value>) -> Result<u64, ActuatorError> {
    value
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| ActuatorError::Protocol(format!("{} reply carried no integer value", op)))
}

#[async_trait]
impl Actuator for BridgeActuator {
    async fn set_operation_mode(&self, mode: OperationMode) -> Result<(), ActuatorError> {
        self.request("set_operation_mode", json!({ "mode": mode.code() })).await.map(|_| ())
    }

    async fn set_override_ratio(&self, percent: u8) -> Result<(), ActuatorError> {
        self.request("set_override_ratio", json!({ "ratio": percent })).await.map(|_| ())
    }

    async fn set_speed(&self, percent: u8) -> Result<(), ActuatorError> {
        self.request("set_speed", json!({ "speed": percent })).await.map(|_| ())
    }

    async fn move_joints(
        &self,
        ticket: MoveTicket,
        mode: MoveMode,
        joints: &JointPose,
    ) -> Result<(), ActuatorError> {
        let args = json!({ "ticket": ticket.0, "mode": mode.code(), "joints": joints.0 });
        self.request("move", args).await.map(|_| ())
    }

    async fn abort(&self) -> Result<(), ActuatorError> {
        self.request("abort", json!({})).await.map(|_| ())
    }

    async fn pending_commands(&self) -> Result<usize, ActuatorError> {
        let value = self.request("pending_count", json!({})).await?;
        Ok(expect_u64("pending_count", value)? as usize)
    }

    async fn motion_state(&self) -> Result<MotionState, ActuatorError> {
        let value = self.request("motion_state", json!({})).await?;
        Ok(MotionState::from_code(expect_u64("motion_state", value)? as i64))
    }

    async fn set_digital_outputs(&self, outputs: &[DigitalOutput]) -> Result<(), ActuatorError> {
        let channels: Vec<u16> = outputs.iter().map(|o| o.channel).collect();
        let values: Vec<u8> = outputs.iter().map(|o| o.value as u8).collect();
        let args = json!({ "channels": channels, "values": values, "count": outputs.len() });
        self.request("set_digital_outputs", args).await.map(|_| ())
    }
}
