//! Supabase Realtime change listener over the Phoenix channel protocol (vsn 1.0.0).
//!
//! The transport delivers raw text frames; `LiveUpdateListener::service` must run every
//! loop tick to join, heartbeat and drain them. Received changes are queued as
//! `LiveEvent`s for the driver to hand to its message handler.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const PHOENIX_TOPIC: &str = "phoenix";
const EVENT_JOIN: &str = "phx_join";
const EVENT_REPLY: &str = "phx_reply";
const EVENT_ERROR: &str = "phx_error";
const EVENT_CLOSE: &str = "phx_close";
const EVENT_HEARTBEAT: &str = "heartbeat";
const EVENT_CHANGES: &str = "postgres_changes";

/// A join with no `phx_reply` after this long is abandoned and sent again.
pub const JOIN_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    NotConnected,
    Send(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "websocket not connected"),
            Self::Send(err) => write!(f, "websocket send failed: {err}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A text-frame websocket that reconnects on its own.
pub trait RealtimeTransport {
    fn is_connected(&self) -> bool;
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
    /// Next received frame, if any. Never blocks.
    fn try_recv(&mut self) -> Option<String>;
}

/// Stand-in for builds without a live listener. Never connects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransport;

impl RealtimeTransport for NoTransport {
    fn is_connected(&self) -> bool {
        false
    }

    fn send_text(&mut self, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn try_recv(&mut self) -> Option<String> {
        None
    }
}

/// Row-change interest on one table. An empty filter matches all rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSubscription {
    pub event: String,
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

impl ChangeSubscription {
    pub fn new(table: &str, event: &str, schema: &str, filter: &str) -> Self {
        Self {
            event: event.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            filter: filter.to_string(),
        }
    }
}

/// Websocket endpoint for a project's REST base URL.
pub fn realtime_endpoint(base_url: &str, api_key: &str) -> Option<String> {
    let base = base_url.trim().trim_end_matches('/');
    let host = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return None;
    };
    Some(format!("{host}/realtime/v1/websocket?apikey={api_key}&vsn=1.0.0"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// A row change, as the raw frame text.
    Change { raw: String },
    JoinRejected { reason: String },
}

#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

pub struct LiveUpdateListener<T> {
    transport: T,
    topic: String,
    access_token: String,
    subscriptions: Vec<ChangeSubscription>,
    heartbeat_interval: Duration,
    listening: bool,
    was_connected: bool,
    joined: bool,
    join_ref: Option<String>,
    join_sent_ms: Option<u64>,
    next_ref: u64,
    last_heartbeat_ms: u64,
    events: VecDeque<LiveEvent>,
    queue_depth: usize,
}

impl<T: RealtimeTransport> LiveUpdateListener<T> {
    pub fn new(
        transport: T,
        channel: &str,
        access_token: &str,
        heartbeat_interval: Duration,
        queue_depth: usize,
    ) -> Self {
        Self {
            transport,
            topic: format!("realtime:{channel}"),
            access_token: access_token.to_string(),
            subscriptions: Vec::new(),
            heartbeat_interval,
            listening: false,
            was_connected: false,
            joined: false,
            join_ref: None,
            join_sent_ms: None,
            next_ref: 0,
            last_heartbeat_ms: 0,
            events: VecDeque::with_capacity(queue_depth),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Registers interest. Takes effect on the next join.
    pub fn subscribe(&mut self, subscription: ChangeSubscription) {
        info!(
            "[Realtime] Listening for {} on {}.{}",
            subscription.event, subscription.schema, subscription.table
        );
        self.subscriptions.push(subscription);
    }

    /// Start joining once the transport is up.
    pub fn listen(&mut self) {
        self.listening = true;
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Keep-alive and receive path. Call every tick.
    pub fn service(&mut self, now_ms: u64) {
        if !self.listening {
            return;
        }

        if !self.transport.is_connected() {
            if self.was_connected {
                warn!("[Realtime] Connection lost, will rejoin");
                self.was_connected = false;
                self.mark_left();
            }
            return;
        }
        if !self.was_connected {
            info!("[Realtime] Connected");
            self.was_connected = true;
        }

        while let Some(text) = self.transport.try_recv() {
            self.handle_frame(text);
        }

        if let Some(sent_ms) = self.join_sent_ms {
            if now_ms.saturating_sub(sent_ms) >= JOIN_REPLY_TIMEOUT.as_millis() as u64 {
                warn!("[Realtime] No reply to join on {}, rejoining", self.topic);
                self.mark_left();
            }
        }

        if self.join_ref.is_none() {
            self.send_join(now_ms);
        } else if now_ms.saturating_sub(self.last_heartbeat_ms)
            >= self.heartbeat_interval.as_millis() as u64
        {
            self.send_heartbeat(now_ms);
        }
    }

    pub fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.pop_front()
    }

    fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn mark_left(&mut self) {
        self.joined = false;
        self.join_ref = None;
        self.join_sent_ms = None;
    }

    fn send_join(&mut self, now_ms: u64) {
        let reference = self.make_ref();
        let frame = json!({
            "topic": self.topic,
            "event": EVENT_JOIN,
            "payload": {
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": self.subscriptions,
                },
                "access_token": self.access_token,
            },
            "ref": reference,
        });
        match self.transport.send_text(&frame.to_string()) {
            Ok(()) => {
                debug!("[Realtime] Join sent (ref {reference})");
                self.join_ref = Some(reference);
                self.join_sent_ms = Some(now_ms);
                self.last_heartbeat_ms = now_ms;
            }
            Err(err) => warn!("[Realtime] Join failed: {err}"),
        }
    }

    fn send_heartbeat(&mut self, now_ms: u64) {
        let reference = self.make_ref();
        let frame = json!({
            "topic": PHOENIX_TOPIC,
            "event": EVENT_HEARTBEAT,
            "payload": {},
            "ref": reference,
        });
        // A failed heartbeat is retried at the next interval.
        self.last_heartbeat_ms = now_ms;
        if let Err(err) = self.transport.send_text(&frame.to_string()) {
            warn!("[Realtime] Heartbeat failed: {err}");
        }
    }

    fn handle_frame(&mut self, text: String) {
        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("[Realtime] Ignoring unparseable frame: {err}");
                return;
            }
        };

        match frame.event.as_str() {
            EVENT_CHANGES if frame.topic == self.topic => {
                self.push_event(LiveEvent::Change { raw: text });
            }
            EVENT_REPLY if frame.topic == self.topic && frame.reference == self.join_ref => {
                self.join_sent_ms = None;
                let status = frame.payload.get("status").and_then(Value::as_str);
                if status == Some("ok") {
                    info!("[Realtime] Subscribed to {}", self.topic);
                    self.joined = true;
                } else {
                    let reason = frame
                        .payload
                        .get("response")
                        .map(Value::to_string)
                        .unwrap_or_default();
                    error!("[Realtime] Join rejected: {reason}");
                    self.push_event(LiveEvent::JoinRejected { reason });
                }
            }
            EVENT_ERROR | EVENT_CLOSE if frame.topic == self.topic => {
                warn!("[Realtime] Channel {} ({}), rejoining", frame.event, self.topic);
                self.mark_left();
            }
            _ => debug!("[Realtime] {} on {}", frame.event, frame.topic),
        }
    }

    fn push_event(&mut self, event: LiveEvent) {
        if self.events.len() >= self.queue_depth {
            warn!("[Realtime] Event queue full, dropping oldest");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::{RealtimeTransport, TransportError};

    #[derive(Default)]
    pub struct FakeTransport {
        pub connected: bool,
        pub sent: Vec<String>,
        pub inbox: VecDeque<String>,
    }

    impl FakeTransport {
        pub fn connected() -> Self {
            Self {
                connected: true,
                ..Self::default()
            }
        }
    }

    impl RealtimeTransport for FakeTransport {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.sent.push(text.to_string());
            Ok(())
        }

        fn try_recv(&mut self) -> Option<String> {
            self.inbox.pop_front()
        }
    }
}
