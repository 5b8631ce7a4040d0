use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::Result;
use embedded_svc::ws::FrameType;
use esp_idf_svc::ws::client::{EspWebSocketClient, EspWebSocketClientConfig, WebSocketEventType};
use log::{debug, info, warn};

use crate::realtime::{RealtimeTransport, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ESP-IDF websocket client. Frames arrive on the client task and are handed
/// to the main loop through a channel; the client reconnects by itself.
pub struct EspRealtimeTransport {
    client: EspWebSocketClient<'static>,
    frames: Receiver<String>,
}

impl EspRealtimeTransport {
    pub fn connect(url: &str) -> Result<Self> {
        let config = EspWebSocketClientConfig {
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let (tx, frames) = mpsc::channel::<String>();

        let client = EspWebSocketClient::new(url, &config, CONNECT_TIMEOUT, move |event| {
            match event {
                Ok(event) => match event.event_type {
                    WebSocketEventType::Connected => info!("[Realtime] Websocket connected"),
                    WebSocketEventType::Disconnected => warn!("[Realtime] Websocket disconnected"),
                    WebSocketEventType::Closed => debug!("[Realtime] Websocket closed"),
                    WebSocketEventType::Text(text) => {
                        // Receiver is gone only when the transport was dropped.
                        let _ = tx.send(text.to_string());
                    }
                    _ => {}
                },
                Err(err) => warn!("[Realtime] Websocket error: {err:?}"),
            }
        })?;

        Ok(Self { client, frames })
    }
}

impl RealtimeTransport for EspRealtimeTransport {
    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.client.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .send(FrameType::Text(false), text.as_bytes())
            .map_err(|err| TransportError::Send(format!("{err:?}")))
    }

    fn try_recv(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }
}
