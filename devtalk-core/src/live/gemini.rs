//! WebSocket client for the Gemini Live API.
//!
//! ```text
//! connect() ─► ws handshake ─► send setup ─► spawn writer + reader
//!
//! writer:  outbound chunks ─► realtimeInput frames   (until close requested)
//! reader:  text/binary frames ─► ServerMessage ─► SessionEvent
//! ```
//!
//! `Opened` is emitted when the server acknowledges the setup, not on the TCP
//! handshake: audio sent before `setupComplete` is rejected by the server.

use futures_util::{future::BoxFuture, SinkExt, StreamExt};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::{
    protocol::{ClientMessage, ServerMessage},
    EventSender, LiveConnection, LiveEndpoint, LiveSetup, OutboundSender, SessionEvent,
};
use crate::{
    codec::EncodedChunk,
    error::{Result, TutorError},
};

pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Outbound chunks buffered between the capture worker and the socket.
/// 32 frames of 256 ms each is about eight seconds of speech.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct GeminiLiveEndpoint {
    api_key: String,
    base_url: String,
    outbound_capacity: usize,
}

impl std::fmt::Debug for GeminiLiveEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveEndpoint")
            .field("base_url", &self.base_url)
            .field("outbound_capacity", &self.outbound_capacity)
            .finish_non_exhaustive()
    }
}

impl GeminiLiveEndpoint {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_LIVE_URL.into(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.base_url, self.api_key)
    }
}

impl LiveEndpoint for GeminiLiveEndpoint {
    fn connect(
        &self,
        setup: &LiveSetup,
        events: EventSender,
    ) -> BoxFuture<'static, Result<Box<dyn LiveConnection>>> {
        let missing_key = self.api_key.trim().is_empty();
        let url = self.url();
        let base_url = self.base_url.clone();
        let capacity = self.outbound_capacity;
        let setup_msg = ClientMessage::setup(setup);
        let model = setup.model.clone();

        Box::pin(async move {
            if missing_key {
                return Err(TutorError::Connection("missing API key".into()));
            }
            info!(%base_url, %model, "connecting to live endpoint");
            let (ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| TutorError::Connection(e.to_string()))?;
            let (mut write, mut read) = ws.split();

            let payload = serde_json::to_string(&setup_msg)?;
            write
                .send(Message::Text(payload.into()))
                .await
                .map_err(|e| TutorError::Connection(e.to_string()))?;
            debug!("setup sent");

            let (outbound, mut outbound_rx) = OutboundSender::channel(capacity);
            let (close_tx, mut close_rx) = oneshot::channel::<()>();

            let writer_events = events.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut close_rx => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                        chunk = outbound_rx.recv() => {
                            let Some(chunk) = chunk else { break };
                            if let Err(e) = send_chunk(&mut write, chunk).await {
                                let _ = writer_events.send(SessionEvent::Error(e.to_string()));
                                break;
                            }
                        }
                    }
                }
                debug!("live writer exiting");
            });

            let reader = tokio::spawn(async move {
                let reason = loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => dispatch(text.as_bytes(), &events),
                        Some(Ok(Message::Binary(bytes))) => dispatch(&bytes, &events),
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "closed by server".into());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = events.send(SessionEvent::Error(e.to_string()));
                            break e.to_string();
                        }
                        None => break "stream ended".into(),
                    }
                };
                info!(%reason, "live connection closed");
                let _ = events.send(SessionEvent::Closed(reason));
            });

            Ok(Box::new(GeminiConnection {
                outbound,
                close_tx: Some(close_tx),
                reader: Some(reader),
            }) as Box<dyn LiveConnection>)
        })
    }
}

async fn send_chunk<S>(write: &mut S, chunk: EncodedChunk) -> Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let payload = serde_json::to_string(&ClientMessage::audio(chunk))?;
    write
        .send(Message::Text(payload.into()))
        .await
        .map_err(|e| TutorError::Connection(e.to_string()))
}

fn dispatch(raw: &[u8], events: &EventSender) {
    match serde_json::from_slice::<ServerMessage>(raw) {
        Ok(msg) => {
            if msg.is_setup_complete() {
                let _ = events.send(SessionEvent::Opened);
            }
            if msg.server_content.is_some() {
                let _ = events.send(SessionEvent::Message(msg));
            }
        }
        Err(e) => warn!("unparseable server message: {e}"),
    }
}

struct GeminiConnection {
    outbound: OutboundSender,
    close_tx: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

impl LiveConnection for GeminiConnection {
    fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    fn close(&mut self) -> Result<()> {
        let tx = self
            .close_tx
            .take()
            .ok_or(TutorError::Released("live connection"))?;
        // The writer may already be gone after a transport error.
        let _ = tx.send(());
        // Teardown must not wait for the server to answer the Close frame.
        if let Some(reader) = self.reader.take() {
            reader.abort();
            debug!("live reader stopped");
        }
        Ok(())
    }
}

impl Drop for GeminiConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
