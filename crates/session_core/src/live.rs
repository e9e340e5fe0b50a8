//! Live-update channel: connector/session seams plus the production
//! websocket transport.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::{
    domain::ChatId,
    protocol::{LiveClientEvent, LiveServerEvent},
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::warn;
use url::Url;

const LIVE_EVENT_BUFFER: usize = 256;

/// Connection parameters handed to a connector after a successful login.
#[derive(Debug, Clone)]
pub struct LiveChannelParams {
    pub url: Url,
    pub token: String,
    pub chat_id: ChatId,
    /// Deadline for `send-message` acknowledgments.
    pub ack_timeout: Duration,
}

/// An established push connection scoped to one chat.
#[async_trait]
pub trait LiveChannelSession: Send + Sync {
    /// Emits `mount-chat`. Called once, after the caller has subscribed to
    /// events, so that nothing pushed in response can be missed.
    async fn mount_chat(&self, chat_id: &ChatId) -> Result<()>;
    /// Emits `send-message` and resolves with the acknowledgment flag.
    async fn emit_send(&self, chat_id: &ChatId, content: &str) -> Result<bool>;
    fn subscribe_events(&self) -> broadcast::Receiver<LiveServerEvent>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait LiveChannelConnector: Send + Sync {
    async fn connect(&self, params: LiveChannelParams) -> Result<Arc<dyn LiveChannelSession>>;
}

/// Default connector for deployments without a push endpoint; the controller
/// then stays in plain request/response mode.
pub struct MissingLiveChannel;

#[async_trait]
impl LiveChannelConnector for MissingLiveChannel {
    async fn connect(&self, _params: LiveChannelParams) -> Result<Arc<dyn LiveChannelSession>> {
        Err(anyhow!("live update channel is unavailable"))
    }
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Production connector: JSON events over a websocket, authenticated via
/// query parameters, `mount-chat` announced once at open.
pub struct WebSocketLiveChannel;

#[async_trait]
impl LiveChannelConnector for WebSocketLiveChannel {
    async fn connect(&self, params: LiveChannelParams) -> Result<Arc<dyn LiveChannelSession>> {
        let mut url = params.url.clone();
        url.query_pairs_mut()
            .append_pair("token", &params.token)
            .append_pair("chat", params.chat_id.as_str());

        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect live channel: {}", params.url))?;
        let (writer, reader) = stream.split();

        let (events_tx, events_rx) = broadcast::channel(LIVE_EVENT_BUFFER);
        let pending_ack: Arc<Mutex<Option<oneshot::Sender<bool>>>> = Arc::new(Mutex::new(None));
        spawn_reader(reader, events_tx, Arc::clone(&pending_ack));

        Ok(Arc::new(WebSocketSession {
            writer: Mutex::new(writer),
            events: events_rx,
            pending_ack,
            ack_timeout: params.ack_timeout,
        }))
    }
}

fn spawn_reader(
    mut reader: WsReader,
    events: broadcast::Sender<LiveServerEvent>,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
) {
    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<LiveServerEvent>(&text) {
                    Ok(LiveServerEvent::SendAck { success }) => {
                        if let Some(tx) = pending_ack.lock().await.take() {
                            let _ = tx.send(success);
                        } else {
                            warn!("discarding send-ack with no send in flight");
                        }
                    }
                    Ok(event) => {
                        let _ = events.send(event);
                    }
                    Err(err) => warn!("discarding malformed live event: {err}"),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("live channel receive failed: {err}");
                    break;
                }
            }
        }
        // A send caught mid-flight by the disconnect must not hang its caller.
        pending_ack.lock().await.take();
        // The task owns the only sender; dropping it here closes every
        // subscriber, which is how the connection's death is observed.
    });
}

struct WebSocketSession {
    writer: Mutex<WsWriter>,
    events: broadcast::Receiver<LiveServerEvent>,
    pending_ack: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
    ack_timeout: Duration,
}

#[async_trait]
impl LiveChannelSession for WebSocketSession {
    async fn mount_chat(&self, chat_id: &ChatId) -> Result<()> {
        let frame = serde_json::to_string(&LiveClientEvent::MountChat {
            chat_id: chat_id.clone(),
        })?;
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(frame))
            .await
            .context("failed to announce chat mount")
    }

    async fn emit_send(&self, chat_id: &ChatId, content: &str) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_ack.lock().await;
            if pending.is_some() {
                return Err(anyhow!("a send is already awaiting acknowledgment"));
            }
            *pending = Some(tx);
        }

        let frame = serde_json::to_string(&LiveClientEvent::SendMessage {
            chat_id: chat_id.clone(),
            content: content.to_string(),
        })?;
        if let Err(err) = self.writer.lock().await.send(WsMessage::Text(frame)).await {
            self.pending_ack.lock().await.take();
            return Err(anyhow!(err)).context("failed to emit send-message");
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(success)) => Ok(success),
            Ok(Err(_)) => Err(anyhow!("live channel closed before acknowledgment")),
            Err(_) => {
                // Reclaim the slot so the next send is not blocked by a
                // never-acknowledged one.
                self.pending_ack.lock().await.take();
                Err(anyhow!("send acknowledgment timed out"))
            }
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LiveServerEvent> {
        self.events.resubscribe()
    }

    async fn close(&self) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(WsMessage::Close(None))
            .await
            .context("failed to close live channel")
    }
}
