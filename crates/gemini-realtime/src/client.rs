use crate::client::stats::Stats;
use crate::types::{ClientMessage, FunctionResponse, RealtimeInput, ServerEvent, ServerMessage, Setup, ToolResponse};
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub(crate) mod config;
pub(crate) mod consts;
pub(crate) mod stats;
mod utils;

pub type ClientTx = mpsc::Sender<ClientMessage>;
pub type ServerRx = mpsc::Receiver<ServerEvent>;
type ServerTx = mpsc::Sender<ServerEvent>;

/// Handle to one duplex Live session.
///
/// The outbound queue exists before the socket does: messages sent while the
/// handshake is still running are buffered and flushed right after `setup`.
/// Server events arrive on a single ordered channel, taken once with
/// [`Client::server_events`].
pub struct Client {
    c_tx: ClientTx,
    s_rx: Option<ServerRx>,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    /// Get the server event receiver. Can only be taken once.
    pub fn server_events(&mut self) -> Result<ServerRx> {
        self.s_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("server_events channel has already been taken"))
    }

    /// A sender that feeds the same outbound queue as this client.
    pub fn sender(&self) -> ClientTx {
        self.c_tx.clone()
    }

    pub fn stats(&self) -> Result<Stats> {
        self.stats
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow::anyhow!("failed to get stats"))
    }

    async fn send_client_message(&self, message: ClientMessage) -> Result<()> {
        self.c_tx
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("session is closed"))
    }

    /// Queue a chunk of base64 PCM audio.
    pub async fn send_audio(&self, mime_type: &str, base64_data: String) -> Result<()> {
        self.send_client_message(ClientMessage::RealtimeInput(RealtimeInput::audio(
            mime_type,
            base64_data,
        )))
        .await
    }

    /// Queue the response to a tool call.
    pub async fn send_tool_response(&self, response: FunctionResponse) -> Result<()> {
        self.send_client_message(ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![response],
        }))
        .await
    }
}

/// Opens a session against `config`, sending `setup` as the first message.
///
/// Returns immediately. Connection failures are reported on the server event
/// channel as `Error` followed by `Close`.
pub fn open_with_config(capacity: usize, config: config::Config, setup: Setup) -> Client {
    let (c_tx, c_rx) = mpsc::channel(capacity);
    let (s_tx, s_rx) = mpsc::channel(capacity);
    let stats = Arc::new(Mutex::new(Stats::new()));

    tokio::spawn(run_connection(config, setup, c_rx, s_tx, stats.clone()));

    Client {
        c_tx,
        s_rx: Some(s_rx),
        stats,
    }
}

/// Opens a session with the default config read from the environment.
pub fn open(setup: Setup) -> Client {
    open_with_config(1024, config::Config::new(), setup)
}

async fn run_connection(
    config: config::Config,
    setup: Setup,
    mut c_rx: mpsc::Receiver<ClientMessage>,
    s_tx: ServerTx,
    stats: Arc<Mutex<Stats>>,
) {
    let request = match utils::build_request(&config) {
        Ok(request) => request,
        Err(e) => {
            report_failure(&s_tx, format!("invalid endpoint: {e}")).await;
            return;
        }
    };

    let ws_stream = match tokio_tungstenite::connect_async(request).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            tracing::error!("failed to connect to Gemini Live: {}", e);
            report_failure(&s_tx, format!("connection failed: {e}")).await;
            return;
        }
    };
    tracing::info!("Connected to Gemini Live, model={}", config.model());

    let (mut write, read) = ws_stream.split();

    match serde_json::to_string(&ClientMessage::Setup(setup)) {
        Ok(text) => {
            if let Err(e) = write.send(Message::Text(text)).await {
                tracing::error!("failed to send setup: {}", e);
                report_failure(&s_tx, format!("setup failed: {e}")).await;
                return;
            }
        }
        Err(e) => {
            report_failure(&s_tx, format!("failed to serialize setup: {e}")).await;
            return;
        }
    }

    let writer_tx = s_tx.clone();
    let mut reader = tokio::spawn(read_loop(read, s_tx, stats.clone()));

    // Drain the outbound queue, including anything buffered during the handshake.
    let mut reader_done = false;
    loop {
        tokio::select! {
            message = c_rx.recv() => {
                let Some(message) = message else { break };
                if !forward(&mut write, &writer_tx, &message).await {
                    break;
                }
            }
            _ = &mut reader => {
                reader_done = true;
                break;
            }
        }
    }

    if let Err(e) = write.close().await {
        tracing::debug!("error while closing socket: {}", e);
    }
    if !reader_done {
        reader.abort();
    }
    if let Ok(stats) = stats.lock() {
        tracing::info!(
            "Gemini Live session finished. messages: {}, total_tokens: {}",
            stats.messages_received(),
            stats.total_tokens()
        );
    }
}

/// Writes one outbound message. Returns `false` once the socket is unusable,
/// after reporting the failure on the server event channel.
async fn forward<W>(write: &mut W, writer_tx: &ServerTx, message: &ClientMessage) -> bool
where
    W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("failed to serialize message: {}", e);
            return true;
        }
    };
    match write.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("failed to send message: {}", e);
            let _ = writer_tx
                .send(ServerEvent::Error(format!("send failed: {e}")))
                .await;
            false
        }
    }
}

async fn read_loop<S>(mut read: S, s_tx: ServerTx, stats: Arc<Mutex<Stats>>)
where
    S: futures_util::Stream<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin,
{
    while let Some(message) = read.next().await {
        let payload = match message {
            Err(e) => {
                tracing::error!("failed to read message: {}", e);
                let _ = s_tx.send(ServerEvent::Error(e.to_string())).await;
                break;
            }
            Ok(Message::Text(text)) => text.into_bytes(),
            // The Live endpoint frames JSON as binary as well.
            Ok(Message::Binary(bin)) => bin,
            Ok(Message::Close(reason)) => {
                tracing::info!("connection closed: {:?}", reason);
                let reason = reason.map(|frame| format!("{} {}", u16::from(frame.code), frame.reason));
                let _ = s_tx.send(ServerEvent::Close { reason }).await;
                return;
            }
            Ok(_) => continue,
        };

        match serde_json::from_slice::<ServerMessage>(&payload) {
            Ok(message) => {
                record(&stats, &message);
                if s_tx.send(ServerEvent::Message(Box::new(message))).await.is_err() {
                    tracing::debug!("server event receiver dropped");
                    return;
                }
            }
            Err(e) => {
                tracing::error!(
                    "failed to deserialize message: {}, text=> {:?}",
                    e,
                    String::from_utf8_lossy(&payload)
                );
            }
        }
    }
    let _ = s_tx.send(ServerEvent::Close { reason: None }).await;
}

fn record(stats: &Mutex<Stats>, message: &ServerMessage) {
    let Ok(mut guard) = stats.lock() else {
        tracing::error!("failed to update stats");
        return;
    };
    guard.record_message();
    if let Some(usage) = &message.usage_metadata {
        let input = usage.prompt_token_count.unwrap_or(0);
        let output = usage.response_token_count.unwrap_or(0);
        let total = usage.total_token_count.unwrap_or(input + output);
        guard.update_usage(total, input, output);
        tracing::debug!(
            "total_tokens: {}, input_tokens: {}, output_tokens: {}",
            total,
            input,
            output
        );
    }
}

async fn report_failure(s_tx: &ServerTx, message: String) {
    let _ = s_tx.send(ServerEvent::Error(message.clone())).await;
    let _ = s_tx
        .send(ServerEvent::Close {
            reason: Some(message),
        })
        .await;
}
