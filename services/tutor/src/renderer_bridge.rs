//! HTTP/WebSocket bridge for an external renderer.
//!
//! `GET /ws` pushes a JSON [`SessionView`] whenever the session snapshot or the
//! visualization slot changes. `GET /visualization` returns the current
//! visualization command.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tutor_core::orchestrator::{SessionOrchestrator, SessionSnapshot, SessionStatus};
use tutor_core::realtime_api::VisualizationRenderer;
use tutor_core::visualization::VisualizationCommand;

/// What a renderer needs to draw one frame of the lesson.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub status: &'static str,
    pub subject_id: Option<String>,
    pub speaking: bool,
    pub transcript: String,
    pub visualization: VisualizationCommand,
    pub avatar: Option<AvatarView>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarView {
    pub track_id: String,
    pub stream_id: String,
}

impl SessionView {
    pub fn new(snapshot: &SessionSnapshot, visualization: &VisualizationCommand) -> Self {
        Self {
            status: status_label(snapshot.status),
            subject_id: snapshot.subject.as_ref().map(|s| s.id.clone()),
            speaking: snapshot.speaking,
            transcript: snapshot.transcript.as_str().to_string(),
            visualization: visualization.clone(),
            avatar: snapshot.avatar_stream.as_ref().map(|stream| AvatarView {
                track_id: stream.track_id().to_string(),
                stream_id: stream.stream_id().to_string(),
            }),
            last_error: snapshot.last_error.clone(),
        }
    }
}

pub fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::AcquiringDevices => "acquiring_devices",
        SessionStatus::Connecting => "connecting",
        SessionStatus::Active => "active",
        SessionStatus::Closing => "closing",
        SessionStatus::Closed => "closed",
        SessionStatus::Failed => "failed",
    }
}

/// Renderer used when drawing happens out of process: commands are logged
/// here and picked up by bridge clients from the visualization slot.
#[derive(Debug, Default)]
pub struct TracingRenderer;

impl VisualizationRenderer for TracingRenderer {
    fn render(&self, command: &VisualizationCommand) -> Result<()> {
        if command.is_clear() {
            tracing::debug!("Visualization cleared.");
        } else {
            tracing::info!(
                "Visualization {:?} {} {}",
                command.kind,
                command.sub_type.as_deref().unwrap_or("-"),
                command.label.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }
}

pub fn router(orchestrator: SessionOrchestrator) -> Router {
    // Permissive CORS so a renderer served from another origin can connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/visualization", get(current_visualization))
        .layer(cors)
        .with_state(orchestrator)
}

/// Serves the bridge until the task is dropped or the listener fails.
pub async fn serve(addr: SocketAddr, orchestrator: SessionOrchestrator) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind renderer bridge on {addr}"))?;
    tracing::info!("Renderer bridge listening on {}", addr);
    axum::serve(listener, router(orchestrator))
        .await
        .context("Renderer bridge stopped")
}

async fn current_visualization(
    State(orchestrator): State<SessionOrchestrator>,
) -> Json<VisualizationCommand> {
    let current = orchestrator.visualization().borrow().clone();
    Json(current)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(orchestrator): State<SessionOrchestrator>,
) -> Response {
    tracing::debug!("Renderer WebSocket upgrade request received");
    ws.on_upgrade(move |socket| push_views(socket, orchestrator))
}

async fn push_views(mut socket: WebSocket, orchestrator: SessionOrchestrator) {
    tracing::info!("Renderer connected.");
    let mut snapshots = orchestrator.subscribe();
    let mut visualizations = orchestrator.visualization();

    loop {
        let view = SessionView::new(&snapshots.borrow_and_update(), &visualizations.borrow_and_update());
        let text = match serde_json::to_string(&view) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize session view: {}", e);
                break;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }

        tokio::select! {
            changed = snapshots.changed() => if changed.is_err() { break },
            changed = visualizations.changed() => if changed.is_err() { break },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Renderers only listen; anything they send is ignored.
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::info!("Renderer disconnected.");
}
