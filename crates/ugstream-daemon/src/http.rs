use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use ugstream_core::core::DaemonEvent;
use ugstream_core::state::StateManager;
use ugstream_proto::protocol::{Intent, SessionView};
use ugstream_proto::station::{Station, StationId};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct ApiStation<'a> {
    #[serde(flatten)]
    station: &'a Station,
    favorite: bool,
    visible: bool,
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/stations", get(get_stations))
        .route("/api/select/:id", post(select_station))
        .route("/api/next", post(next_station))
        .route("/api/prev", post(prev_station))
        .route("/api/stop", post(stop))
        .route("/api/volume/:percent", post(set_volume))
        .route("/api/favorite/:id", post(toggle_favorite))
        .route("/api/recording/start", post(start_recording))
        .route("/api/recording/stop", post(stop_recording))
        .route("/api/recording.wav", get(recording_wav))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send_intent(state: &HttpState, intent: Intent) -> StatusCode {
    info!("HTTP API: {:?}", intent);
    if state
        .event_tx
        .send(DaemonEvent::Intent(intent))
        .await
        .is_err()
    {
        error!("Failed to forward intent, session core is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionView> {
    Json(state.state_manager.get_view().await)
}

async fn get_stations(State(state): State<HttpState>) -> Response {
    let view = state.state_manager.get_view().await;
    let stations: Vec<ApiStation<'_>> = state
        .state_manager
        .catalog()
        .iter()
        .map(|station| ApiStation {
            station,
            favorite: view.favorites.contains(&station.id),
            visible: view.visible.contains(&station.id),
        })
        .collect();
    Json(stations).into_response()
}

async fn select_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    let id = StationId::from(id.as_str());
    if !state.state_manager.has_station(&id) {
        return StatusCode::NOT_FOUND;
    }
    send_intent(&state, Intent::SelectStation { id }).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::Previous).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::Stop).await
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<i32>) -> StatusCode {
    let value = percent as f32 / 100.0;
    send_intent(&state, Intent::SetVolume { value }).await
}

async fn toggle_favorite(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    let id = StationId::from(id.as_str());
    if !state.state_manager.has_station(&id) {
        return StatusCode::NOT_FOUND;
    }
    send_intent(&state, Intent::ToggleFavorite { id }).await
}

async fn start_recording(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::StartRecording).await
}

async fn stop_recording(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::StopRecording).await
}

async fn recording_wav(State(state): State<HttpState>) -> Response {
    let Some(buffer) = state.state_manager.recording().await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match buffer.wav_bytes() {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "audio/wav".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"recording-{}.wav\"", buffer.id()),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode recording: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
