use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::{
    app_state::{AppState, SetupPhase, Status},
    models::{MovieProfile, ScoredMovie},
    query_router::Strategy,
    session::Session,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    question: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    answer: String,
    strategy: Strategy,
    turn_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    cypher: Option<String>,
    matches: Vec<ScoredMovie>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/movies/:title", get(movie_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "La pregunta no puede estar vacía."})),
        ));
    }
    let session = ready_session(&state)?;

    match session.handle_query(&payload.question).await {
        Ok(turn) => Ok(Json(ChatResponse {
            answer: turn.answer,
            strategy: turn.strategy,
            turn_id: turn.turn_id,
            cypher: turn.cypher,
            matches: turn.matches,
        })),
        Err(e) => {
            error!("Error respondiendo a la pregunta: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

#[axum::debug_handler]
async fn neo4j_info_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let session = ready_session(&state)?;

    let browser_url = state.config.neo4j.as_ref().map(|neo4j| match Url::parse(&neo4j.uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    });

    match session.graph().ping().await {
        Ok(()) => Ok(Json(json!({
            "status": "ok",
            "backend": session.graph().backend_name(),
            "browser_url": browser_url,
        }))),
        Err(e) => {
            error!("Error en el health check del grafo: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn movie_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<Json<MovieProfile>, ApiError> {
    let session = ready_session(&state)?;

    match session.movie_profile(&title).await {
        Ok(Some(profile)) => Ok(Json(profile)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No existe la película '{}'.", title)})),
        )),
        Err(e) => {
            error!("Error consultando la película '{}': {}", title, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            ))
        }
    }
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

/// La sesión, o 503 con el estado de la preparación si aún no está lista.
fn ready_session(state: &AppState) -> Result<&Session, ApiError> {
    if let Some(session) = state.session.get() {
        return Ok(session);
    }
    let status = state.status();
    let message = match status.phase {
        SetupPhase::Failed => format!("La preparación falló: {}", status.message),
        _ => format!("El sistema aún se está preparando: {}", status.message),
    };
    Err((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": message, "status": status})),
    ))
}
