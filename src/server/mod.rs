//! Web server: REST surface and the chat WebSocket
//!
//! The long-lived collaborators (LLM adapter, TTS pool, stores, the
//! orchestrator) are constructed once at startup and passed around as an
//! explicit state bundle.

pub mod ws;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::context::web_search::WebSearchFacade;
use crate::knowledge::{KnowledgeFacade, MemoryStore, Persona, PersonaStore, WorldBook};
use crate::llm::OllamaClient;
use crate::prefs::{PreferenceStore, UserPreferences};
use crate::session::{history::HistoryStore, SessionManager};
use crate::stream::{StreamOrchestrator, TurnDeps};
use crate::tts::{TtsClient, TtsPool};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub orchestrator: Arc<StreamOrchestrator>,
    pub prefs: Arc<PreferenceStore>,
    pub knowledge: Arc<KnowledgeFacade>,
    pub history: Arc<HistoryStore>,
    pub http: reqwest::Client,
    pub started_at: DateTime<Utc>,
}

/// Wire the collaborators together and serve until shutdown
pub async fn start(config: Config) -> Result<()> {
    config.ensure_dirs().context("Failed to create data directories")?;
    let config = Arc::new(config);

    let llm = Arc::new(
        OllamaClient::new(&config.ollama.base_url, config.ollama.timeout)
            .map_err(|e| anyhow::anyhow!("LLM client init failed: {e}"))?,
    );

    let tts_client = Arc::new(TtsClient::new(
        &config.python.services.tts_url,
        config.python.timeout.connect_seconds,
        config.python.timeout.read_seconds,
    )?);
    let tts_pool = Arc::new(TtsPool::new(tts_client, config.system.tts_concurrency));

    let personas = Arc::new(PersonaStore::new(config.resource.personas_dir()));
    personas.reload().await?;
    let memory = Arc::new(MemoryStore::new(config.resource.memories_dir()));
    let world_book = Arc::new(WorldBook::new(
        config.resource.memories_dir().join("world_book.json"),
    ));
    world_book.reload().await?;
    let knowledge = Arc::new(KnowledgeFacade::new(personas, memory, world_book));

    let history = Arc::new(HistoryStore::new(config.resource.sessions_dir()));
    let sessions = Arc::new(SessionManager::new(
        history.clone(),
        Duration::from_secs(config.system.session_timeout),
    ));
    sessions.clone().start_reaper();

    let web_search = Arc::new(WebSearchFacade::new(
        config.web_search.clone(),
        config.ai.web_search_decision.clone(),
    )?);

    let orchestrator = Arc::new(StreamOrchestrator::new(Arc::new(TurnDeps {
        llm,
        tts_pool,
        history: history.clone(),
        knowledge: knowledge.clone(),
        web_search,
        config: config.clone(),
    })));

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.python.timeout.connect_seconds))
        .timeout(Duration::from_secs(config.python.timeout.read_seconds))
        .build()?;

    let state = ServerState {
        config: config.clone(),
        sessions,
        orchestrator,
        prefs: Arc::new(PreferenceStore::new(config.resource.preferences_dir())),
        knowledge,
        history,
        http,
        started_at: Utc::now(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws/chat", get(ws::ws_handler))
        .route("/api/system/health", get(health_handler))
        .route("/api/system/info", get(info_handler))
        .route("/api/system/stats", get(stats_handler))
        .route(
            "/api/personas",
            get(list_personas_handler).post(save_persona_handler),
        )
        .route("/api/personas/reload", post(reload_personas_handler))
        .route(
            "/api/personas/{name}",
            get(get_persona_handler)
                .put(update_persona_handler)
                .delete(delete_persona_handler),
        )
        .route(
            "/api/preferences/{user}",
            get(get_preferences_handler).put(put_preferences_handler),
        )
        .route("/api/preferences/reset", post(reset_preferences_handler))
        .route("/api/chat/session", get(list_sessions_handler))
        .route("/api/chat/session/{id}", delete(delete_session_handler))
        .route("/api/chat/history/{id}", get(history_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    info!("Listening on http://{addr} (model {})", config.ollama.model);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ─── system ──────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn info_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "name": crate::NAME,
        "version": crate::VERSION,
        "model": state.config.ollama.model,
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

async fn stats_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "activeSessions": state.sessions.count().await,
        "uptimeSeconds": uptime,
    }))
}

// ─── personas ────────────────────────────────────────────────

async fn list_personas_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.knowledge.personas.list().await)
}

async fn get_persona_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.knowledge.personas.get(&name).await {
        Some(persona) => (StatusCode::OK, Json(json!(persona))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown persona '{name}'") })),
        )
            .into_response(),
    }
}

async fn save_persona_handler(
    State(state): State<ServerState>,
    Json(persona): Json<Persona>,
) -> impl IntoResponse {
    match state.knowledge.personas.save(persona).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn update_persona_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(mut persona): Json<Persona>,
) -> impl IntoResponse {
    persona.name = name;
    match state.knowledge.personas.save(persona).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn delete_persona_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.knowledge.personas.delete(&name).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn reload_personas_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.knowledge.personas.reload().await {
        Ok(count) => Json(json!({ "loaded": count })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ─── preferences ─────────────────────────────────────────────

async fn get_preferences_handler(
    State(state): State<ServerState>,
    Path(user): Path<String>,
) -> impl IntoResponse {
    Json(state.prefs.load(&user).await)
}

async fn put_preferences_handler(
    State(state): State<ServerState>,
    Path(user): Path<String>,
    Json(prefs): Json<UserPreferences>,
) -> impl IntoResponse {
    match state.prefs.save(&user, &prefs).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct ResetRequest {
    #[serde(default)]
    user: Option<String>,
}

async fn reset_preferences_handler(
    State(state): State<ServerState>,
    Json(req): Json<ResetRequest>,
) -> impl IntoResponse {
    let user = req.user.unwrap_or_else(|| "default".to_string());
    match state.prefs.reset(&user).await {
        Ok(prefs) => Json(prefs).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ─── sessions & history ──────────────────────────────────────

async fn list_sessions_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let mut active = state.sessions.ids().await;
    active.sort();
    let persisted = state.history.list().await.unwrap_or_default();
    Json(json!({ "active": active, "persisted": persisted }))
}

async fn delete_session_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.sessions.remove(&id).await;
    match state.history.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn history_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.history.load(&id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
