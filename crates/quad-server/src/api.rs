use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use quad_shared::constants::SUGGESTION_LIMIT;
use quad_shared::gate::{ConnectionGate, RequestPayload};
use quad_shared::protocol::{
    AcceptRequestBody, AcceptResponse, ChatOverview, HistoryResponse, LoginRequest, LoginResponse,
    PublicKeyResponse, PublishKeyRequest, RegisterRequest, RegisterResponse, SendRequestBody,
    Suggestion,
};
use quad_shared::validation::validate_registration;
use quad_shared::UserId;
use quad_store::{password, Database};

use crate::auth::{bearer_token, AuthUser, TokenRegistry};
use crate::config::ServerConfig;
use crate::delivery::{ws_handler, DeliveryHub};
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub tokens: TokenRegistry,
    pub hub: DeliveryHub,
    pub gate: ConnectionGate,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            tokens: TokenRegistry::new(config.token_ttl),
            hub: DeliveryHub::new(),
            gate: config.gate(),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/user/public-key", post(publish_public_key))
        .route("/users/suggestions", get(suggestions))
        .route("/users/:id/public-key", get(fetch_public_key))
        .route("/chat", get(chat_overview))
        .route("/chat/request", post(send_request))
        .route("/chat/accept", post(accept_request))
        .route("/messages", get(message_history))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Deserialize)]
struct HistoryParams {
    partner: UserId,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Accounts ───

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ServerError> {
    validate_registration(&req, &state.config.email_domain)?;

    let secret = req.password.clone();
    let password_hash = blocking(move || password::hash_password(&secret)).await??;

    let user = state.db.lock().await.create_user(&req, &password_hash)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id: user.id }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let (id, stored) = state
        .db
        .lock()
        .await
        .credentials(&req.email)?
        .ok_or(ServerError::InvalidCredentials)?;

    let secret = req.password;
    if !blocking(move || password::verify_password(&secret, &stored)).await? {
        return Err(ServerError::InvalidCredentials);
    }

    let user = state.db.lock().await.get_user(id)?;

    let token = state.tokens.issue(user.id).await;
    info!(user = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
    }))
}

/// Run password hashing on the blocking pool so it never holds up the
/// runtime or the database lock.
async fn blocking<T, F>(f: F) -> Result<T, ServerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("hashing task failed: {e}")))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ServerError> {
    let token = bearer_token(&headers).ok_or(ServerError::Unauthorized)?;
    if !state.tokens.revoke(token).await {
        return Err(ServerError::Unauthorized);
    }
    Ok(Json(MessageResponse {
        message: "Logged out",
    }))
}

// ─── Public keys ───

async fn publish_public_key(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(req): Json<PublishKeyRequest>,
) -> Result<Json<MessageResponse>, ServerError> {
    let key = req.public_key.trim();
    if key.is_empty() {
        return Err(ServerError::BadRequest("Public key is required".into()));
    }

    state.db.lock().await.set_public_key(me, key)?;

    Ok(Json(MessageResponse {
        message: "Public key updated successfully",
    }))
}

/// Only the caller's own key and keys of their active partners are
/// readable.
async fn fetch_public_key(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<UserId>,
) -> Result<Json<PublicKeyResponse>, ServerError> {
    let db = state.db.lock().await;

    if id != me && !db.is_active_chat(me, id)? {
        return Err(ServerError::Forbidden(format!("No active chat with {id}")));
    }

    let public_key = db.get_public_key(id)?;
    if public_key.is_empty() {
        return Err(ServerError::NotFound(format!(
            "User {id} has not published a public key"
        )));
    }

    Ok(Json(PublicKeyResponse {
        user_id: id,
        public_key,
    }))
}

// ─── Matching ───

async fn suggestions(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<Suggestion>>, ServerError> {
    let ranked = state.db.lock().await.suggestions(me, SUGGESTION_LIMIT)?;
    Ok(Json(ranked))
}

// ─── Connection gate ───

async fn chat_overview(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<ChatOverview>, ServerError> {
    let overview = state.db.lock().await.chat_overview(me)?;
    Ok(Json(overview))
}

async fn send_request(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(body): Json<SendRequestBody>,
) -> Result<(StatusCode, Json<MessageResponse>), ServerError> {
    let payload = RequestPayload {
        message: body.custom_message,
        location_preferences: body.location_preferences,
        code_word: body.code_word,
    };

    state
        .db
        .lock()
        .await
        .send_request(&state.gate, me, body.target_user_id, payload)?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Chat request sent successfully",
        }),
    ))
}

async fn accept_request(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(body): Json<AcceptRequestBody>,
) -> Result<Json<AcceptResponse>, ServerError> {
    let outcome = state
        .db
        .lock()
        .await
        .accept_request(&state.gate, me, body.requester_id)?;

    Ok(Json(AcceptResponse {
        partner: outcome.partner,
        requester_linked: outcome.requester_linked,
    }))
}

// ─── History ───

async fn message_history(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let messages = state.db.lock().await.messages_between(me, params.partner)?;
    Ok(Json(HistoryResponse { messages }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
