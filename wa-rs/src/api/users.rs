//! Profile, usage and session management endpoints for the authenticated
//! user, plus the session operations gated by the full guard chain.

use axum::extract::State;
use axum::Json;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::api::auth::AuthUser;
use crate::api::guards::{check_session_ceiling, validate_not_exists, OwnedSession};
use crate::api::handlers::AppState;
use crate::db::{SessionStatus, UsageEntry, WaSession};
use crate::error::{ApiError, Result};
use crate::pool::{ClientHandle, ClientPool};

fn session_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w-]+$").expect("valid pattern"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub api_calls_used: i64,
    pub api_calls_limit: i64,
    pub limit_reset_date: Option<String>,
    pub created_at: String,
    pub session_count: i64,
    pub max_sessions: u32,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: ProfileInfo,
}

/// GET /users/me - Profile plus live session count against the ceiling
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>> {
    let Some(record) = state.db.find_user_by_id(user.id).await? else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    let session_count = state.db.count_live_sessions(user.id).await?;

    Ok(Json(ProfileResponse {
        success: true,
        user: ProfileInfo {
            id: record.id,
            username: record.username,
            email: record.email,
            api_calls_used: record.api_calls_used,
            api_calls_limit: record.api_calls_limit,
            limit_reset_date: record.limit_reset_date,
            created_at: record.created_at,
            session_count,
            max_sessions: state.config.quota.max_sessions_per_user,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
    pub reset_date: Option<String>,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub success: bool,
    pub usage: UsageSnapshot,
    pub recent_calls: Vec<UsageEntry>,
}

/// GET /users/me/usage - Quota snapshot plus the last 10 audit entries
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UsageResponse>> {
    let Some(record) = state.db.find_user_by_id(user.id).await? else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    let recent_calls = state.db.recent_api_calls(user.id, 10).await?;

    let percentage = if record.api_calls_limit > 0 {
        let raw = record.api_calls_used as f64 / record.api_calls_limit as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    } else {
        0.0
    };

    Ok(Json(UsageResponse {
        success: true,
        usage: UsageSnapshot {
            used: record.api_calls_used,
            limit: record.api_calls_limit,
            remaining: (record.api_calls_limit - record.api_calls_used).max(0),
            reset_date: record.limit_reset_date,
            percentage,
        },
        recent_calls,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: i64,
    pub session_id: String,
    pub name: Option<String>,
    pub status: String,
    pub created_at: String,
    pub last_active: Option<String>,
    pub is_connected: bool,
    pub client_state: String,
}

impl SessionInfo {
    fn new(session: WaSession, client: Option<ClientHandle>) -> Self {
        let (is_connected, client_state) = match client {
            Some(handle) => (handle.is_connected(), handle.state.as_str().to_string()),
            None => (false, "NOT_LOADED".to_string()),
        };

        Self {
            id: session.id,
            session_id: session.session_id,
            name: session.name,
            status: session.status,
            created_at: session.created_at,
            last_active: session.last_active,
            is_connected,
            client_state,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub success: bool,
    pub sessions: Vec<SessionInfo>,
    pub total: usize,
    pub max_sessions: u32,
}

/// GET /users/me/sessions - Records enriched with live client status
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<SessionListResponse>> {
    let records = state.db.list_sessions(user.id).await?;

    let mut sessions = Vec::with_capacity(records.len());
    for record in records {
        let client = state.pool.get(&record.session_id).await;
        sessions.push(SessionInfo::new(record, client));
    }

    Ok(Json(SessionListResponse {
        success: true,
        total: sessions.len(),
        max_sessions: state.config.quota.max_sessions_per_user,
        sessions,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub name: String,
}

/// POST /users/me/sessions - Create a session record
///
/// Guard order per the creation pipeline: session-count ceiling first, then
/// global identifier uniqueness, then the insert.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>> {
    if req.session_id.is_empty() {
        return Err(ApiError::BadRequest("sessionId is required".to_string()));
    }

    if !session_id_pattern().is_match(&req.session_id) {
        return Err(ApiError::BadRequest(
            "sessionId can only contain letters, numbers, hyphens and underscores".to_string(),
        ));
    }

    check_session_ceiling(
        &state.db,
        user.id,
        state.config.quota.max_sessions_per_user,
    )
    .await?;

    validate_not_exists(&state.db, &req.session_id).await?;

    let name = req.name.unwrap_or_else(|| req.session_id.clone());
    state
        .db
        .insert_session(user.id, &req.session_id, &name)
        .await
        .map_err(conflict_on_duplicate)?;

    info!("Session {} created by user {}", req.session_id, user.id);

    Ok(Json(CreateSessionResponse {
        success: true,
        message: "Session created successfully. Use /start to initialize the client.".to_string(),
        session_id: req.session_id,
        name,
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// DELETE /users/me/sessions/:session_id - Terminate a session
///
/// The live client is disposed and the record flips to terminated; the row
/// itself is kept for audit.
pub async fn terminate_session(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    OwnedSession(session): OwnedSession,
) -> Result<Json<MessageResponse>> {
    state.pool.delete_session(&session.session_id).await?;
    state
        .db
        .set_session_status(&session.session_id, SessionStatus::Terminated)
        .await?;

    info!("Session {} terminated by user {}", session.session_id, user.id);

    Ok(Json(MessageResponse {
        success: true,
        message: "Session terminated successfully".to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub client_state: String,
}

/// GET /users/me/sessions/:session_id/start - Set up the live client
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    OwnedSession(session): OwnedSession,
) -> Result<Json<SessionStateResponse>> {
    state.pool.setup_session(&session.session_id).await?;
    state.db.mark_session_active(&session.session_id).await?;

    let client_state = client_state_of(&state.pool, &session.session_id).await;

    Ok(Json(SessionStateResponse {
        success: true,
        message: "Session started".to_string(),
        session_id: session.session_id,
        client_state,
    }))
}

/// GET /users/me/sessions/:session_id/stop - Dispose of the live client
pub async fn stop_session(
    State(state): State<Arc<AppState>>,
    OwnedSession(session): OwnedSession,
) -> Result<Json<MessageResponse>> {
    state.pool.delete_session(&session.session_id).await?;
    state
        .db
        .set_session_status(&session.session_id, SessionStatus::Inactive)
        .await?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Session stopped".to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub success: bool,
    pub session_id: String,
    pub status: String,
    pub is_connected: bool,
    pub client_state: String,
}

/// GET /users/me/sessions/:session_id/status - Record status plus pool
/// liveness
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    OwnedSession(session): OwnedSession,
) -> Result<Json<SessionStatusResponse>> {
    let client = state.pool.get(&session.session_id).await;
    let (is_connected, client_state) = match client {
        Some(handle) => (handle.is_connected(), handle.state.as_str().to_string()),
        None => (false, "NOT_LOADED".to_string()),
    };

    Ok(Json(SessionStatusResponse {
        success: true,
        session_id: session.session_id,
        status: session.status,
        is_connected,
        client_state,
    }))
}

/// A concurrent creation with the same identifier can slip past
/// [`validate_not_exists`] and trip the UNIQUE constraint instead. That is
/// still an identifier conflict, not a store failure.
fn conflict_on_duplicate(err: ApiError) -> ApiError {
    if let ApiError::Database(e) = &err {
        if e.as_database_error()
            .map_or(false, |d| d.is_unique_violation())
        {
            return ApiError::Conflict("Session ID already exists".to_string());
        }
    }
    err
}

async fn client_state_of(pool: &ClientPool, session_id: &str) -> String {
    match pool.get(session_id).await {
        Some(handle) => handle.state.as_str().to_string(),
        None => "NOT_LOADED".to_string(),
    }
}
