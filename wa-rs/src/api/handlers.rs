//! Authentication endpoints and health check.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::auth::{AuthUser, JwtConfig, OptionalAuthUser};
use crate::config::Config;
use crate::db::{Database, User};
use crate::error::{ApiError, Result};
use crate::pool::ClientPool;
use crate::security::Authenticator;

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub authenticator: Authenticator,
    pub jwt_config: JwtConfig,
    pub pool: ClientPool,
    pub config: Config,
}

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub email: Option<String>,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// User fields exposed over the API. The password hash never leaves the
/// store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub api_calls_used: i64,
    pub api_calls_limit: i64,
    pub limit_reset_date: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            api_calls_used: user.api_calls_used,
            api_calls_limit: user.api_calls_limit,
            limit_reset_date: user.limit_reset_date.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub user: UserInfo,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub valid: bool,
    pub user: UserInfo,
}

fn issue_token(jwt: &JwtConfig, user: &User) -> Result<String> {
    jwt.create_token(user.id, &user.username)
        .map_err(|e| ApiError::Internal(format!("Failed to create token: {}", e)))
}

/// POST /auth/register - Create a new user account
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    let user = state
        .authenticator
        .register(&req.username, &req.password, req.email.as_deref())
        .await?;

    let token = issue_token(&state.jwt_config, &user)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "User registered successfully".to_string(),
        user: UserInfo::from(&user),
        token,
    }))
}

/// POST /auth/login - Authenticate and get a JWT token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = state
        .authenticator
        .login(&req.username, &req.password)
        .await?;

    let token = issue_token(&state.jwt_config, &user)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        user: UserInfo::from(&user),
        token,
    }))
}

/// GET /auth/verify - Confirm the bearer token still resolves to a live user
pub async fn verify(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<VerifyResponse>> {
    // Claims carry id and username, but the profile is re-read so the
    // response reflects current data
    let Some(record) = state.db.find_user_by_id(user.id).await? else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    info!("Token verified for user {}", record.username);

    Ok(Json(VerifyResponse {
        success: true,
        valid: true,
        user: UserInfo::from(&record),
    }))
}

/// GET /health - Service health with database connectivity check. Reports
/// the caller's identity when a valid token is presented, but never rejects.
pub async fn health(
    State(state): State<Arc<AppState>>,
    OptionalAuthUser(user): OptionalAuthUser,
) -> impl IntoResponse {
    let db_healthy = state.db.health_check().await.is_ok();
    let status = if db_healthy { "healthy" } else { "unhealthy" };
    let status_code = if db_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let body = Json(serde_json::json!({
        "status": status,
        "service": "wa-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "database": if db_healthy { "ok" } else { "failed" }
        },
        "user": user.map(|u| u.username),
    }));

    (status_code, body)
}
