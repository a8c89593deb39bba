//! Ownership and quota guards for session-scoped routes.
//!
//! Guard order on every session-scoped operation is fixed: identity (see
//! [`super::server::auth_middleware`]) → ownership → quota → handler. A
//! caller that is not authenticated or does not own the session is never
//! charged a quota unit.

use crate::api::auth::AuthUser;
use crate::api::handlers::AppState;
use crate::db::{first_of_next_month, Database, WaSession};
use crate::error::{ApiError, Result};
use axum::extract::{Path, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Deserialize)]
pub struct SessionPath {
    pub session_id: String,
}

/// Session record resolved by the ownership guard, attached to request
/// extensions for the handler.
#[derive(Debug, Clone)]
pub struct OwnedSession(pub WaSession);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for OwnedSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self> {
        parts
            .extensions
            .get::<OwnedSession>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("Session context missing".to_string()))
    }
}

/// Resolve a session record and confirm the caller owns it.
///
/// Lookup-miss and ownership-miss produce the same response so a non-owner
/// cannot probe which identifiers exist.
pub async fn validate_ownership(
    db: &Database,
    user: &AuthUser,
    session_id: &str,
) -> Result<WaSession> {
    if session_id.is_empty() {
        return Err(ApiError::BadRequest("Session ID not provided".to_string()));
    }

    match db.find_session(session_id).await? {
        Some(session) if session.user_id == user.id => {
            debug!(
                "Session ownership validated: user {} session {}",
                user.id, session_id
            );
            Ok(session)
        }
        Some(_) => {
            warn!(
                "User {} attempted to access session {} they don't own",
                user.id, session_id
            );
            Err(ApiError::Forbidden(
                "You don't have access to this session".to_string(),
            ))
        }
        None => Err(ApiError::Forbidden(
            "You don't have access to this session".to_string(),
        )),
    }
}

/// Global-uniqueness check for session creation: the identifier namespace is
/// shared across all users.
pub async fn validate_not_exists(db: &Database, session_id: &str) -> Result<()> {
    if db.session_exists(session_id).await? {
        return Err(ApiError::Conflict("Session ID already exists".to_string()));
    }
    Ok(())
}

/// Per-user concurrent session ceiling, counting active and inactive records
/// only. Best-effort under concurrency: two in-flight creations from the
/// same user can both pass the check.
pub async fn check_session_ceiling(db: &Database, user_id: i64, max: u32) -> Result<()> {
    let count = db.count_live_sessions(user_id).await?;

    if count >= i64::from(max) {
        warn!("User {} reached the session limit ({})", user_id, max);
        return Err(ApiError::SessionLimit { max });
    }

    Ok(())
}

/// Rate-limit snapshot after a successful charge, reflected in the
/// X-RateLimit-* response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: i64,
    pub used: i64,
    pub reset_date: Option<String>,
}

impl RateLimitInfo {
    pub fn remaining(&self) -> i64 {
        (self.limit - self.used).max(0)
    }
}

/// Check and charge one API call against the caller's monthly ceiling.
///
/// Rolls the billing period over when the reset date has passed, rejects
/// when `used >= limit` without charging, and otherwise charges via an
/// atomic in-place increment. The rollover write and the increment are each
/// atomic on their own; the sequence as a whole is not, so two concurrent
/// requests can both observe a stale pre-rollover state. That window is
/// accepted.
pub async fn enforce_api_quota(
    db: &Database,
    user_id: i64,
    today: NaiveDate,
) -> Result<RateLimitInfo> {
    let Some(mut user) = db.find_user_by_id(user_id).await? else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    let reset_passed = match user
        .limit_reset_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    {
        Some(reset_date) => reset_date < today,
        None => true,
    };

    if reset_passed {
        let next_reset = first_of_next_month(today).to_string();
        db.reset_api_usage(user_id, &next_reset).await?;
        info!("API usage counter reset for user {}", user_id);

        user.api_calls_used = 0;
        user.limit_reset_date = Some(next_reset);
    }

    if user.api_calls_used >= user.api_calls_limit {
        warn!(
            "API limit exceeded for user {}: {}/{}",
            user_id, user.api_calls_used, user.api_calls_limit
        );
        return Err(ApiError::RateLimit {
            limit: user.api_calls_limit,
            used: user.api_calls_used,
            reset_date: user.limit_reset_date,
        });
    }

    db.increment_api_calls(user_id).await?;

    Ok(RateLimitInfo {
        limit: user.api_calls_limit,
        used: user.api_calls_used + 1,
        reset_date: user.limit_reset_date,
    })
}

/// Middleware: resolve the session named in the path and reject non-owners
/// before anything downstream runs.
pub async fn ownership_middleware(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(path): Path<SessionPath>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let session = validate_ownership(&state.db, &user, &path.session_id).await?;
    req.extensions_mut().insert(OwnedSession(session));
    Ok(next.run(req).await)
}

/// Middleware: monthly API-call ceiling. Runs after ownership validation;
/// charges the call, appends the audit entry and stamps the rate-limit
/// headers on the response.
pub async fn quota_middleware(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    req: Request,
    next: Next,
) -> Result<Response> {
    let info = enforce_api_quota(&state.db, user.id, Utc::now().date_naive()).await?;

    // Audit append is fire-and-forget relative to the response: its failure
    // must not fail the guarded request, only leave a trace in the log.
    if let Err(e) = state
        .db
        .log_api_call(user.id, req.uri().path(), req.method().as_str())
        .await
    {
        warn!("Failed to record API usage entry for user {}: {}", user.id, e);
    }

    debug!(
        "API call counted for user {}: {}/{}",
        user.id, info.used, info.limit
    );

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&info.limit.to_string()) {
        headers.insert(HEADER_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&info.remaining().to_string()) {
        headers.insert(HEADER_REMAINING, value);
    }
    let reset = info.reset_date.as_deref().unwrap_or("not-set");
    if let Ok(value) = HeaderValue::from_str(reset) {
        headers.insert(HEADER_RESET, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_quota_charges_until_limit() {
        let db = test_db().await;
        let id = db
            .insert_user("alice", "hash", None, 3, "2099-01-01")
            .await
            .unwrap();
        let today = day(2024, 5, 10);

        for expected_used in 1..=3 {
            let info = enforce_api_quota(&db, id, today).await.unwrap();
            assert_eq!(info.used, expected_used);
            assert_eq!(info.limit, 3);
        }

        // Fourth call is rejected and not charged
        let err = enforce_api_quota(&db, id, today).await.unwrap_err();
        match err {
            ApiError::RateLimit { limit, used, .. } => {
                assert_eq!(limit, 3);
                assert_eq!(used, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let user = db.find_user_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.api_calls_used, 3, "used never exceeds limit");
    }

    #[tokio::test]
    async fn test_quota_monthly_rollover() {
        let db = test_db().await;
        let id = db
            .insert_user("alice", "hash", None, 100, "2024-04-01")
            .await
            .unwrap();
        for _ in 0..50 {
            db.increment_api_calls(id).await.unwrap();
        }

        // Reset date has passed: counter resets, the call is then charged
        let info = enforce_api_quota(&db, id, day(2024, 4, 15)).await.unwrap();
        assert_eq!(info.used, 1);
        assert_eq!(info.reset_date.as_deref(), Some("2024-05-01"));

        let user = db.find_user_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.api_calls_used, 1);
        assert_eq!(user.limit_reset_date.as_deref(), Some("2024-05-01"));
    }

    #[tokio::test]
    async fn test_quota_unset_reset_date_starts_a_period() {
        let db = test_db().await;
        let id = db.insert_user("alice", "hash", None, 100, "").await.unwrap();

        let info = enforce_api_quota(&db, id, day(2024, 12, 31)).await.unwrap();
        assert_eq!(info.used, 1);
        assert_eq!(info.reset_date.as_deref(), Some("2025-01-01"));
    }

    #[tokio::test]
    async fn test_quota_reset_date_today_is_not_rolled_over() {
        let db = test_db().await;
        let id = db
            .insert_user("alice", "hash", None, 100, "2024-05-01")
            .await
            .unwrap();
        db.increment_api_calls(id).await.unwrap();

        // Strictly-before comparison: the reset day itself still belongs to
        // the old period
        let info = enforce_api_quota(&db, id, day(2024, 5, 1)).await.unwrap();
        assert_eq!(info.used, 2);
        assert_eq!(info.reset_date.as_deref(), Some("2024-05-01"));
    }

    #[tokio::test]
    async fn test_quota_unknown_user() {
        let db = test_db().await;
        let err = enforce_api_quota(&db, 999, day(2024, 5, 1)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ownership_folds_missing_and_foreign() {
        let db = test_db().await;
        let alice = db
            .insert_user("alice", "hash", None, 100, "2099-01-01")
            .await
            .unwrap();
        let bob = db
            .insert_user("bob", "hash", None, 100, "2099-01-01")
            .await
            .unwrap();
        db.insert_session(alice, "mine", "mine").await.unwrap();

        let bob_user = AuthUser {
            id: bob,
            username: "bob".to_string(),
        };

        let foreign = validate_ownership(&db, &bob_user, "mine").await.unwrap_err();
        let missing = validate_ownership(&db, &bob_user, "ghost").await.unwrap_err();

        assert!(matches!(foreign, ApiError::Forbidden(_)));
        assert!(matches!(missing, ApiError::Forbidden(_)));
        assert_eq!(foreign.to_string(), missing.to_string());

        let alice_user = AuthUser {
            id: alice,
            username: "alice".to_string(),
        };
        let session = validate_ownership(&db, &alice_user, "mine").await.unwrap();
        assert_eq!(session.session_id, "mine");
    }

    #[tokio::test]
    async fn test_session_ceiling() {
        let db = test_db().await;
        let id = db
            .insert_user("alice", "hash", None, 100, "2099-01-01")
            .await
            .unwrap();

        check_session_ceiling(&db, id, 2).await.unwrap();
        db.insert_session(id, "s1", "s1").await.unwrap();
        db.insert_session(id, "s2", "s2").await.unwrap();

        let err = check_session_ceiling(&db, id, 2).await.unwrap_err();
        assert!(matches!(err, ApiError::SessionLimit { max: 2 }));

        // Terminating frees a slot
        db.set_session_status("s1", crate::db::SessionStatus::Terminated)
            .await
            .unwrap();
        check_session_ceiling(&db, id, 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_not_exists() {
        let db = test_db().await;
        let id = db
            .insert_user("alice", "hash", None, 100, "2099-01-01")
            .await
            .unwrap();

        validate_not_exists(&db, "fresh").await.unwrap();
        db.insert_session(id, "fresh", "fresh").await.unwrap();

        let err = validate_not_exists(&db, "fresh").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
