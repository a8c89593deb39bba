//! HTTP server: route composition and the authentication middleware.
//!
//! Guard chain on session-scoped operations, outermost first:
//! authentication → ownership → quota → handler.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::api::auth::{AuthUser, JwtConfig, OptionalAuthUser};
use crate::api::guards::{ownership_middleware, quota_middleware};
use crate::api::handlers::{self, AppState};
use crate::api::users;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ApiError, Result};
use crate::pool::ClientPool;
use crate::security::Authenticator;

/// API server configuration
pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: Config, db: Database, pool: ClientPool) -> Self {
        let authenticator =
            Authenticator::new(db.clone(), config.quota.default_api_calls_limit);
        let jwt_config = JwtConfig::new(
            config.auth.jwt_secret.clone(),
            config.auth.token_expiry_hours,
        );
        let addr = config.server.listen_addr.clone();

        let state = Arc::new(AppState {
            db,
            authenticator,
            jwt_config,
            pool,
            config,
        });

        Self { state, addr }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Public routes (no auth required)
        let public_routes = Router::new()
            .route("/auth/register", post(handlers::register))
            .route("/auth/login", post(handlers::login));

        // Health works for anonymous callers, but reports identity when a
        // valid token is presented
        let health_route = Router::new()
            .route("/health", get(handlers::health))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                optional_auth_middleware,
            ));

        // Routes that need identity only
        let user_routes = Router::new()
            .route("/auth/verify", get(handlers::verify))
            .route("/users/me", get(users::get_profile))
            .route("/users/me/usage", get(users::get_usage))
            .route(
                "/users/me/sessions",
                get(users::list_sessions).post(users::create_session),
            );

        // Termination needs ownership but is not metered
        let owned_routes = Router::new()
            .route(
                "/users/me/sessions/:session_id",
                delete(users::terminate_session),
            )
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                ownership_middleware,
            ));

        // Session operations behind the full [ownership, quota] chain.
        // route_layer ordering: the last layer added runs first.
        let gated_routes = Router::new()
            .route(
                "/users/me/sessions/:session_id/start",
                get(users::start_session),
            )
            .route(
                "/users/me/sessions/:session_id/stop",
                get(users::stop_session),
            )
            .route(
                "/users/me/sessions/:session_id/status",
                get(users::session_status),
            )
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                quota_middleware,
            ))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                ownership_middleware,
            ));

        let protected_routes = user_routes
            .merge(owned_routes)
            .merge(gated_routes)
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware,
            ));

        Router::new()
            .merge(public_routes)
            .merge(health_route)
            .merge(protected_routes)
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the API server
    pub async fn run(&self) -> std::io::Result<()> {
        let router = self.router();

        info!("Starting API server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Resolve the caller's identity from the Authorization header. Claims are
/// trusted as presented once the signature verifies; components that need
/// fresh data re-read the user row themselves.
fn resolve_bearer(jwt: &JwtConfig, headers: &HeaderMap) -> Result<AuthUser> {
    let Some(header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) else {
        return Err(ApiError::Unauthorized(
            "No authorization token provided".to_string(),
        ));
    };

    let Some(token) = header.strip_prefix("Bearer ") else {
        return Err(ApiError::Unauthorized(
            "Invalid authorization format. Use: Bearer <token>".to_string(),
        ));
    };

    let claims = jwt
        .validate_token(token)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let id = claims
        .sub
        .parse()
        .map_err(|_| ApiError::Unauthorized("Invalid token".to_string()))?;

    Ok(AuthUser {
        id,
        username: claims.username,
    })
}

/// Authentication middleware - rejects the request unless a valid bearer
/// token resolves to an identity
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let user = resolve_bearer(&state.jwt_config, req.headers()).map_err(|e| {
        warn!("Rejected request to {}: {}", req.uri().path(), e);
        e
    })?;

    debug!("User authenticated: {} (id {})", user.username, user.id);
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Optional authentication - any failure yields an anonymous identity
/// instead of a rejection
pub async fn optional_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let user = resolve_bearer(&state.jwt_config, req.headers()).ok();
    req.extensions_mut().insert(OptionalAuthUser(user));

    next.run(req).await
}
