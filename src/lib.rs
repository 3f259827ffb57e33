pub mod cache;
pub mod config;
pub mod constants;
pub mod credits;
pub mod db;
pub mod error;
pub mod keys;
pub mod rate_limiter;
pub mod routes;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use utoipa_axum::{router::OpenApiRouter, routes};

use credits::{CreditLedger, SqlCreditStore};
use keys::ApiKeyManager;
use rate_limiter::RateLimiterRegistry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

/// Long-lived components shared by every request handler
pub struct AppState {
    pub ledger: CreditLedger<SqlCreditStore>,
    pub keys: ApiKeyManager,
    pub limiters: RateLimiterRegistry,
    pub admin_credentials: (String, String),
    /// When true, admin auth middleware is bypassed (for local development)
    pub disable_auth: bool,
}

/// Current time in epoch milliseconds
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Full HTTP surface without CORS and path normalisation
pub fn router(state: Arc<AppState>) -> Router {
    // Admin API routes with OpenAPI spec generation
    let (admin_api, openapi) = OpenApiRouter::with_openapi(Default::default())
        .routes(routes!(routes::admin::list_keys))
        .routes(routes!(routes::admin::get_key_stats))
        .routes(routes!(routes::admin::deactivate_key))
        .routes(routes!(routes::admin::reactivate_key))
        .routes(routes!(routes::admin::set_plan))
        .split_for_parts();

    // Swagger UI + OpenAPI spec (accessible without authentication)
    let swagger_routes = Router::new().merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger").url("/api-docs/openapi.json", openapi),
    );

    let protected_routes = admin_api.layer(middleware::from_fn_with_state(
        state.clone(),
        admin_auth_middleware,
    ));

    let admin_routes = Router::new()
        .merge(swagger_routes)
        .merge(protected_routes);

    let api_routes = Router::new()
        .route("/credits/{user_id}", get(routes::credits::get_credits))
        .route(
            "/credits/{user_id}/deduct",
            post(routes::credits::deduct_credit),
        )
        .route(
            "/credits/{user_id}/refund",
            post(routes::credits::refund_credit),
        )
        .route(
            "/credits/{user_id}/stats",
            get(routes::credits::get_credit_stats),
        )
        .route(
            "/credits/{user_id}/recommendation",
            get(routes::credits::get_recommendation),
        )
        .route(
            "/generations",
            post(routes::generations::record_generation),
        )
        .route(
            "/rate-limit/{feature}/{client_id}",
            post(routes::limits::check_rate_limit),
        );

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/version", get(routes::health::version))
        .nest("/admin", admin_routes)
        .nest("/v1", api_routes)
        .with_state(state)
}

/// Middleware for admin routes authentication (Basic Auth)
async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if state.disable_auth {
        return next.run(request).await;
    }

    let (username, password) = &state.admin_credentials;

    let Some(auth_value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return unauthorized_response();
    };

    let Some(encoded) = auth_value.strip_prefix("Basic ") else {
        return unauthorized_response();
    };

    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return unauthorized_response();
    };

    let Ok(credentials) = String::from_utf8(decoded) else {
        return unauthorized_response();
    };

    let Some((provided_user, provided_pass)) = credentials.split_once(':') else {
        return unauthorized_response();
    };

    // Constant-time comparison to prevent timing attacks
    let user_match = provided_user.as_bytes().ct_eq(username.as_bytes());
    let pass_match = provided_pass.as_bytes().ct_eq(password.as_bytes());

    if user_match.into() && pass_match.into() {
        next.run(request).await
    } else {
        unauthorized_response()
    }
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"fashionai-admin\"")],
        "Unauthorized",
    )
        .into_response()
}
