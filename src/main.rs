use axum::ServiceExt;
use axum::http::{HeaderValue, Method, header};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fashionai_quota::config::{Config, CorsMode};
use fashionai_quota::credits::{CreditLedger, SqlCreditStore};
use fashionai_quota::db::Db;
use fashionai_quota::keys::ApiKeyManager;
use fashionai_quota::rate_limiter::RateLimiterRegistry;
use fashionai_quota::{AppState, BUILD_TIME, GIT_HASH, VERSION};

#[derive(Parser)]
#[command(name = "fashionai-quota")]
#[command(about = "Credit ledger, API key rotation and rate limiting for FashionAI")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "FASHIONAI_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "FASHIONAI_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env().expect("Invalid configuration");

    let db = Db::open(&config.db_path())
        .await
        .expect("Failed to initialize database");

    let host = args.host.unwrap_or(config.host);
    let port = args.port.unwrap_or(config.port);

    let ledger = CreditLedger::new(SqlCreditStore::new(db), config.plans)
        .with_stats_ttl(config.stats_cache_ttl);

    let keys = ApiKeyManager::new();
    for (service, pool) in config.key_pools {
        keys.register_service(service, pool, config.key_daily_limit)
            .await;
    }
    let registered = keys.registered_services().await;
    if registered.is_empty() {
        warn!("No API keys configured; key rotation requests will fail");
    }

    let limiters = RateLimiterRegistry::new(config.chat_limits, config.try_on_limits);

    let disable_auth = config.disable_auth;
    if disable_auth {
        warn!("Admin authentication is DISABLED (FASHIONAI_DISABLE_AUTH=1)");
    }

    let state = Arc::new(AppState {
        ledger,
        keys,
        limiters,
        admin_credentials: (config.admin_username, config.admin_password),
        disable_auth,
    });

    // CORS configuration based on environment
    let cors_origins = config.cors_mode.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin_str) = origin.to_str() else {
                return false;
            };

            cors_origins.allows(origin_str)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    match &config.cors_mode {
        CorsMode::AllowAll => info!("CORS: Allowing all origins"),
        CorsMode::LocalhostOnly => info!("CORS: Localhost only"),
        CorsMode::AllowList(list) => info!("CORS: Allowing origins: {:?}", list),
    }

    let app = NormalizePath::trim_trailing_slash(fashionai_quota::router(state).layer(cors));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid address");
    info!(
        "Starting fashionai-quota v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Key pools: {:?}", registered);
    info!("Listening on http://{}", addr);
    info!("Admin API docs: http://{}/admin/swagger", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .await
    .unwrap();
}
