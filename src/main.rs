use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod db;
mod dto;
mod error;
mod handlers;
mod models;
mod services;

use auth::rate_limit::RateLimitState;
use config::Config;
use services::chat::ChatService;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub ws_tx: Option<broadcast::Sender<String>>,
    pub rate_limiter: RateLimitState,
    pub chat: Arc<ChatService>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "empathica_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();
}

fn cors_layer(config: &Config) -> CorsLayer {
    let mut origins = vec![config
        .frontend_url
        .parse::<axum::http::HeaderValue>()
        .expect("FRONTEND_URL must be a valid origin")];
    // Extra origins for dev setups testing from another device on the LAN.
    if let Ok(extra) = std::env::var("CORS_EXTRA_ORIGINS") {
        origins.extend(extra.split(',').filter_map(|o| o.trim().parse().ok()));
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true)
}

fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/api/auth/signup", post(handlers::auth::signup))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_auth,
        ));

    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/ws", get(handlers::ws::ws_handler))
        .merge(auth_routes);

    let protected = Router::new()
        .route("/api/me", get(handlers::auth::me))
        .route("/api/auth/logout", post(handlers::auth::logout))
        // Profile
        .route("/api/profile", get(handlers::profile::get_profile))
        .route("/api/profile", put(handlers::profile::update_profile))
        .route(
            "/api/profile/questionnaire",
            post(handlers::profile::submit_questionnaire),
        )
        // Daily tasks
        .route("/api/tasks", get(handlers::tasks::list_tasks))
        .route("/api/tasks/today", post(handlers::tasks::create_today))
        .route("/api/tasks/:id/toggle", patch(handlers::tasks::toggle_task))
        // Journals
        .route("/api/journals", get(handlers::journals::list_journals))
        .route("/api/journals", post(handlers::journals::create_journal))
        .route("/api/journals/:id", get(handlers::journals::get_journal))
        .route("/api/journals/:id", put(handlers::journals::update_journal))
        .route("/api/journals/:id", delete(handlers::journals::delete_journal))
        // Meditations
        .route(
            "/api/meditations",
            get(handlers::meditations::list_meditations),
        )
        .route(
            "/api/meditations",
            post(handlers::meditations::create_meditation),
        )
        // Chat
        .route("/api/chat/send", post(handlers::chat::send_message))
        .route("/api/chat/threads", get(handlers::chat::list_threads))
        .route(
            "/api/chat/threads/:thread_id/messages",
            get(handlers::chat::thread_messages),
        )
        .route("/api/chat/runs/:run_id", get(handlers::chat::run_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Purge stale rate-limit buckets so the map does not grow unbounded.
fn spawn_limiter_cleanup(limiter: RateLimitState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            limiter.cleanup().await;
        }
    });
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(Config::from_env());

    let db = db::create_pool(&config.database_url).await;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let (ws_tx, _) = broadcast::channel::<String>(256);
    let chat = Arc::new(ChatService::new(&config, db.clone(), Some(ws_tx.clone())));

    let state = AppState {
        db,
        config: config.clone(),
        ws_tx: Some(ws_tx),
        rate_limiter: RateLimitState::new(),
        chat,
    };

    spawn_limiter_cleanup(state.rate_limiter.clone());

    let app = build_router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    // ConnectInfo supplies the client IP the rate limiter keys on.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .unwrap();
}
