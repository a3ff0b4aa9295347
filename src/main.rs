//! Esploratori registry sync service
//!
//! Keeps member-detail sessions in live sync with the remote record store,
//! with a versioned SQLite cache, retried writes and rolling backups.

mod api;
mod auth;
mod backup;
mod cache;
mod config;
mod directory;
mod edit;
mod errors;
mod models;
mod notify;
mod pacing;
mod remote;
mod retry;
mod sections;
mod session;
mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{open_cache, CURRENT_SCHEMA_VERSION};
use config::Config;
use directory::MemberDirectory;
use errors::AppError;
use notify::NotificationFeed;
use remote::{HttpRecordStore, RemoteRecordStore};
use sections::{FileTemplateSource, SectionRegistry, SectionTemplates, TemplateSource};
use session::SessionManager;
use sync::SyncServices;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub services: SyncServices,
    pub directory: Arc<MemberDirectory>,
    pub feed: Arc<NotificationFeed>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the shared services around a remote store and a template source.
    pub async fn build(
        config: Config,
        remote: Arc<dyn RemoteRecordStore>,
        template_source: Arc<dyn TemplateSource>,
    ) -> Result<Self, AppError> {
        let cache = open_cache(&config.cache_path, CURRENT_SCHEMA_VERSION).await?;
        let feed = Arc::new(NotificationFeed::new());

        let services = SyncServices {
            remote: Arc::clone(&remote),
            cache: cache.clone(),
            notifier: feed.clone(),
            retry: config.retry.clone(),
        };
        let sessions = SessionManager::new(
            services.clone(),
            Arc::new(SectionRegistry::standard()),
            SectionTemplates::new(template_source, cache),
            config.backup.clone(),
        );
        let directory = MemberDirectory::new(remote, config.retry.clone(), config.poll_interval);

        Ok(Self {
            sessions: Arc::new(sessions),
            services,
            directory: Arc::new(directory),
            feed,
            config: Arc::new(config),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting esploratori sync service");
    tracing::info!("Cache path: {:?}", config.cache_path);
    tracing::info!("Remote store: {}", config.remote_url);
    tracing::info!("Template directory: {:?}", config.template_dir);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (ESPLO_API_PSK). Authentication is disabled!");
    }

    let remote = Arc::new(HttpRecordStore::new(
        config.remote_url.clone(),
        config.poll_interval,
    )?);
    let templates = Arc::new(FileTemplateSource::new(config.template_dir.clone()));
    let bind_addr = config.bind_addr;

    let state = AppState::build(config, remote, templates).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Directory and sessions
        .route("/members", get(api::list_members))
        .route("/members/{id}", get(api::get_member))
        .route(
            "/members/{id}/session",
            post(api::open_session).delete(api::close_session),
        )
        // Sections
        .route("/members/{id}/sections/{section}", get(api::get_section))
        .route(
            "/members/{id}/sections/{section}/fields/{field}",
            put(api::save_field),
        )
        // Backups
        .route(
            "/members/{id}/backups",
            get(api::list_backups).post(api::create_backup),
        )
        .route(
            "/members/{id}/backups/{timestamp}/restore",
            post(api::restore_backup),
        )
        // Notifications
        .route("/notifications", get(api::list_notifications))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
