//! Mailbox phishing scanner backend.
//!
//! Signs a user in against the identity provider, subscribes to their inbox,
//! classifies incoming mail with an external model and keeps the verdicts.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod scanner;
mod schema;

use auth::{CredentialStore, OAuthClient};
use classifier::ClassificationClient;
use config::Config;
use graph::GraphClient;
use repository::SharedStore;
use scanner::{RetryPolicy, ScanQueue, ScanWorker};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: CredentialStore,
    pub oauth: OAuthClient,
    pub graph: GraphClient,
    pub classifier: ClassificationClient,
    pub store: SharedStore,
    pub scan_queue: ScanQueue,
}

impl AppState {
    /// Wire every collaborator to the same outbound HTTP client.
    pub fn new(config: Config, http: reqwest::Client, store: SharedStore, scan_queue: ScanQueue) -> Self {
        let oauth = OAuthClient::new(http.clone(), config.provider.clone());
        let graph = GraphClient::new(http.clone(), &config.provider);
        let classifier = ClassificationClient::new(http, config.classifier_url.clone());

        Self {
            config: Arc::new(config),
            credentials: CredentialStore::new(),
            oauth,
            graph,
            classifier,
            store,
            scan_queue,
        }
    }

    /// Worker that scans queued messages with this state's token and clients.
    pub fn scan_worker(&self) -> ScanWorker {
        ScanWorker {
            credentials: self.credentials.clone(),
            graph: self.graph.clone(),
            classifier: self.classifier.clone(),
            store: self.store.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // OAuth and subscription
        .route("/auth", get(auth::start_auth))
        .route("/callback", get(auth::auth_callback))
        .route("/subscribe", get(auth::subscribe).post(auth::subscribe))
        .route("/me", get(auth::whoami))
        .route(
            "/notifications",
            get(handlers::receive_notification).post(handlers::receive_notification),
        )
        // Classification
        .route("/predict", post(handlers::predict))
        // Scan records
        .route("/phishing-emails", get(handlers::list_phishing_emails))
        .route("/store-email", post(handlers::store_email))
        .route("/emails", get(handlers::list_emails))
        .route(
            "/update-email-status/:id",
            patch(handlers::update_email_status),
        )
        .route("/store-scanned-email", post(handlers::store_scanned_email))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Outbound HTTP client shared by the token exchange, mail API and classifier.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                    .allow_headers([
                        header::ORIGIN,
                        header::CONTENT_TYPE,
                        header::ACCEPT,
                        header::AUTHORIZATION,
                    ])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}
