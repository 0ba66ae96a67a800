//! HTTP transport
//!
//! - `POST /upload`: store the multipart `file` field, then 303 to `redirect_to`
//! - `GET /download`: ZIP of the staging directory
//! - `GET /answer`: one pipeline pass, plain-text result
//! - `GET /healthz`
//! - anything else: static files from `static_root`

mod error;
mod handlers;

pub use error::ServerError;
pub use handlers::{DOWNLOAD_NAME, UPLOAD_FIELD};

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::{ConfigError, Settings};
use crate::pipeline::Pipeline;
use crate::workspace::Workspace;

/// Allowance for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub workspace: Workspace,
    pub pipeline: Arc<Pipeline>,
    pub redirect_to: String,
}

impl AppState {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workspace: Workspace::from_settings(settings),
            pipeline: Arc::new(Pipeline::from_settings(settings)),
            redirect_to: settings.server.redirect_to.clone(),
        }
    }
}

/// Build the router for `settings`.
pub fn router(settings: &Settings) -> Router {
    let body_limit = settings
        .server
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/download", get(handlers::download))
        .route("/answer", get(handlers::answer))
        .route("/healthz", get(handlers::healthz))
        .fallback_service(ServeDir::new(&settings.server.static_root))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState::from_settings(settings))
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(settings: &Settings) -> Result<(), ServeError> {
    let addr = settings.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!(
        %addr,
        workspace = %settings.workspace.root.display(),
        tool = %settings.tool.program,
        "listening"
    );

    axum::serve(listener, router(settings))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
