//! Static file server for the notes web client
//!
//! Serves a directory over HTTP so the browser can load the app page, plus a
//! `/health` endpoint for readiness probes.

use axum::{response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::path::Path;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes for serving `root`. Directory requests fall back to `index.html`.
pub fn router(root: &Path) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "notes-e2e-web"
    }))
}

/// Serve `root` on `addr` until SIGINT or SIGTERM.
pub async fn serve(addr: SocketAddr, root: &Path) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving {} on http://{}", root.display(), listener.local_addr()?);

    axum::serve(listener, router(root))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Static server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
