//! Reference message store server.
//!
//! Serves the wire the conversation engine speaks, from memory:
//! - `GET /api/chat/messages?before=<id>&limit=<n>` history pages
//! - `POST /api/chat/send` streamed NDJSON replies
//! - `POST /api/chat/clear`
//!
//! Used for local development and the engine's end-to-end tests.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Router with CORS and request tracing applied.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    run_server_with_shutdown(state, port, std::future::pending()).await
}

/// Start the HTTP server with graceful shutdown support.
///
/// The server will stop accepting new connections when `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown_signal).await
}

/// Serve on an already bound listener.
///
/// # Errors
/// Returns an error if serving fails.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Message store listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;
    use crate::conversation::{
        AttachmentSource, ConversationEngine, ConversationError, EngineConfig, LoadOutcome, Role,
    };

    async fn spawn_store() -> (String, Arc<AppState>, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state = AppState::new();
        let (stop, stopped) = oneshot::channel::<()>();
        let served = state.clone();
        tokio::spawn(async move {
            let _ = serve(listener, served, async {
                let _ = stopped.await;
            })
            .await;
        });
        (base_url, state, stop)
    }

    #[tokio::test]
    async fn test_engine_round_trip_over_http() {
        let (base_url, _state, stop) = spawn_store().await;
        let config = EngineConfig::new().with_base_url(&base_url).with_page_size(2);

        let engine = ConversationEngine::connect(&config, "session-token").unwrap();
        assert_eq!(engine.load_older().await.unwrap(), LoadOutcome::FullyLoaded);

        engine.set_draft("Announce the beta");
        let report = engine.send().await.unwrap();
        assert_eq!(report.messages, 2);
        assert_eq!(report.statuses, 1);
        let messages = engine.messages();
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Agent);
        assert!(engine.status().is_none());

        engine.set_draft("");
        engine.select_attachment(AttachmentSource::Bytes {
            name: "banner.png".to_string(),
            bytes: b"\x89PNG\r\n\x1a\nbanner".to_vec(),
        });
        for _ in 0..50 {
            if engine.send_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let report = engine.send().await.unwrap();
        assert_eq!(report.messages, 2);
        assert_eq!(engine.messages().len(), 4);

        // a fresh view pages back through the same conversation
        let viewer = ConversationEngine::connect(&config, "session-token").unwrap();
        assert_eq!(viewer.load_older().await.unwrap(), LoadOutcome::Loaded { added: 2 });
        assert_eq!(viewer.load_older().await.unwrap(), LoadOutcome::Loaded { added: 2 });
        assert_eq!(viewer.load_older().await.unwrap(), LoadOutcome::FullyLoaded);
        assert_eq!(viewer.messages(), engine.messages());

        viewer.clear().await.unwrap();
        assert!(viewer.messages().is_empty());
        assert_eq!(viewer.load_older().await.unwrap(), LoadOutcome::FullyLoaded);

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_missing_token_surfaces_connectivity_error() {
        let (base_url, _state, stop) = spawn_store().await;
        let config = EngineConfig::new().with_base_url(&base_url);
        let engine = ConversationEngine::connect(&config, "").unwrap();

        let err = engine.load_older().await.unwrap_err();
        assert!(matches!(err, ConversationError::HttpStatus(401)));
        assert!(!engine.is_loading_history());
        assert!(engine.notice().is_some());

        let _ = stop.send(());
    }
}
