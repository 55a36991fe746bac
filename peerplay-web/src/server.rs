//! Axum server wiring for the remote-control API
//!
//! Collaborators are chosen by runtime mode: production talks to the
//! external engine and player processes, development runs the simulations.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, get_service, post};
use peerplay_core::{
    MetainfoResolver, OmxPlayer, PeerplayConfig, RuntimeMode, SessionController, SessionSettings,
    SidecarEngine, TempCache,
};
use peerplay_sim::{SimulatedEngine, SimulatedPlayer, SimulatedResolver, SimulationConfig};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::handlers::{command, play, status, stop};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
}

/// Builds a controller with collaborators for the configured runtime mode.
pub fn build_controller(config: &PeerplayConfig) -> SessionController {
    let cache = TempCache::from_config(&config.cache);
    let settings = SessionSettings::from_config(config);

    match config.runtime_mode {
        RuntimeMode::Production => SessionController::new(
            Arc::new(MetainfoResolver::new(&config.resolver)),
            Arc::new(SidecarEngine::from_config(&config.engine)),
            Arc::new(OmxPlayer::from_config(&config.player)),
            cache,
            settings,
        ),
        RuntimeMode::Development => {
            let simulation = SimulationConfig::default();
            SessionController::new(
                Arc::new(SimulatedResolver::new(&simulation)),
                Arc::new(SimulatedEngine::new(simulation)),
                Arc::new(SimulatedPlayer::new()),
                cache,
                settings,
            )
        }
    }
}

/// Routes: static page and assets, session control, player commands.
pub fn router(state: AppState, assets_dir: &Path) -> Router {
    Router::new()
        .route("/", get_service(ServeFile::new(assets_dir.join("index.html"))))
        .nest_service("/assets", ServeDir::new(assets_dir))
        .route("/play", post(play))
        .route("/stop", post(stop))
        .route("/status", get(status))
        // Player commands; fixed routes above take precedence
        .route("/{command}", post(command))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves on `listener` until `shutdown` resolves, then tears down the
/// session and purges scratch storage.
///
/// # Errors
/// - `ServerError::Serve` - The accept loop failed
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    assets_dir: &Path,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let app = router(state.clone(), assets_dir);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| ServerError::Serve { addr, source });

    state.controller.shutdown().await;
    result
}

/// Runs the server for `config` until Ctrl-C.
///
/// # Errors
/// - `ServerError::Bind` - Configured address unavailable
/// - `ServerError::Serve` - The accept loop failed
pub async fn run_server(config: PeerplayConfig) -> Result<(), ServerError> {
    let controller = Arc::new(build_controller(&config));

    let purged = controller.purge_scratch().await;
    if purged > 0 {
        tracing::info!("Removed {purged} scratch directories left by a previous run");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let bound = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or(addr);
    tracing::info!(
        "Peerplay running at: http://{bound} ({} mode)",
        config.runtime_mode
    );

    serve(
        listener,
        AppState { controller },
        &config.server.assets_dir,
        shutdown_signal(),
    )
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use peerplay_core::test_mocks::{MockEngine, MockPlayer, MockResolver, mock_descriptor};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    struct Fixture {
        app: Router,
        player: Arc<MockPlayer>,
        _assets: tempfile::TempDir,
        _scratch: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let assets = tempfile::tempdir().unwrap();
        std::fs::write(assets.path().join("index.html"), "<h1>remote</h1>").unwrap();
        std::fs::write(assets.path().join("app.css"), "body {}").unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let player = Arc::new(MockPlayer::new());
        let controller = SessionController::new(
            Arc::new(MockResolver::new(mock_descriptor("clip.mp4", 1000))),
            Arc::new(MockEngine::new()),
            player.clone(),
            TempCache::new(scratch.path()),
            SessionSettings::from_config(&PeerplayConfig::for_testing()),
        );
        let app = router(
            AppState {
                controller: Arc::new(controller),
            },
            assets.path(),
        );

        Fixture {
            app,
            player,
            _assets: assets,
            _scratch: scratch,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_index_and_assets_are_served() {
        let f = fixture();

        let (status, body) = send(&f.app, Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>remote</h1>");

        let (status, _) = send(&f.app, Request::get("/assets/app.css").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&f.app, Request::get("/assets/missing.js").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_play_without_url_is_bad_request() {
        let f = fixture();

        let (status, body) = send(&f.app, post("/play")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Torrent URL Required");
        assert_eq!(body["statusCode"], 400);
    }

    #[tokio::test]
    async fn test_form_encoded_play() {
        let f = fixture();
        let request = Request::post("/play")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("url=magnet%3A%3Fxt%3Durn%3Abtih%3AAAA"))
            .unwrap();

        let (status, body) = send(&f.app, request).await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["port"], 5555);
    }

    #[tokio::test]
    async fn test_commands_route_to_player() {
        let f = fixture();

        let (status, body) = send(&f.app, post("/volumeup")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (status, body) = send(&f.app, post("/explode")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Invalid player command");

        assert_eq!(f.player.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_always_succeeds() {
        let f = fixture();

        for _ in 0..2 {
            let (status, body) = send(&f.app, post("/stop")).await;
            assert_eq!(status, StatusCode::OK);
            assert!(body.is_empty());
        }
    }
}
