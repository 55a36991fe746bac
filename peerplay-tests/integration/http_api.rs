//! HTTP contract of the remote-control API, driven in-process.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use peerplay_core::test_mocks::{MockEngine, MockPlayer, MockResolver, mock_descriptor};
use peerplay_core::{PeerplayConfig, SessionController, SessionSettings, TempCache};
use peerplay_web::{AppState, router};
use serde_json::{Value, json};
use tower::ServiceExt;

struct Api {
    app: Router,
    engine: Arc<MockEngine>,
    player: Arc<MockPlayer>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn api() -> Api {
    let assets = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(MockEngine::new());
    let player = Arc::new(MockPlayer::new());

    let controller = SessionController::new(
        Arc::new(MockResolver::new(mock_descriptor("clip.mp4", 1000))),
        engine.clone(),
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

    Api {
        app,
        engine,
        player,
        _dirs: (assets, scratch),
    }
}

impl Api {
    async fn call(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.call(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

fn play(url: &str) -> Request<Body> {
    Request::post("/play")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "url": url }).to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_play_status_stop_scenario() {
    let api = api();

    let (status, body) = api.json(play("magnet:?xt=urn:btih:AAA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "port": 5555 }));

    let (status, body) = api.json(get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "PLAYING",
            "downloadSpeed": 0.0,
            "uploadSpeed": 0.0,
            "paused": false,
            "downloaded": 0,
            "uploaded": 0,
            "name": "clip.mp4",
            "size": 1000
        })
    );

    let (status, body) = api.call(post("/stop")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (status, body) = api.json(get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "IDLE" }));
}

#[tokio::test]
async fn test_status_fields_track_engine_stats() {
    let api = api();
    api.json(play("magnet:?xt=urn:btih:AAA")).await;

    api.engine.handles()[0].set_stats(peerplay_core::TransferStats {
        download_rate: 1024.0,
        upload_rate: 128.0,
        bytes_downloaded: 800,
        bytes_uploaded: 64,
        paused: true,
    });

    let (_, body) = api.json(get("/status")).await;
    assert_eq!(body["downloadSpeed"], 1024.0);
    assert_eq!(body["uploadSpeed"], 128.0);
    assert_eq!(body["downloaded"], 800);
    assert_eq!(body["uploaded"], 64);
    assert_eq!(body["paused"], true);
}

#[tokio::test]
async fn test_pause_command_changes_reported_state() {
    let api = api();
    api.json(play("magnet:?xt=urn:btih:AAA")).await;

    let (status, _) = api.call(post("/pause")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = api.json(get("/status")).await;
    assert_eq!(body["status"], "PAUSED");
}

#[tokio::test]
async fn test_every_vocabulary_route_is_accepted() {
    let api = api();

    for name in [
        "pause",
        "speedup",
        "speeddown",
        "nextaudio",
        "prevaudio",
        "nextsubtitle",
        "prevsubtitle",
        "togglesubtitle",
        "volumeup",
        "volumedown",
        "forward",
        "backward",
        "fastforward",
        "fastbackward",
    ] {
        let (status, _) = api.call(post(&format!("/{name}"))).await;
        assert_eq!(status, StatusCode::OK, "{name}");
    }
    assert_eq!(api.player.commands().len(), 14);
}

#[tokio::test]
async fn test_unknown_command_is_rejected_before_player() {
    let api = api();

    let (status, body) = api.json(post("/rewind")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");
    assert!(api.player.commands().is_empty());
}

#[tokio::test]
async fn test_empty_url_is_rejected() {
    let api = api();

    let (status, body) = api.json(play("")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Torrent URL Required");
    assert_eq!(api.engine.start_count(), 0);
}
