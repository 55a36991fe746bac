//! End-to-end tests: a real server on loopback with simulated collaborators.

use std::sync::Arc;
use std::time::Duration;

use peerplay_core::{PeerplayConfig, SessionController, SessionSettings, TempCache};
use peerplay_sim::{SimulatedEngine, SimulatedPlayer, SimulatedResolver, SimulationConfig};
use peerplay_web::{AppState, serve};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct RunningServer {
    base: String,
    player: Arc<SimulatedPlayer>,
    scratch: tempfile::TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

async fn start_server() -> RunningServer {
    let scratch = tempfile::tempdir().unwrap();
    let assets = tempfile::tempdir().unwrap();
    std::fs::write(assets.path().join("index.html"), "<title>Peerplay</title>").unwrap();

    let simulation = SimulationConfig::for_testing();
    let player = Arc::new(SimulatedPlayer::new());
    let controller = SessionController::new(
        Arc::new(SimulatedResolver::new(&simulation)),
        Arc::new(SimulatedEngine::new(simulation)),
        player.clone(),
        TempCache::new(scratch.path()),
        SessionSettings::from_config(&PeerplayConfig::for_testing()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (shutdown, signal) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let state = AppState {
            controller: Arc::new(controller),
        };
        serve(listener, state, assets.path(), async move {
            let _ = signal.await;
        })
        .await
        .unwrap();
        drop(assets);
    });

    RunningServer {
        base,
        player,
        scratch,
        shutdown: Some(shutdown),
        server,
    }
}

impl RunningServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn status(&self) -> Value {
        reqwest::get(self.url("/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    fn scratch_dirs(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .unwrap()
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("peerflix-"))
            .count()
    }

    async fn stop(mut self) -> tempfile::TempDir {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.server.await.unwrap();
        self.scratch
    }
}

#[tokio::test]
async fn test_simulated_playback_flow() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let index = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(index.status(), 200);

    let response = client
        .post(server.url("/play"))
        .json(&json!({ "url": "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let port = body["port"].as_u64().unwrap();
    assert!(port > 0);

    // The player was handed the engine's local stream, which really serves bytes.
    let stream_url = format!("http://127.0.0.1:{port}/");
    assert_eq!(server.player.current_url().as_deref(), Some(stream_url.as_str()));
    let stream = client.get(&stream_url).send().await.unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.content_length(), Some(129_241_752));
    drop(stream);

    let status = server.status().await;
    assert_eq!(status["status"], "PLAYING");
    assert_eq!(status["name"], "Sintel.mp4");
    assert_eq!(status["size"], 129_241_752u64);
    assert_eq!(server.scratch_dirs(), 1);

    let mut grew = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if server.status().await["downloaded"].as_u64().unwrap_or(0) > 0 {
            grew = true;
            break;
        }
    }
    assert!(grew);

    let paused = client.post(server.url("/pause")).send().await.unwrap();
    assert_eq!(paused.status(), 200);
    assert_eq!(server.status().await["status"], "PAUSED");

    let stopped = client.post(server.url("/stop")).send().await.unwrap();
    assert_eq!(stopped.status(), 200);
    assert_eq!(server.status().await, json!({ "status": "IDLE" }));
    assert_eq!(server.scratch_dirs(), 0);
    assert!(client.get(&stream_url).send().await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_new_play_replaces_running_stream() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let mut ports = Vec::new();
    for hash in [
        "08ada5a7a6183aae1e09d831df6748d566095a10",
        "dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c",
    ] {
        let body: Value = client
            .post(server.url("/play"))
            .json(&json!({ "url": hash }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ports.push(body["port"].as_u64().unwrap());
    }

    assert_eq!(server.status().await["name"], "Big Buck Bunny.mp4");
    assert_eq!(server.scratch_dirs(), 1);
    let first_stream = format!("http://127.0.0.1:{}/", ports[0]);
    assert!(client.get(&first_stream).send().await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_cleans_up_live_session() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/play"))
        .form(&[("url", "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(server.scratch_dirs(), 1);

    let scratch = server.stop().await;
    let leftovers = std::fs::read_dir(scratch.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}
