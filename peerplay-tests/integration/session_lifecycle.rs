//! Session controller invariants under arbitrary and concurrent request
//! sequences.

use std::sync::Arc;

use peerplay_core::test_mocks::{MockEngine, MockPlayer, MockResolver, mock_descriptor};
use peerplay_core::{
    PeerplayConfig, PlaybackState, PlayerDriver, SessionController, SessionSettings, SessionState,
    TempCache,
};
use proptest::prelude::*;

struct Rig {
    controller: Arc<SessionController>,
    engine: Arc<MockEngine>,
    player: Arc<MockPlayer>,
    scratch: tempfile::TempDir,
}

fn rig() -> Rig {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(MockEngine::new());
    let player = Arc::new(MockPlayer::new());
    let controller = Arc::new(SessionController::new(
        Arc::new(MockResolver::new(mock_descriptor("clip.mp4", 1000))),
        engine.clone(),
        player.clone(),
        TempCache::new(scratch.path()),
        SessionSettings::from_config(&PeerplayConfig::for_testing()),
    ));
    Rig {
        controller,
        engine,
        player,
        scratch,
    }
}

impl Rig {
    fn live_handles(&self) -> usize {
        self.engine
            .handles()
            .iter()
            .filter(|handle| !handle.is_stopped())
            .count()
    }

    fn scratch_dirs(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .unwrap()
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("peerflix-"))
            .count()
    }

    fn assert_consistent(&self) {
        let expected = usize::from(self.controller.state() == SessionState::Active);
        assert_eq!(self.live_handles(), expected);
        assert_eq!(self.scratch_dirs(), expected);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Start,
    Stop,
    Command,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Start), Just(Op::Stop), Just(Op::Command)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn sequential_requests_keep_one_session(ops in prop::collection::vec(op(), 1..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let rig = rig();
            let mut expect_active = false;

            for op in ops {
                match op {
                    Op::Start => {
                        rig.controller.start_session("magnet:?xt=urn:btih:AAA").await.unwrap();
                        expect_active = true;
                    }
                    Op::Stop => {
                        rig.controller.stop_session().await;
                        expect_active = false;
                    }
                    Op::Command => {
                        rig.controller.send_command("pause").await.unwrap();
                    }
                }

                let expected_state = if expect_active { SessionState::Active } else { SessionState::Idle };
                assert_eq!(rig.controller.state(), expected_state);
                assert_eq!(rig.controller.status().transfer.is_some(), expect_active);
                rig.assert_consistent();
            }
        });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_and_stops_settle_consistently() {
    let rig = rig();

    let mut tasks = Vec::new();
    for i in 0..24 {
        let controller = rig.controller.clone();
        tasks.push(tokio::spawn(async move {
            if i % 3 == 2 {
                controller.stop_session().await;
            } else {
                let _ = controller.start_session("magnet:?xt=urn:btih:AAA").await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    rig.assert_consistent();
    if rig.controller.state() == SessionState::Active {
        assert_ne!(rig.player.state(), PlaybackState::Idle);
    }

    rig.controller.shutdown().await;
    assert_eq!(rig.live_handles(), 0);
    assert_eq!(rig.scratch_dirs(), 0);
    assert_eq!(rig.player.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_stale_scratch_from_previous_run_is_purged() {
    let rig = rig();
    std::fs::create_dir(rig.scratch.path().join("peerflix-0c9d7d36-stale")).unwrap();
    std::fs::write(rig.scratch.path().join("unrelated.tmp"), b"keep").unwrap();

    let removed = rig.controller.purge_scratch().await;

    assert_eq!(removed, 1);
    assert!(rig.scratch.path().join("unrelated.tmp").exists());
}
