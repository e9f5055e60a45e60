mod common;

use common::{catalog, id, EngineLog, EngineOp, FakeCapture, FakeEngine};
use tokio::sync::{broadcast, mpsc};
use ugstream_core::controller::SessionController;
use ugstream_core::core::{DaemonEvent, SessionCore};
use ugstream_core::engine::{EngineEvent, EngineSignal, HandleId};
use ugstream_core::recording::Recorder;
use ugstream_core::BroadcastMessage;
use ugstream_proto::navigation::StationFilter;
use ugstream_proto::protocol::{Intent, PlaybackState, RecordingView};

fn core_with(
    names: &[&str],
    capture: FakeCapture,
) -> (
    SessionCore<FakeEngine>,
    EngineLog,
    broadcast::Receiver<BroadcastMessage>,
) {
    let (engine, log) = FakeEngine::new();
    let controller = SessionController::new(catalog(names), engine, 0.5);
    let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
    let core = SessionCore::new(controller, Recorder::new(Box::new(capture)), broadcast_tx);
    (core, log, broadcast_rx)
}

fn drain(rx: &mut broadcast::Receiver<BroadcastMessage>) -> Vec<BroadcastMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn intents_and_engine_events_publish_new_revisions() {
    let (mut core, log, mut rx) = core_with(&["A", "B"], FakeCapture::working());
    let mgr = core.state_manager();
    assert_eq!(mgr.rev().await, 1);
    assert_eq!(mgr.catalog().len(), 2);

    core.dispatch(Intent::SelectStation { id: id("B") }).await;
    let view = mgr.get_view().await;
    assert_eq!(view.rev, 2);
    assert_eq!(
        view.snapshot.state,
        PlaybackState::Loading { station: id("B") }
    );
    assert!(view.snapshot.is_buffering);
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [BroadcastMessage::StateUpdated]
    ));

    let h = log.last_created().unwrap();
    core.on_engine_event(EngineEvent::new(h, EngineSignal::Started))
        .await;
    let view = mgr.get_view().await;
    assert_eq!(view.rev, 3);
    assert_eq!(
        view.snapshot.state,
        PlaybackState::Playing { station: id("B") }
    );

    // a callback from a handle that never existed changes nothing
    core.on_engine_event(EngineEvent::new(HandleId(99), EngineSignal::Ended))
        .await;
    assert_eq!(mgr.rev().await, 3);
}

#[tokio::test]
async fn rejected_intent_is_reported_and_changes_nothing() {
    let (mut core, log, mut rx) = core_with(&["A"], FakeCapture::working());
    let mgr = core.state_manager();

    core.dispatch(Intent::SelectStation { id: id("Ghost") }).await;
    let msgs = drain(&mut rx);
    assert_eq!(msgs.len(), 1);
    match &msgs[0] {
        BroadcastMessage::Error(message) => assert!(message.contains("ghost")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(mgr.rev().await, 1);
    assert!(log.ops().is_empty());

    core.dispatch(Intent::SetVolume { value: f32::NAN }).await;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [BroadcastMessage::Error(_)]
    ));
    assert_eq!(mgr.get_view().await.snapshot.volume, 0.5);
}

#[tokio::test]
async fn get_state_always_broadcasts() {
    let (mut core, _log, mut rx) = core_with(&["A"], FakeCapture::working());
    core.dispatch(Intent::GetState).await;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [BroadcastMessage::StateUpdated]
    ));
    assert_eq!(core.state_manager().rev().await, 1);
}

#[tokio::test]
async fn favorites_and_filter_shape_the_visible_list() {
    let (mut core, _log, _rx) = core_with(&["A", "B", "C"], FakeCapture::working());
    let mgr = core.state_manager();

    core.dispatch(Intent::ToggleFavorite { id: id("C") }).await;
    core.dispatch(Intent::ToggleFavorite { id: id("A") }).await;
    core.dispatch(Intent::SetFilter {
        filter: StationFilter::favorites(),
    })
    .await;

    let view = mgr.get_view().await;
    assert_eq!(view.favorites, vec![id("C"), id("A")]);
    assert_eq!(view.visible, vec![id("A"), id("C")]);
    assert!(view.filter.favorites_only);
}

#[tokio::test]
async fn capture_unavailable_leaves_playback_intact() {
    let (mut core, log, mut rx) = core_with(&["A"], FakeCapture::unavailable());
    let mgr = core.state_manager();

    core.dispatch(Intent::SelectStation { id: id("A") }).await;
    let h = log.last_created().unwrap();
    core.on_engine_event(EngineEvent::new(h, EngineSignal::Started))
        .await;
    drain(&mut rx);
    let ops_before = log.ops();

    core.dispatch(Intent::StartRecording).await;
    assert!(matches!(
        mgr.get_view().await.recording,
        RecordingView::Starting { id: 1 }
    ));
    core.settle_capture().await;
    let errors: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|msg| match msg {
            BroadcastMessage::Error(message) => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("permission denied"));

    let view = mgr.get_view().await;
    assert_eq!(
        view.snapshot.state,
        PlaybackState::Playing { station: id("A") }
    );
    assert_eq!(view.recording, RecordingView::Idle);
    assert_eq!(log.ops(), ops_before);
}

#[tokio::test]
async fn recording_runs_alongside_playback_and_exports() {
    let dir = tempfile::tempdir().unwrap();
    let (core, log, _rx) = core_with(&["A"], FakeCapture::working());
    let mut core = core.with_recordings_dir(dir.path().to_path_buf());
    let mgr = core.state_manager();

    core.dispatch(Intent::SelectStation { id: id("A") }).await;
    core.dispatch(Intent::StartRecording).await;
    core.settle_capture().await;
    assert!(matches!(
        mgr.get_view().await.recording,
        RecordingView::Capturing { id: 1, .. }
    ));

    core.dispatch(Intent::StopRecording).await;
    assert!(matches!(
        mgr.get_view().await.recording,
        RecordingView::Stopping { id: 1 }
    ));
    core.settle_capture().await;
    match mgr.get_view().await.recording {
        RecordingView::Completed {
            id,
            sample_rate,
            channels,
            frames,
            duration_secs,
        } => {
            assert_eq!(id, 1);
            assert_eq!(sample_rate, 44_100);
            assert_eq!(channels, 1);
            assert_eq!(frames, 4_410);
            assert!((duration_secs - 0.1).abs() < 1e-9);
        }
        other => panic!("expected completed recording, got {:?}", other),
    }
    let wav = mgr.recording().await.unwrap().wav_bytes().unwrap();
    assert_eq!(&wav[..4], b"RIFF");

    core.dispatch(Intent::ExportRecording {
        path: "take.wav".into(),
    })
    .await;
    let exported = dir.path().join("take.wav");
    let reader = hound::WavReader::open(&exported).unwrap();
    assert_eq!(reader.len(), 4_410);

    // playback was never touched by recording
    assert_eq!(
        log.ops()
            .iter()
            .filter(|op| matches!(op, EngineOp::Create(..)))
            .count(),
        1
    );
    assert!(matches!(
        mgr.get_view().await.snapshot.state,
        PlaybackState::Loading { .. }
    ));
}

#[tokio::test]
async fn engine_events_are_handled_while_capture_device_is_opening() {
    let (engine, log) = FakeEngine::new();
    let controller = SessionController::new(catalog(&["A"]), engine, 0.5);
    let (broadcast_tx, _rx) = broadcast::channel(64);
    let (capture, release) = FakeCapture::gated();
    let core = SessionCore::new(controller, Recorder::new(Box::new(capture)), broadcast_tx);
    let mgr = core.state_manager();
    let (event_tx, event_rx) = mpsc::channel(16);
    let (engine_tx, engine_rx) = mpsc::channel(16);
    let task = tokio::spawn(core.run(event_rx, engine_rx));

    event_tx
        .send(DaemonEvent::Intent(Intent::SelectStation { id: id("A") }))
        .await
        .unwrap();
    event_tx
        .send(DaemonEvent::Intent(Intent::StartRecording))
        .await
        .unwrap();
    wait_for(&mgr, |view| matches!(view.recording, RecordingView::Starting { .. })).await;

    // the device is still blocked, playback keeps moving
    let h = log.last_created().unwrap();
    engine_tx
        .send(EngineEvent::new(h, EngineSignal::Started))
        .await
        .unwrap();
    wait_for(&mgr, |view| {
        view.snapshot.state == PlaybackState::Playing { station: id("A") }
    })
    .await;
    assert!(matches!(
        mgr.get_view().await.recording,
        RecordingView::Starting { .. }
    ));

    release.send(()).unwrap();
    wait_for(&mgr, |view| matches!(view.recording, RecordingView::Capturing { .. })).await;

    event_tx.send(DaemonEvent::Shutdown).await.unwrap();
    task.await.unwrap().unwrap();
}

async fn wait_for(
    mgr: &ugstream_core::state::StateManager,
    pred: impl Fn(&ugstream_proto::protocol::SessionView) -> bool,
) {
    for _ in 0..200 {
        if pred(&mgr.get_view().await) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("view never reached the expected state: {:?}", mgr.get_view().await);
}

#[tokio::test]
async fn run_loop_processes_events_and_cleans_up() {
    let (core, log, mut rx) = core_with(&["A", "B"], FakeCapture::working());
    let mgr = core.state_manager();
    let (event_tx, event_rx) = mpsc::channel(16);
    let (engine_tx, engine_rx) = mpsc::channel(16);
    let task = tokio::spawn(core.run(event_rx, engine_rx));

    event_tx
        .send(DaemonEvent::Intent(Intent::SelectStation { id: id("A") }))
        .await
        .unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        BroadcastMessage::StateUpdated
    ));

    let h = log.last_created().unwrap();
    engine_tx
        .send(EngineEvent::new(h, EngineSignal::Started))
        .await
        .unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        BroadcastMessage::StateUpdated
    ));
    assert_eq!(
        mgr.get_view().await.snapshot.state,
        PlaybackState::Playing { station: id("A") }
    );

    event_tx
        .send(DaemonEvent::Intent(Intent::StartRecording))
        .await
        .unwrap();
    event_tx.send(DaemonEvent::Shutdown).await.unwrap();
    task.await.unwrap().unwrap();

    assert!(log.alive().is_empty());
    assert_eq!(log.ops().last(), Some(&EngineOp::Shutdown));
    let view = mgr.get_view().await;
    assert_eq!(view.snapshot.state, PlaybackState::Idle);
    assert_eq!(view.snapshot.last_played, Some(id("A")));
    assert_eq!(view.recording, RecordingView::Idle);
}
