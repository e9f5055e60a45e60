//! SessionCore: single-owner event loop for the playback session.
//!
//! The socket server and the HTTP API never touch the controller or the
//! recorder; they send `DaemonEvent`s here and read the published
//! `SessionView` from the shared `StateManager`.  Engine events arrive on a
//! second channel, capture device results on a third.  Each event is handled
//! to completion before the next one is taken, then the view is republished
//! and `BroadcastMessage::StateUpdated` is sent if anything changed.
//!
//! Capture devices are opened and closed on the blocking pool, so a slow
//! microphone never holds up playback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use ugstream_proto::protocol::{Intent, SessionView};

use crate::controller::SessionController;
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::recording::{CaptureJob, CaptureOutcome, Recorder};
use crate::state::StateManager;
use crate::BroadcastMessage;

const CAPTURE_SETTLE_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(3);

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All client-side inputs into the SessionCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// An intent from a socket client or the HTTP API.
    Intent(Intent),
    Shutdown,
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore<E: PlaybackEngine> {
    controller: SessionController<E>,
    recorder: Recorder,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Relative export paths are resolved against this directory.
    recordings_dir: Option<PathBuf>,
    capture_tx: mpsc::UnboundedSender<CaptureOutcome>,
    capture_rx: mpsc::UnboundedReceiver<CaptureOutcome>,
}

impl<E: PlaybackEngine> SessionCore<E> {
    pub fn new(
        controller: SessionController<E>,
        recorder: Recorder,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let initial = build_view(&controller, &recorder);
        let state_manager = Arc::new(StateManager::new(
            controller.catalog().stations().to_vec(),
            initial,
        ));
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            recorder,
            state_manager,
            broadcast_tx,
            recordings_dir: None,
            capture_tx,
            capture_rx,
        }
    }

    pub fn with_recordings_dir(mut self, dir: PathBuf) -> Self {
        self.recordings_dir = Some(dir);
        self
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn controller(&self) -> &SessionController<E> {
        &self.controller
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Run until a `Shutdown` event arrives or every event sender is gone.
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<DaemonEvent>,
        mut engine_rx: mpsc::Receiver<EngineEvent>,
    ) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("SessionCore: event channel closed, shutting down");
                        break;
                    }
                    Some(DaemonEvent::Shutdown) => {
                        info!("SessionCore: shutdown requested");
                        break;
                    }
                    Some(DaemonEvent::Intent(intent)) => self.dispatch(intent).await,
                },
                Some(evt) = engine_rx.recv() => self.on_engine_event(evt).await,
                Some(outcome) = self.capture_rx.recv() => self.on_capture_outcome(outcome).await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Handle one intent and publish the result.  A rejected intent is
    /// reported to clients and leaves the session untouched.
    pub async fn dispatch(&mut self, intent: Intent) {
        debug!("SessionCore: intent {:?}", intent);
        if let Err(e) = self.handle_intent(intent) {
            self.report(e);
        }
        self.publish().await;
    }

    fn report(&self, e: impl std::fmt::Display) {
        warn!("SessionCore: {}", e);
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
    }

    fn handle_intent(&mut self, intent: Intent) -> anyhow::Result<()> {
        match intent {
            Intent::SelectStation { id } => self.controller.select_station(&id)?,
            Intent::Next => self.controller.next()?,
            Intent::Previous => self.controller.previous()?,
            Intent::Stop => self.controller.stop(),
            Intent::SetVolume { value } => {
                self.controller.set_volume(value)?;
            }
            Intent::ToggleFavorite { id } => {
                self.controller.toggle_favorite(&id)?;
            }
            Intent::SetFilter { filter } => self.controller.set_filter(filter),
            Intent::StartRecording => {
                let job = self.recorder.start()?;
                self.spawn_capture(job);
            }
            Intent::StopRecording => {
                if let Some(job) = self.recorder.stop()? {
                    self.spawn_capture(job);
                }
            }
            Intent::ExportRecording { path } => {
                let path = self.export_path(Path::new(&path));
                self.recorder.export_wav(&path)?;
            }
            Intent::GetState => {
                // nothing changes; clients still expect a fresh State
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
        Ok(())
    }

    pub async fn on_engine_event(&mut self, event: EngineEvent) {
        if self.controller.on_engine_event(event) {
            self.publish().await;
        }
    }

    /// Apply the result of a capture job run on the blocking pool.
    pub async fn on_capture_outcome(&mut self, outcome: CaptureOutcome) {
        debug!("SessionCore: capture outcome {:?}", outcome);
        match self.recorder.complete(outcome) {
            Ok(Some(job)) => self.spawn_capture(job),
            Ok(None) => {}
            Err(e) => self.report(e),
        }
        self.publish().await;
    }

    /// Wait until no capture job is outstanding.
    pub async fn settle_capture(&mut self) {
        while self.recorder.is_busy() {
            match self.capture_rx.recv().await {
                Some(outcome) => self.on_capture_outcome(outcome).await,
                None => break,
            }
        }
    }

    fn spawn_capture(&self, job: CaptureJob) {
        debug!("SessionCore: running capture job {:?}", job);
        let tx = self.capture_tx.clone();
        tokio::task::spawn_blocking(move || {
            // a dropped outcome releases the device
            let _ = tx.send(job.run());
        });
    }

    fn export_path(&self, path: &Path) -> PathBuf {
        match &self.recordings_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn publish(&mut self) {
        let view = build_view(&self.controller, &self.recorder);
        let buffer = self.recorder.buffer();
        self.state_manager.set_recording(buffer).await;
        if self.state_manager.publish(view).await {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn shutdown(&mut self) {
        info!("SessionCore: releasing playback and capture");
        self.controller.shutdown();
        if tokio::time::timeout(CAPTURE_SETTLE_TIMEOUT, self.settle_capture())
            .await
            .is_err()
        {
            warn!("SessionCore: capture device did not respond, abandoning it");
        }
        if let Some(job) = self.recorder.shutdown() {
            let id = job.id();
            match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(CaptureOutcome::Finished { result: Err(e), .. }) => {
                    warn!("Capture #{} did not stop cleanly: {}", id, e)
                }
                Ok(_) => {}
                Err(e) => warn!("Capture #{} release task failed: {}", id, e),
            }
        }
        self.publish().await;
    }
}

fn build_view<E: PlaybackEngine>(
    controller: &SessionController<E>,
    recorder: &Recorder,
) -> SessionView {
    SessionView {
        rev: 0,
        snapshot: controller.snapshot(),
        favorites: controller.favorites().to_vec(),
        recording: recorder.view(),
        filter: controller.filter().clone(),
        visible: controller.visible_ids(),
    }
}
