//! [`PlaybackEngine`] backed by a single mpv process.
//!
//! Controller calls are turned into requests on an unbounded channel and
//! executed in order by one worker task, so `create` never blocks and a
//! destroy always reaches mpv before the load that replaces it.  The worker
//! maps mpv's events onto lifecycle signals for whichever handle it is
//! currently serving:
//!
//! | mpv                                   | signal       |
//! |---------------------------------------|--------------|
//! | loadfile issued                       | `Buffering`  |
//! | `playback-restart` / core-idle=false  | `Started`    |
//! | end-file reason=eof                   | `Ended`      |
//! | end-file reason=error, before start   | `LoadError`  |
//! | end-file reason=error, after start    | `PlayError`  |
//! | IPC unavailable on load               | `LoadError`  |
//! | spawned process exited mid-stream     | `PlayError`  |
//!
//! `start-file` and `end-file` carry mpv's playlist entry id, which is matched
//! against the id returned by `loadfile`.  Events for any other entry belong to
//! a file that was already replaced and are dropped.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineSignal, HandleCounter, HandleId, PlaybackEngine};
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE};

const HEARTBEAT_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(10);

#[derive(Debug)]
enum EngineRequest {
    Load {
        handle: HandleId,
        url: String,
        volume: f32,
    },
    Pause(HandleId),
    Resume(HandleId),
    Destroy(HandleId),
    SetVolume {
        handle: HandleId,
        volume: f32,
    },
    Shutdown,
}

pub struct MpvEngine {
    tx: mpsc::UnboundedSender<EngineRequest>,
    event_tx: mpsc::Sender<EngineEvent>,
    handles: HandleCounter,
}

impl MpvEngine {
    /// Spawn the worker.  mpv itself is started lazily on the first load.
    /// The returned task finishes once mpv has been stopped after `shutdown`.
    pub fn spawn(volume: f32, event_tx: mpsc::Sender<EngineEvent>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = EngineWorker::new(volume, event_tx.clone());
        let worker = tokio::spawn(worker.run(rx));
        let engine = Self {
            tx,
            event_tx,
            handles: HandleCounter::default(),
        };
        (engine, worker)
    }

    fn request(&self, req: EngineRequest) -> bool {
        if let Err(e) = self.tx.send(req) {
            warn!("mpv engine worker is gone, dropping {:?}", e.0);
            return false;
        }
        true
    }
}

impl PlaybackEngine for MpvEngine {
    fn create(&mut self, url: &str, volume: f32) -> HandleId {
        let handle = self.handles.next_id();
        let sent = self.request(EngineRequest::Load {
            handle,
            url: url.to_string(),
            volume,
        });
        if !sent {
            let _ = self.event_tx.try_send(EngineEvent::new(
                handle,
                EngineSignal::LoadError("audio engine is not running".into()),
            ));
        }
        handle
    }

    fn pause(&mut self, handle: HandleId) {
        self.request(EngineRequest::Pause(handle));
    }

    fn resume(&mut self, handle: HandleId) {
        self.request(EngineRequest::Resume(handle));
    }

    fn destroy(&mut self, handle: HandleId) {
        self.request(EngineRequest::Destroy(handle));
    }

    fn set_volume(&mut self, handle: HandleId, volume: f32) {
        self.request(EngineRequest::SetVolume { handle, volume });
    }

    fn shutdown(&mut self) {
        self.request(EngineRequest::Shutdown);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// loadfile sent, mpv has not announced the new file yet.
    Requested,
    /// `start-file` seen; events now belong to this handle.
    Opened,
    Started,
}

#[derive(Debug)]
struct ActiveLoad {
    handle: HandleId,
    phase: Phase,
    /// `None` until the loadfile reply arrives, or for mpv builds that do not
    /// report entry ids.
    entry_id: Option<u64>,
}

impl ActiveLoad {
    fn owns(&self, evt: &MpvEvent) -> bool {
        match (self.entry_id, evt.playlist_entry_id()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}

struct EngineWorker {
    driver: MpvDriver,
    mpv: Option<MpvHandle>,
    mpv_tx: Option<mpsc::Sender<MpvEvent>>,
    active: Option<ActiveLoad>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl EngineWorker {
    fn new(volume: f32, event_tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            driver: MpvDriver::new(volume),
            mpv: None,
            mpv_tx: None,
            active: None,
            event_tx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineRequest>) {
        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(256);
        self.mpv_tx = Some(mpv_tx);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    None | Some(EngineRequest::Shutdown) => break,
                    Some(req) => self.handle_request(req).await,
                },
                Some(evt) = mpv_rx.recv() => self.handle_mpv_event(evt).await,
                _ = heartbeat.tick() => self.check_process().await,
            }
        }

        info!("mpv engine: shutting down");
        if let Some(mpv) = self.mpv.take() {
            let _ = mpv.stop().await;
        }
        self.driver.kill().await;
    }

    async fn emit(&self, handle: HandleId, signal: EngineSignal) {
        debug!("mpv engine: {} → {:?}", handle, signal);
        if self
            .event_tx
            .send(EngineEvent::new(handle, signal))
            .await
            .is_err()
        {
            debug!("mpv engine: event receiver dropped");
        }
    }

    fn is_active(&self, handle: HandleId) -> bool {
        self.active.as_ref().map(|a| a.handle) == Some(handle)
    }

    async fn ensure_mpv(&mut self) -> Option<MpvHandle> {
        if let Some(h) = &self.mpv {
            if !h.is_closed() && !self.driver.process_exited() {
                return Some(h.clone());
            }
            self.mpv = None;
        }
        let event_tx = self.mpv_tx.clone()?;

        let handle = match self.driver.try_reconnect(event_tx.clone()).await {
            Some(h) => h,
            None => match self.driver.spawn_and_connect(event_tx).await {
                Ok(h) => h,
                Err(e) => {
                    warn!("mpv engine: could not start mpv: {}", e);
                    return None;
                }
            },
        };
        handle.observe_properties().await;
        self.mpv = Some(handle.clone());
        Some(handle)
    }

    async fn handle_request(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Load {
                handle,
                url,
                volume,
            } => self.load(handle, url, volume).await,
            EngineRequest::Pause(handle) => self.set_pause(handle, true).await,
            EngineRequest::Resume(handle) => self.set_pause(handle, false).await,
            EngineRequest::Destroy(handle) => {
                if !self.is_active(handle) {
                    debug!("mpv engine: destroy of inactive {}", handle);
                    return;
                }
                self.active = None;
                if let Some(mpv) = &self.mpv {
                    if let Err(e) = mpv.stop().await {
                        debug!("mpv engine: stop failed: {}", e);
                    }
                }
            }
            EngineRequest::SetVolume { handle, volume } => {
                self.driver.last_volume = volume;
                if let Some(mpv) = &self.mpv {
                    if let Err(e) = mpv.set_volume(volume).await {
                        warn!("mpv engine: set volume for {} failed: {}", handle, e);
                    }
                }
            }
            EngineRequest::Shutdown => {}
        }
    }

    async fn load(&mut self, handle: HandleId, url: String, volume: f32) {
        self.active = Some(ActiveLoad {
            handle,
            phase: Phase::Requested,
            entry_id: None,
        });
        self.driver.last_volume = volume;
        self.emit(handle, EngineSignal::Buffering).await;

        let Some(mpv) = self.ensure_mpv().await else {
            self.active = None;
            self.emit(handle, EngineSignal::LoadError("mpv is not available".into()))
                .await;
            return;
        };

        // pause persists across files in mpv
        if let Err(e) = mpv.set_pause(false).await {
            debug!("mpv engine: unpause before load failed: {}", e);
        }
        match mpv.load_stream(&url, volume).await {
            Ok(entry_id) => {
                if let Some(active) = self.active.as_mut().filter(|a| a.handle == handle) {
                    debug!("mpv engine: {} is playlist entry {:?}", handle, entry_id);
                    active.entry_id = entry_id;
                }
            }
            Err(e) => {
                warn!("mpv engine: loadfile for {} failed: {}", handle, e);
                if mpv.is_closed() {
                    self.mpv = None;
                }
                if self.is_active(handle) {
                    self.active = None;
                    self.emit(handle, EngineSignal::LoadError(e.to_string())).await;
                }
            }
        }
    }

    async fn set_pause(&mut self, handle: HandleId, paused: bool) {
        if !self.is_active(handle) {
            debug!("mpv engine: pause={} for inactive {}", paused, handle);
            return;
        }
        let Some(mpv) = &self.mpv else {
            return;
        };
        if let Err(e) = mpv.set_pause(paused).await {
            warn!("mpv engine: set pause={} failed: {}", paused, e);
        }
    }

    async fn mark_started(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.phase != Phase::Opened {
            return;
        }
        active.phase = Phase::Started;
        let handle = active.handle;
        self.emit(handle, EngineSignal::Started).await;
    }

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        if let Some((OBS_CORE_IDLE, data)) = evt.as_property_change() {
            if data.as_bool() == Some(false) {
                self.mark_started().await;
            }
            return;
        }

        match evt.event_name() {
            Some("start-file") => {
                if let Some(active) = self.active.as_mut() {
                    if !active.owns(&evt) {
                        debug!("mpv engine: start-file of a replaced entry ignored");
                    } else if active.phase == Phase::Requested {
                        active.phase = Phase::Opened;
                    }
                }
            }
            Some("playback-restart") => self.mark_started().await,
            Some("end-file") => {
                let Some(active) = self.active.as_ref() else {
                    return;
                };
                // end-file for the file we replaced
                if active.phase == Phase::Requested || !active.owns(&evt) {
                    return;
                }
                let handle = active.handle;
                let started = active.phase == Phase::Started;
                let signal = match evt.end_reason() {
                    Some("eof") => EngineSignal::Ended,
                    Some("error") => {
                        let reason = evt.file_error().unwrap_or("playback error").to_string();
                        if started {
                            EngineSignal::PlayError(reason)
                        } else {
                            EngineSignal::LoadError(reason)
                        }
                    }
                    other => {
                        debug!("mpv engine: end-file reason={:?} ignored", other);
                        return;
                    }
                };
                self.active = None;
                self.emit(handle, signal).await;
            }
            _ => {}
        }
    }

    async fn check_process(&mut self) {
        if !self.driver.process_exited() {
            return;
        }
        warn!("mpv engine: mpv process exited");
        self.mpv = None;
        self.driver.kill().await;
        if let Some(active) = self.active.take() {
            let reason = "mpv process exited".to_string();
            let signal = if active.phase == Phase::Started {
                EngineSignal::PlayError(reason)
            } else {
                EngineSignal::LoadError(reason)
            };
            self.emit(active.handle, signal).await;
        }
    }
}
