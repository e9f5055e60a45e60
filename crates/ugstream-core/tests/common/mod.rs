#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use ugstream_core::engine::{HandleCounter, HandleId, PlaybackEngine};
use ugstream_core::recording::{CaptureDevice, CaptureSession, CapturedAudio, RecordingError};
use ugstream_proto::catalog::Catalog;
use ugstream_proto::station::{Station, StationId};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineOp {
    Create(HandleId, String),
    Pause(HandleId),
    Resume(HandleId),
    Destroy(HandleId),
    SetVolume(HandleId, f32),
    Shutdown,
}

#[derive(Debug, Default)]
struct Inner {
    ops: Vec<EngineOp>,
    alive: BTreeSet<HandleId>,
    max_alive: usize,
}

/// Shared view into what a [`FakeEngine`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct EngineLog(Arc<Mutex<Inner>>);

impl EngineLog {
    pub fn ops(&self) -> Vec<EngineOp> {
        self.0.lock().unwrap().ops.clone()
    }

    pub fn alive(&self) -> Vec<HandleId> {
        self.0.lock().unwrap().alive.iter().copied().collect()
    }

    pub fn max_alive(&self) -> usize {
        self.0.lock().unwrap().max_alive
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().ops.clear();
    }

    pub fn last_created(&self) -> Option<HandleId> {
        self.ops().iter().rev().find_map(|op| match op {
            EngineOp::Create(h, _) => Some(*h),
            _ => None,
        })
    }
}

/// In-memory engine: hands out handles and records every call.
pub struct FakeEngine {
    handles: HandleCounter,
    log: EngineLog,
}

impl FakeEngine {
    pub fn new() -> (Self, EngineLog) {
        let log = EngineLog::default();
        let engine = Self {
            handles: HandleCounter::default(),
            log: log.clone(),
        };
        (engine, log)
    }

    fn push(&self, op: EngineOp) {
        self.log.0.lock().unwrap().ops.push(op);
    }
}

impl PlaybackEngine for FakeEngine {
    fn create(&mut self, url: &str, _volume: f32) -> HandleId {
        let h = self.handles.next_id();
        let mut inner = self.log.0.lock().unwrap();
        inner.ops.push(EngineOp::Create(h, url.to_string()));
        inner.alive.insert(h);
        inner.max_alive = inner.max_alive.max(inner.alive.len());
        h
    }

    fn pause(&mut self, handle: HandleId) {
        self.push(EngineOp::Pause(handle));
    }

    fn resume(&mut self, handle: HandleId) {
        self.push(EngineOp::Resume(handle));
    }

    fn destroy(&mut self, handle: HandleId) {
        let mut inner = self.log.0.lock().unwrap();
        inner.ops.push(EngineOp::Destroy(handle));
        inner.alive.remove(&handle);
    }

    fn set_volume(&mut self, handle: HandleId, volume: f32) {
        self.push(EngineOp::SetVolume(handle, volume));
    }

    fn shutdown(&mut self) {
        self.push(EngineOp::Shutdown);
    }
}

/// Capture device that either always fails or returns a short fixed buffer.
pub struct FakeCapture {
    available: bool,
    pub acquired: Arc<AtomicUsize>,
    /// When set, `acquire` blocks until the paired sender fires.
    gate: Option<Mutex<std_mpsc::Receiver<()>>>,
}

impl FakeCapture {
    pub fn working() -> Self {
        Self {
            available: true,
            acquired: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::working()
        }
    }

    /// A device whose `acquire` hangs until the returned sender is used.
    pub fn gated() -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        let capture = Self {
            gate: Some(Mutex::new(rx)),
            ..Self::working()
        };
        (capture, tx)
    }
}

struct FakeSession;

impl CaptureDevice for FakeCapture {
    fn acquire(&self) -> Result<Box<dyn CaptureSession>, RecordingError> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        if !self.available {
            return Err(RecordingError::CaptureUnavailable(
                "permission denied".into(),
            ));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession))
    }
}

impl CaptureSession for FakeSession {
    fn finish(self: Box<Self>) -> Result<CapturedAudio, RecordingError> {
        Ok(CapturedAudio {
            samples: (0..4_410).map(|i| (i as f32 / 100.0).sin() * 0.5).collect(),
            sample_rate: 44_100,
            channels: 1,
        })
    }
}

pub fn url_for(name: &str) -> String {
    format!("http://stream.test/{}", StationId::from_name(name))
}

/// Catalog of bare stations named after `names`, in order.
pub fn catalog(names: &[&str]) -> Catalog {
    Catalog::new(names.iter().map(|n| Station::new(*n, url_for(n))).collect()).unwrap()
}

pub fn id(name: &str) -> StationId {
    StationId::from(name)
}
