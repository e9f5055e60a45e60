//! Microphone recording: one capture at a time, one completed buffer kept.
//!
//! `Idle → Starting → Capturing → Stopping → Completed`, and from `Completed`
//! back to `Starting` when a new recording begins (the old buffer is dropped
//! once the device is acquired).  Device acquire and release are blocking and
//! are handed to the caller as [`CaptureJob`]s.  The capture backend sits
//! behind [`CaptureDevice`] so the state machine can run without hardware.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use ugstream_proto::protocol::RecordingView;

/// Captures are capped at ten minutes of audio.
pub const MAX_RECORDING_SECS: u32 = 600;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordingError {
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("a recording is already in progress")]
    AlreadyCapturing,
    #[error("no recording in progress")]
    NotCapturing,
    #[error("no completed recording")]
    NoRecording,
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("could not write recording: {0}")]
    Export(String),
}

/// Interleaved f32 samples handed back by a finished capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Called from a blocking thread; may wait for the hardware.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the input and start capturing.
    fn acquire(&self) -> Result<Box<dyn CaptureSession>, RecordingError>;
}

pub trait CaptureSession: Send {
    /// Stop capturing, release the input and return what was captured.
    fn finish(self: Box<Self>) -> Result<CapturedAudio, RecordingError>;
}

/// Device used when recording is disabled in the configuration.
pub struct DisabledCapture;

impl CaptureDevice for DisabledCapture {
    fn acquire(&self) -> Result<Box<dyn CaptureSession>, RecordingError> {
        Err(RecordingError::CaptureUnavailable(
            "recording is disabled".into(),
        ))
    }
}

#[derive(Debug)]
pub struct RecordingBuffer {
    id: u64,
    audio: CapturedAudio,
}

impl RecordingBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.audio.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.audio.samples
    }

    pub fn frames(&self) -> usize {
        self.audio.samples.len() / self.audio.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.audio.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.audio.sample_rate as f64
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.audio.channels.max(1),
            sample_rate: self.audio.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    fn write_samples<W>(&self, mut writer: hound::WavWriter<W>) -> Result<(), hound::Error>
    where
        W: std::io::Write + std::io::Seek,
    {
        for &s in &self.audio.samples {
            writer.write_sample(s)?;
        }
        writer.finalize()
    }

    /// Encode as a 32-bit float WAV file in memory.
    pub fn wav_bytes(&self) -> Result<Vec<u8>, RecordingError> {
        let mut out = Vec::new();
        let writer = hound::WavWriter::new(Cursor::new(&mut out), self.wav_spec())
            .map_err(|e| RecordingError::Export(e.to_string()))?;
        self.write_samples(writer)
            .map_err(|e| RecordingError::Export(e.to_string()))?;
        Ok(out)
    }

    pub fn write_wav(&self, path: &Path) -> Result<(), RecordingError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RecordingError::Export(e.to_string()))?;
            }
        }
        let writer = hound::WavWriter::create(path, self.wav_spec())
            .map_err(|e| RecordingError::Export(e.to_string()))?;
        self.write_samples(writer)
            .map_err(|e| RecordingError::Export(e.to_string()))
    }
}

/// Blocking device work handed out by the [`Recorder`].  The caller runs it
/// off the event loop (`spawn_blocking`) and feeds the outcome back through
/// [`Recorder::complete`].
pub enum CaptureJob {
    Acquire {
        id: u64,
        device: Arc<dyn CaptureDevice>,
    },
    Finish {
        id: u64,
        session: Box<dyn CaptureSession>,
    },
}

impl CaptureJob {
    pub fn id(&self) -> u64 {
        match self {
            CaptureJob::Acquire { id, .. } | CaptureJob::Finish { id, .. } => *id,
        }
    }

    pub fn run(self) -> CaptureOutcome {
        match self {
            CaptureJob::Acquire { id, device } => CaptureOutcome::Acquired {
                id,
                result: device.acquire(),
            },
            CaptureJob::Finish { id, session } => CaptureOutcome::Finished {
                id,
                result: session.finish(),
            },
        }
    }
}

impl fmt::Debug for CaptureJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureJob::Acquire { id, .. } => write!(f, "Acquire(#{})", id),
            CaptureJob::Finish { id, .. } => write!(f, "Finish(#{})", id),
        }
    }
}

pub enum CaptureOutcome {
    Acquired {
        id: u64,
        result: Result<Box<dyn CaptureSession>, RecordingError>,
    },
    Finished {
        id: u64,
        result: Result<CapturedAudio, RecordingError>,
    },
}

impl fmt::Debug for CaptureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureOutcome::Acquired { id, result } => f
                .debug_struct("Acquired")
                .field("id", id)
                .field("ok", &result.is_ok())
                .finish(),
            CaptureOutcome::Finished { id, result } => f
                .debug_struct("Finished")
                .field("id", id)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

enum RecorderState {
    Idle,
    /// Waiting for the device.  The previous buffer survives until the
    /// device is actually acquired.
    Starting {
        id: u64,
        previous: Option<Arc<RecordingBuffer>>,
        stop_requested: bool,
    },
    Capturing {
        id: u64,
        started_at: DateTime<Utc>,
        session: Box<dyn CaptureSession>,
    },
    Stopping {
        id: u64,
    },
    Completed(Arc<RecordingBuffer>),
}

pub struct Recorder {
    device: Arc<dyn CaptureDevice>,
    state: RecorderState,
    next_id: u64,
}

impl Recorder {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device: Arc::from(device),
            state: RecorderState::Idle,
            next_id: 1,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Box::new(DisabledCapture))
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, RecorderState::Capturing { .. })
    }

    /// A device job is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            RecorderState::Starting { .. } | RecorderState::Stopping { .. }
        )
    }

    /// Begin a new capture.  The returned job acquires the device.
    pub fn start(&mut self) -> Result<CaptureJob, RecordingError> {
        let previous = match &self.state {
            RecorderState::Idle => None,
            RecorderState::Completed(buf) => Some(buf.clone()),
            _ => return Err(RecordingError::AlreadyCapturing),
        };
        let id = self.next_id;
        self.next_id += 1;
        debug!("Recording #{} acquiring capture device", id);
        self.state = RecorderState::Starting {
            id,
            previous,
            stop_requested: false,
        };
        Ok(CaptureJob::Acquire {
            id,
            device: self.device.clone(),
        })
    }

    /// Stop the capture.  Returns the job that releases the device, or
    /// `None` while the device is still being acquired (the stop is applied
    /// as soon as it is) or already being released.
    pub fn stop(&mut self) -> Result<Option<CaptureJob>, RecordingError> {
        match &mut self.state {
            RecorderState::Starting { stop_requested, .. } => {
                *stop_requested = true;
                return Ok(None);
            }
            RecorderState::Stopping { .. } => return Ok(None),
            RecorderState::Capturing { .. } => {}
            RecorderState::Idle | RecorderState::Completed(_) => {
                return Err(RecordingError::NotCapturing)
            }
        }
        let RecorderState::Capturing { id, session, .. } =
            std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return Err(RecordingError::NotCapturing);
        };
        self.state = RecorderState::Stopping { id };
        Ok(Some(CaptureJob::Finish { id, session }))
    }

    /// Apply the outcome of a finished job.  May hand back a follow-up job
    /// that must run too.
    pub fn complete(
        &mut self,
        outcome: CaptureOutcome,
    ) -> Result<Option<CaptureJob>, RecordingError> {
        match outcome {
            CaptureOutcome::Acquired { id, result } => self.on_acquired(id, result),
            CaptureOutcome::Finished { id, result } => self.on_finished(id, result),
        }
    }

    fn on_acquired(
        &mut self,
        id: u64,
        result: Result<Box<dyn CaptureSession>, RecordingError>,
    ) -> Result<Option<CaptureJob>, RecordingError> {
        let pending = matches!(self.state, RecorderState::Starting { id: cur, .. } if cur == id);
        if !pending {
            // superseded or shut down: release whatever was acquired
            debug!("Recording #{} acquired after it was abandoned", id);
            return Ok(result.ok().map(|session| CaptureJob::Finish { id, session }));
        }
        let RecorderState::Starting {
            previous,
            stop_requested,
            ..
        } = std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return Ok(None);
        };

        match result {
            Ok(session) if stop_requested => {
                info!("Recording #{} stopped right after it started", id);
                self.state = RecorderState::Stopping { id };
                Ok(Some(CaptureJob::Finish { id, session }))
            }
            Ok(session) => {
                if previous.is_some() {
                    info!("Discarding previous recording");
                }
                info!("Recording #{} started", id);
                self.state = RecorderState::Capturing {
                    id,
                    started_at: Utc::now(),
                    session,
                };
                Ok(None)
            }
            Err(e) => {
                self.state = match previous {
                    Some(buf) => RecorderState::Completed(buf),
                    None => RecorderState::Idle,
                };
                Err(e)
            }
        }
    }

    fn on_finished(
        &mut self,
        id: u64,
        result: Result<CapturedAudio, RecordingError>,
    ) -> Result<Option<CaptureJob>, RecordingError> {
        if !matches!(self.state, RecorderState::Stopping { id: cur } if cur == id) {
            debug!("Recording #{} released after it was abandoned", id);
            return Ok(None);
        }
        match result {
            Ok(audio) => {
                let buffer = Arc::new(RecordingBuffer { id, audio });
                info!(
                    "Recording #{} stopped: {} frames, {:.1}s",
                    id,
                    buffer.frames(),
                    buffer.duration_secs()
                );
                self.state = RecorderState::Completed(buffer);
                Ok(None)
            }
            Err(e) => {
                self.state = RecorderState::Idle;
                Err(e)
            }
        }
    }

    pub fn buffer(&self) -> Option<Arc<RecordingBuffer>> {
        match &self.state {
            RecorderState::Completed(buf) => Some(buf.clone()),
            RecorderState::Starting { previous, .. } => previous.clone(),
            _ => None,
        }
    }

    pub fn export_wav(&self, path: &Path) -> Result<PathBuf, RecordingError> {
        let buffer = self.buffer().ok_or(RecordingError::NoRecording)?;
        buffer.write_wav(path)?;
        info!("Recording #{} exported to {}", buffer.id(), path.display());
        Ok(path.to_path_buf())
    }

    pub fn view(&self) -> RecordingView {
        match &self.state {
            RecorderState::Idle => RecordingView::Idle,
            RecorderState::Starting { id, .. } => RecordingView::Starting { id: *id },
            RecorderState::Capturing { id, started_at, .. } => RecordingView::Capturing {
                id: *id,
                started_at: started_at.timestamp(),
            },
            RecorderState::Stopping { id } => RecordingView::Stopping { id: *id },
            RecorderState::Completed(buf) => RecordingView::Completed {
                id: buf.id(),
                sample_rate: buf.sample_rate(),
                channels: buf.channels(),
                frames: buf.frames(),
                duration_secs: buf.duration_secs(),
            },
        }
    }

    /// Drop to idle.  Returns the job releasing a running capture, if any.
    pub fn shutdown(&mut self) -> Option<CaptureJob> {
        match std::mem::replace(&mut self.state, RecorderState::Idle) {
            RecorderState::Capturing { id, session, .. } => {
                info!("Abandoning recording #{} on shutdown", id);
                Some(CaptureJob::Finish { id, session })
            }
            RecorderState::Starting { id, .. } | RecorderState::Stopping { id } => {
                warn!("Recording #{} still busy on shutdown", id);
                None
            }
            RecorderState::Idle | RecorderState::Completed(_) => None,
        }
    }
}
