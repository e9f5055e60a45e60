//! cpal microphone backend.
//!
//! `cpal::Stream` is not `Send`, so each capture owns a dedicated thread that
//! builds the input stream, reports the negotiated format back, and holds the
//! stream alive until told to stop.  Samples land in a shared buffer.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tracing::{debug, error, info};

use crate::recording::{
    CaptureDevice, CaptureSession, CapturedAudio, RecordingError, MAX_RECORDING_SECS,
};

type SharedSamples = Arc<Mutex<Vec<f32>>>;

/// The host's default input device.
#[derive(Debug, Default)]
pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureDevice for CpalCapture {
    fn acquire(&self) -> Result<Box<dyn CaptureSession>, RecordingError> {
        let samples: SharedSamples = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_samples = samples.clone();
        let thread = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture_thread(thread_samples, ready_tx, stop_rx))
            .map_err(|e| RecordingError::CaptureUnavailable(e.to_string()))?;

        let (sample_rate, channels) = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(RecordingError::CaptureUnavailable(
                    "capture thread exited during init".into(),
                ));
            }
        };
        info!("Capture started: {} Hz, {} channel(s)", sample_rate, channels);

        Ok(Box::new(CpalSession {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            samples,
            sample_rate,
            channels,
        }))
    }
}

struct CpalSession {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    samples: SharedSamples,
    sample_rate: u32,
    channels: u16,
}

impl CpalSession {
    fn stop_thread(&mut self) -> Result<(), RecordingError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| RecordingError::Capture("capture thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl CaptureSession for CpalSession {
    fn finish(mut self: Box<Self>) -> Result<CapturedAudio, RecordingError> {
        self.stop_thread()?;
        let samples = {
            let mut buf = self.samples.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buf)
        };
        Ok(CapturedAudio {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        let _ = self.stop_thread();
    }
}

fn capture_thread(
    samples: SharedSamples,
    ready_tx: std_mpsc::Sender<Result<(u32, u16), RecordingError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match open_input_stream(samples) {
        Ok((stream, sample_rate, channels)) => {
            let _ = ready_tx.send(Ok((sample_rate, channels)));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Err means the session was dropped; either way we are done
    let _ = stop_rx.recv();
    drop(stream);
    debug!("Capture thread exiting");
}

fn open_input_stream(samples: SharedSamples) -> Result<(cpal::Stream, u32, u16), RecordingError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RecordingError::CaptureUnavailable("no input device".into()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| RecordingError::CaptureUnavailable(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let max_samples = MAX_RECORDING_SECS as usize * sample_rate as usize * channels as usize;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, samples, max_samples),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, samples, max_samples),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, samples, max_samples),
        other => {
            return Err(RecordingError::CaptureUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| RecordingError::CaptureUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| RecordingError::CaptureUnavailable(e.to_string()))?;
    Ok((stream, sample_rate, channels))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: SharedSamples,
    max_samples: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut buf = samples.lock().unwrap_or_else(|e| e.into_inner());
            let room = max_samples.saturating_sub(buf.len());
            buf.extend(data.iter().take(room).map(|&s| f32::from_sample(s)));
        },
        |err| error!("Capture stream error: {}", err),
        None,
    )
}
