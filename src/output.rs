//! Audio output device and per-session voices.
//!
//! `AudioOutput` is the one device a controller owns. Each playback
//! session gets a `PlaybackVoice` that can be re-rated, re-looped or
//! stopped while it plays. The device reports natural end of a clip by
//! calling the session's end callback from its own audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source, StreamError};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::pcm::DecodedAudio;

/// Called once when a non-looping session plays to the end of its clip.
pub type EndCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub audio: DecodedAudio,
    /// Seconds into the clip.
    pub offset: f64,
    pub rate: f32,
    pub looping: bool,
}

pub trait PlaybackVoice: Send {
    fn set_rate(&self, rate: f32);
    fn set_looping(&self, looping: bool);
    /// Halt output. The end callback must not fire afterwards.
    fn stop(&self);
}

#[async_trait]
pub trait AudioOutput: Send {
    /// Create or unsuspend the device. Called before every session start.
    async fn activate(&mut self) -> Result<(), PlaybackError>;

    /// Monotonic audio clock in seconds.
    fn current_time(&self) -> f64;

    fn start(
        &mut self,
        request: VoiceRequest,
        on_end: EndCallback,
    ) -> Result<Box<dyn PlaybackVoice>, PlaybackError>;

    /// Release the device. A later `activate` may reopen it.
    fn close(&mut self);
}

/// Default output device through rodio.
pub struct RodioOutput {
    // In rodio 0.21, OutputStream is the handle; dropping it stops all sinks
    stream: Option<OutputStream>,
    // Device open still running after a timed-out activate
    opening: Option<JoinHandle<Result<OutputStream, StreamError>>>,
    epoch: Instant,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self {
            stream: None,
            opening: None,
            epoch: Instant::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Default for RodioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn activate(&mut self) -> Result<(), PlaybackError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let t0 = Instant::now();
        // Opening the device can block on some hosts, keep it off the event loop
        let opened = await_open(&mut self.opening, OutputStreamBuilder::open_default_stream)
            .await
            .map_err(|e| PlaybackError::Blocked(format!("audio open task failed: {e}")))?;

        match opened {
            Ok(stream) => {
                info!("Audio output opened in {}ms", t0.elapsed().as_millis());
                self.stream = Some(stream);
                Ok(())
            }
            Err(StreamError::NoDevice) => {
                warn!("No audio output device available");
                Err(PlaybackError::Unsupported("no audio output device found".into()))
            }
            Err(e) => {
                warn!("Failed to open audio output: {e}");
                Err(PlaybackError::Blocked(e.to_string()))
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn start(
        &mut self,
        request: VoiceRequest,
        on_end: EndCallback,
    ) -> Result<Box<dyn PlaybackVoice>, PlaybackError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| PlaybackError::Blocked("audio output is not active".into()))?;

        let looping = Arc::new(AtomicBool::new(request.looping));
        let stopped = Arc::new(AtomicBool::new(false));
        let source = ClipSource {
            samples: request.audio.samples().clone(),
            sample_rate: request.audio.sample_rate(),
            cursor: request.audio.frame_at(request.offset),
            looping: looping.clone(),
            stopped: stopped.clone(),
            on_end: Some(on_end),
        };

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        sink.set_speed(request.rate);
        sink.append(source);
        debug!(
            "Voice started at {:.2}s (rate {}, loop {})",
            request.offset, request.rate, request.looping
        );

        Ok(Box::new(RodioVoice {
            sink,
            looping,
            stopped,
        }))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Audio output closed");
        }
    }
}

/// Await the blocking open task in `slot`, spawning `open` only when none
/// is in flight. The task stays in `slot` if this future is dropped, so a
/// retry after a timeout joins it instead of starting another thread.
async fn await_open<T, F>(slot: &mut Option<JoinHandle<T>>, open: F) -> Result<T, JoinError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = slot.get_or_insert_with(|| tokio::task::spawn_blocking(open));
    let result = task.await;
    *slot = None;
    result
}

struct RodioVoice {
    sink: Sink,
    looping: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl PlaybackVoice for RodioVoice {
    fn set_rate(&self, rate: f32) {
        self.sink.set_speed(rate);
    }

    fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.sink.stop();
    }
}

/// Mono clip reader that can wrap around while its loop flag is set.
struct ClipSource {
    samples: Arc<[f32]>,
    sample_rate: u32,
    cursor: usize,
    looping: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    on_end: Option<EndCallback>,
}

impl ClipSource {
    fn finish(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            if !self.stopped.load(Ordering::Relaxed) {
                on_end();
            }
        }
    }
}

impl Iterator for ClipSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.stopped.load(Ordering::Relaxed) {
            self.on_end = None;
            return None;
        }
        if self.cursor >= self.samples.len() {
            if self.looping.load(Ordering::Relaxed) && !self.samples.is_empty() {
                self.cursor = 0;
            } else {
                self.finish();
                return None;
            }
        }
        let sample = self.samples[self.cursor];
        self.cursor += 1;
        Some(sample)
    }
}

impl Source for ClipSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> rodio::ChannelCount {
        1
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
