//! Speech playback controller.
//!
//! Idle → Loading → Ready ⇄ Playing, with Error as the sticky outcome of a
//! failed synthesis or decode. Owns the audio output, the decoded clip and
//! at most one playback session.
//!
//! Loading is split in two halves so a host event loop can keep serving
//! commands while synthesis is in flight: `begin_load` hands out a
//! `LoadRequest`, and `finish_load` commits its result only if no newer
//! request has been issued since.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{DecodeError, LoadError, PlaybackError, SynthesisError};
use crate::markup::strip_markers;
use crate::output::{AudioOutput, EndCallback, PlaybackVoice, VoiceRequest};
use crate::pcm::{decode_base64_pcm, DecodedAudio};
use crate::synthesis::SpeechSynthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Loading,
    Ready,
    Playing,
    Error,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Loading => write!(f, "LOADING"),
            Self::Ready => write!(f, "READY"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Natural end of a session, sent from the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnded {
    pub session_id: u64,
}

/// A synthesis call the caller must perform and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub id: u64,
    /// Plain text, markers already removed.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStart {
    /// Nothing to speak; the controller is now idle.
    Idle,
    /// The same text is already decoded.
    Cached,
    Request(LoadRequest),
}

struct ActiveSession {
    id: u64,
    voice: Box<dyn PlaybackVoice>,
    start_offset: f64,
    // Media time is accumulated per rate segment so speed changes keep
    // the position continuous.
    segment_started_at: f64,
    segment_base: f64,
    rate: f32,
    looping: bool,
}

impl ActiveSession {
    fn elapsed(&self, now: f64) -> f64 {
        self.segment_base + (now - self.segment_started_at).max(0.0) * self.rate as f64
    }

    fn rebase(&mut self, now: f64) {
        self.segment_base = self.elapsed(now);
        self.segment_started_at = now;
    }
}

pub struct PlaybackController<O: AudioOutput> {
    output: O,
    config: PlaybackConfig,
    completions: UnboundedSender<SessionEnded>,

    state: ControllerState,
    source: Option<String>,
    audio: Option<DecodedAudio>,
    position: f64,
    rate: f32,
    repeat: bool,
    session: Option<ActiveSession>,
    last_error: Option<LoadError>,

    pending_request: Option<u64>,
    next_request_id: u64,
    next_session_id: u64,
    disposed: bool,
}

impl<O: AudioOutput> PlaybackController<O> {
    pub fn new(output: O, config: PlaybackConfig, completions: UnboundedSender<SessionEnded>) -> Self {
        let rate = config.clamp_speed(config.speed);
        let repeat = config.repeat;
        Self {
            output,
            config,
            completions,
            state: ControllerState::Idle,
            source: None,
            audio: None,
            position: 0.0,
            rate,
            repeat,
            session: None,
            last_error: None,
            pending_request: None,
            next_request_id: 0,
            next_session_id: 0,
            disposed: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Plain text of the current clip, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn audio(&self) -> Option<&DecodedAudio> {
        self.audio.as_ref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn duration(&self) -> f64 {
        self.audio.as_ref().map_or(0.0, DecodedAudio::duration)
    }

    /// Where playback was last paused or stopped.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Live position, including time played by the active session.
    pub fn current_position(&self) -> f64 {
        match &self.session {
            Some(session) => {
                let elapsed = session.elapsed(self.output.current_time());
                (session.start_offset + elapsed).clamp(0.0, self.duration())
            }
            None => self.position,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn last_error(&self) -> Option<&LoadError> {
        self.last_error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.state == ControllerState::Loading
    }

    /// First half of Load: tear down playback and decide what to fetch.
    pub fn begin_load(&mut self, text: &str) -> LoadStart {
        let plain = strip_markers(text);

        if plain.is_empty() {
            self.release_session();
            self.clear_clip();
            self.source = None;
            self.state = ControllerState::Idle;
            debug!("Empty text, controller idle");
            return LoadStart::Idle;
        }

        if self.source.as_deref() == Some(plain.as_str())
            && matches!(self.state, ControllerState::Ready | ControllerState::Playing)
        {
            debug!("Text unchanged, keeping decoded clip");
            return LoadStart::Cached;
        }

        self.release_session();
        self.clear_clip();

        let id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_request = Some(id);
        self.source = Some(plain.clone());
        self.state = ControllerState::Loading;
        info!("Loading clip #{id} ({} chars)", plain.len());

        LoadStart::Request(LoadRequest { id, text: plain })
    }

    /// Second half of Load. Returns whether the result was committed.
    pub fn finish_load(&mut self, request_id: u64, result: Result<String, SynthesisError>) -> bool {
        if self.pending_request != Some(request_id) {
            debug!("Discarding superseded synthesis result #{request_id}");
            return false;
        }
        self.pending_request = None;

        let decoded = result.map_err(LoadError::from).and_then(|payload| {
            let audio = decode_base64_pcm(&payload)?;
            if audio.is_empty() {
                return Err(DecodeError::Empty.into());
            }
            Ok(audio)
        });

        match decoded {
            Ok(audio) => {
                info!("Clip #{request_id} ready ({:.2}s)", audio.duration());
                self.audio = Some(audio);
                self.position = 0.0;
                self.state = ControllerState::Ready;
            }
            Err(e) => {
                warn!("Clip #{request_id} failed: {e}");
                self.audio = None;
                self.position = 0.0;
                self.last_error = Some(e);
                self.state = ControllerState::Error;
            }
        }
        true
    }

    /// Load in one step, awaiting the synthesizer inline.
    pub async fn load(&mut self, synthesizer: &dyn SpeechSynthesizer, text: &str) -> ControllerState {
        if let LoadStart::Request(request) = self.begin_load(text) {
            let result = synthesizer.synthesize(&request.text).await;
            self.finish_load(request.id, result);
        }
        self.state
    }

    /// Play the clip from offset 0, restarting any active session.
    ///
    /// `Ok(false)` means the command did not apply (no clip, or Error).
    pub async fn play_from_start(&mut self) -> Result<bool, PlaybackError> {
        match self.state {
            ControllerState::Ready | ControllerState::Playing => {}
            ControllerState::Loading => return Err(PlaybackError::NotReady),
            ControllerState::Idle | ControllerState::Error => {
                debug!("Play ignored in {} state", self.state);
                return Ok(false);
            }
        }

        self.release_session();
        self.position = 0.0;
        self.start_session(0.0).await?;
        Ok(true)
    }

    /// Continue from the stored position.
    pub async fn resume(&mut self) -> Result<bool, PlaybackError> {
        match self.state {
            ControllerState::Ready => {}
            ControllerState::Loading => return Err(PlaybackError::NotReady),
            _ => {
                debug!("Resume ignored in {} state", self.state);
                return Ok(false);
            }
        }

        let offset = self.position.clamp(0.0, self.duration());
        self.start_session(offset).await?;
        Ok(true)
    }

    /// Pause and remember the position. Returns false if nothing was playing.
    pub fn stop(&mut self) -> bool {
        if self.state != ControllerState::Playing {
            return false;
        }
        self.release_session();
        info!("Stopped at {:.2}s", self.position);
        true
    }

    /// Set the playback rate, applied live to an active session.
    pub fn set_speed(&mut self, rate: f32) -> f32 {
        let rate = self.config.clamp_speed(rate);
        let now = self.output.current_time();
        if let Some(session) = self.session.as_mut() {
            session.rebase(now);
            session.rate = rate;
            session.voice.set_rate(rate);
        }
        self.rate = rate;
        debug!("Speed set to {rate}");
        rate
    }

    /// Toggle looping, applied live to an active session.
    pub fn set_repeat(&mut self, repeat: bool) {
        if let Some(session) = self.session.as_mut() {
            session.looping = repeat;
            session.voice.set_looping(repeat);
        }
        self.repeat = repeat;
        debug!("Repeat set to {repeat}");
    }

    /// Handle the sink's end-of-clip signal. Stale sessions are ignored.
    pub fn on_session_ended(&mut self, session_id: u64) -> bool {
        match &self.session {
            Some(session) if session.id == session_id => {}
            _ => {
                debug!("Ignoring end of stale session {session_id}");
                return false;
            }
        }

        if let Some(session) = self.session.take() {
            if session.looping {
                debug!("Looping session {session_id} ended after loop was enabled");
            }
        }
        self.position = self.duration();
        self.state = ControllerState::Ready;
        info!("Playback finished");
        true
    }

    /// Release the session and close the output device.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.release_session();
        self.pending_request = None;
        self.output.close();
        self.disposed = true;
    }

    async fn start_session(&mut self, offset: f64) -> Result<(), PlaybackError> {
        let audio = self.audio.clone().ok_or(PlaybackError::NotReady)?;
        self.disposed = false;

        let timeout = self.config.activation_timeout();
        match tokio::time::timeout(timeout, self.output.activate()).await {
            Ok(activated) => activated?,
            Err(_) => {
                warn!("Audio output did not activate within {}ms", timeout.as_millis());
                return Err(PlaybackError::Blocked(format!(
                    "audio output did not start within {}ms",
                    timeout.as_millis()
                )));
            }
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let completions = self.completions.clone();
        let on_end: EndCallback = Box::new(move || {
            let _ = completions.send(SessionEnded { session_id });
        });

        let request = VoiceRequest {
            audio,
            offset,
            rate: self.rate,
            looping: self.repeat,
        };
        let voice = self.output.start(request, on_end)?;
        let now = self.output.current_time();

        self.session = Some(ActiveSession {
            id: session_id,
            voice,
            start_offset: offset,
            segment_started_at: now,
            segment_base: 0.0,
            rate: self.rate,
            looping: self.repeat,
        });
        self.state = ControllerState::Playing;
        info!("Playing from {offset:.2}s (rate {}, repeat {})", self.rate, self.repeat);
        Ok(())
    }

    /// The single teardown path: fold elapsed time into the position,
    /// then halt the voice.
    fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            let elapsed = session.elapsed(self.output.current_time());
            self.position = (session.start_offset + elapsed).clamp(0.0, self.duration());
            session.voice.stop();
            debug!("Session {} released at {:.2}s", session.id, self.position);
        }
        if self.state == ControllerState::Playing {
            self.state = ControllerState::Ready;
        }
    }

    fn clear_clip(&mut self) {
        self.audio = None;
        self.position = 0.0;
        self.last_error = None;
        self.pending_request = None;
    }
}

impl<O: AudioOutput> Drop for PlaybackController<O> {
    fn drop(&mut self) {
        self.dispose();
    }
}
