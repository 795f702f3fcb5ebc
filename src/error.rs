use thiserror::Error;

/// The remote synthesis call failed or produced no audio.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("no API key configured (set {0} or synthesis.api_key)")]
    MissingApiKey(String),
    #[error("synthesis request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("synthesis service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("synthesis response contained no audio")]
    MissingAudio,
    #[error("synthesis failed: {0}")]
    Remote(String),
}

/// The synthesized payload could not be turned into samples.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("audio payload is empty")]
    Empty,
}

/// Why the current clip ended up in the `Error` state.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// The audio sink could not be created, resumed or started.
///
/// These never move the controller into `Error`; the next transport
/// command simply tries again.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("audio playback is not supported on this platform: {0}")]
    Unsupported(String),
    #[error("audio is not ready yet, wait for loading to finish")]
    NotReady,
    #[error("audio output is blocked or suspended: {0}")]
    Blocked(String),
    #[error("player is no longer running")]
    Closed,
}
