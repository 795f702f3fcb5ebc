//! rhythm-reader: speech playback core for rhythm-annotated reading practice.
//!
//! Annotated text is flattened and stripped of rhythm markup, sent to a
//! speech synthesis service, decoded from base64 PCM, and played through
//! a controller with play/resume/stop, speed and repeat.

pub mod config;
pub mod controller;
pub mod error;
pub mod markup;
pub mod output;
pub mod pcm;
pub mod player;
pub mod script;
pub mod synthesis;

pub use controller::{ControllerState, PlaybackController};
pub use error::{DecodeError, LoadError, PlaybackError, SynthesisError};
pub use player::{spawn_player, PlayerHandle, PlayerStatus};
