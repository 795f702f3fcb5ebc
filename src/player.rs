//! Player task: hosts one controller on a tokio event loop.
//!
//! Transport commands, synthesis results and end-of-clip signals all
//! arrive as messages and are applied to the controller one at a time.
//! Synthesis runs in spawned tasks so commands keep flowing while a clip
//! is loading.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PlaybackConfig;
use crate::controller::{ControllerState, LoadStart, PlaybackController, SessionEnded};
use crate::error::{PlaybackError, SynthesisError};
use crate::output::AudioOutput;
use crate::pcm::DecodedAudio;
use crate::synthesis::SpeechSynthesizer;

type Reply<T> = oneshot::Sender<T>;

enum PlayerCommand {
    Load { text: String, reply: Reply<ControllerState> },
    PlayFromStart { reply: Reply<Result<bool, PlaybackError>> },
    Resume { reply: Reply<Result<bool, PlaybackError>> },
    Stop { reply: Reply<bool> },
    SetSpeed { rate: f32, reply: Reply<f32> },
    SetRepeat { repeat: bool, reply: Reply<()> },
    Status { reply: Reply<PlayerStatus> },
    Clip { reply: Reply<Option<DecodedAudio>> },
    Shutdown,
}

struct Synthesized {
    request_id: u64,
    result: Result<String, SynthesisError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: ControllerState,
    pub position: f64,
    pub duration: f64,
    pub rate: f32,
    pub repeat: bool,
    pub source: Option<String>,
    pub error: Option<String>,
}

impl PlayerStatus {
    fn of<O: AudioOutput>(controller: &PlaybackController<O>) -> Self {
        Self {
            state: controller.state(),
            position: controller.current_position(),
            duration: controller.duration(),
            rate: controller.rate(),
            repeat: controller.repeat(),
            source: controller.source().map(str::to_string),
            error: controller.last_error().map(|e| e.to_string()),
        }
    }
}

/// Cloneable front end to a running player task.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::Sender<PlayerCommand>,
    status: watch::Receiver<PlayerStatus>,
}

impl PlayerHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> PlayerCommand) -> Result<T, PlaybackError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| PlaybackError::Closed)?;
        response.await.map_err(|_| PlaybackError::Closed)
    }

    /// Start loading `text`. Returns the state right after the request was
    /// accepted (`Loading`, or `Idle`/`Ready` when nothing needs fetching).
    pub async fn load(&self, text: impl Into<String>) -> Result<ControllerState, PlaybackError> {
        let text = text.into();
        self.request(|reply| PlayerCommand::Load { text, reply }).await
    }

    pub async fn play_from_start(&self) -> Result<bool, PlaybackError> {
        self.request(|reply| PlayerCommand::PlayFromStart { reply }).await?
    }

    pub async fn resume(&self) -> Result<bool, PlaybackError> {
        self.request(|reply| PlayerCommand::Resume { reply }).await?
    }

    pub async fn stop(&self) -> Result<bool, PlaybackError> {
        self.request(|reply| PlayerCommand::Stop { reply }).await
    }

    pub async fn set_speed(&self, rate: f32) -> Result<f32, PlaybackError> {
        self.request(|reply| PlayerCommand::SetSpeed { rate, reply }).await
    }

    pub async fn set_repeat(&self, repeat: bool) -> Result<(), PlaybackError> {
        self.request(|reply| PlayerCommand::SetRepeat { repeat, reply }).await
    }

    /// Fresh snapshot with the live playback position.
    pub async fn status(&self) -> Result<PlayerStatus, PlaybackError> {
        self.request(|reply| PlayerCommand::Status { reply }).await
    }

    /// The decoded clip, if one is loaded.
    pub async fn clip(&self) -> Result<Option<DecodedAudio>, PlaybackError> {
        self.request(|reply| PlayerCommand::Clip { reply }).await
    }

    /// Wait until the controller leaves `Loading`.
    pub async fn wait_until_loaded(&self) -> Result<PlayerStatus, PlaybackError> {
        self.wait_for(|status| status.state != ControllerState::Loading).await
    }

    /// Wait for a published status matching `condition`.
    pub async fn wait_for(
        &self,
        mut condition: impl FnMut(&PlayerStatus) -> bool,
    ) -> Result<PlayerStatus, PlaybackError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| condition(s))
            .await
            .map_err(|_| PlaybackError::Closed)?;
        Ok(matched.clone())
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(PlayerCommand::Shutdown).await;
    }
}

/// Spawn a player task owning `output`.
pub fn spawn_player<O>(
    output: O,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: PlaybackConfig,
) -> (PlayerHandle, JoinHandle<()>)
where
    O: AudioOutput + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let controller = PlaybackController::new(output, config, completion_tx);
    let (status_tx, status_rx) = watch::channel(PlayerStatus::of(&controller));

    let task = tokio::spawn(run(controller, synthesizer, command_rx, completion_rx, status_tx));

    let handle = PlayerHandle {
        commands: command_tx,
        status: status_rx,
    };
    (handle, task)
}

async fn run<O: AudioOutput>(
    mut controller: PlaybackController<O>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    mut commands: mpsc::Receiver<PlayerCommand>,
    mut completions: mpsc::UnboundedReceiver<SessionEnded>,
    status: watch::Sender<PlayerStatus>,
) {
    let (synth_tx, mut synth_rx) = mpsc::unbounded_channel::<Synthesized>();
    info!("Player ready");

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(command) => {
                        handle_command(&mut controller, command, &synthesizer, &synth_tx, &status).await;
                    }
                }
            }
            Some(done) = synth_rx.recv() => {
                controller.finish_load(done.request_id, done.result);
            }
            Some(ended) = completions.recv() => {
                controller.on_session_ended(ended.session_id);
            }
        }
        status.send_replace(PlayerStatus::of(&controller));
    }

    controller.dispose();
    status.send_replace(PlayerStatus::of(&controller));
    info!("Player stopped");
}

async fn handle_command<O: AudioOutput>(
    controller: &mut PlaybackController<O>,
    command: PlayerCommand,
    synthesizer: &Arc<dyn SpeechSynthesizer>,
    synth_tx: &mpsc::UnboundedSender<Synthesized>,
    status: &watch::Sender<PlayerStatus>,
) {
    match command {
        PlayerCommand::Load { text, reply } => {
            if let LoadStart::Request(request) = controller.begin_load(&text) {
                let synthesizer = synthesizer.clone();
                let synth_tx = synth_tx.clone();
                tokio::spawn(async move {
                    let result = synthesizer.synthesize(&request.text).await;
                    let _ = synth_tx.send(Synthesized {
                        request_id: request.id,
                        result,
                    });
                });
            }
            // Publish before replying so waiters never see the previous clip
            status.send_replace(PlayerStatus::of(controller));
            let _ = reply.send(controller.state());
        }
        PlayerCommand::PlayFromStart { reply } => {
            let _ = reply.send(controller.play_from_start().await);
        }
        PlayerCommand::Resume { reply } => {
            let _ = reply.send(controller.resume().await);
        }
        PlayerCommand::Stop { reply } => {
            let _ = reply.send(controller.stop());
        }
        PlayerCommand::SetSpeed { rate, reply } => {
            let _ = reply.send(controller.set_speed(rate));
        }
        PlayerCommand::SetRepeat { repeat, reply } => {
            controller.set_repeat(repeat);
            let _ = reply.send(());
        }
        PlayerCommand::Status { reply } => {
            let _ = reply.send(PlayerStatus::of(controller));
        }
        PlayerCommand::Clip { reply } => {
            let _ = reply.send(controller.audio().cloned());
        }
        PlayerCommand::Shutdown => debug!("Shutdown handled by the run loop"),
    }
}
