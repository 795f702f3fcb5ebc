//! rhythm-reader: listen to rhythm-annotated English text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rhythm_reader::config::Config;
use rhythm_reader::output::RodioOutput;
use rhythm_reader::script::RhythmScript;
use rhythm_reader::synthesis::GeminiSynthesizer;
use rhythm_reader::{spawn_player, ControllerState, PlaybackError, PlayerHandle, PlayerStatus};

#[derive(Parser, Debug)]
#[command(name = "rhythm-reader", about = "Listen to rhythm-annotated English text")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text to speak (rhythm markup is stripped)
    #[arg(short, long, conflicts_with = "file")]
    text: Option<String>,

    /// Plain text file, or a JSON script from the extraction service
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Playback speed (clamped to the configured range)
    #[arg(long)]
    speed: Option<f32>,

    /// Loop the clip
    #[arg(long)]
    repeat: bool,

    /// Write the decoded clip to a WAV file once loaded
    #[arg(long)]
    save_wav: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Play,
    Resume,
    Stop,
    Speed(f32),
    Repeat(bool),
    Status,
    Load(String),
    Retry,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "play" | "p" => Ok(Command::Play),
        "resume" | "r" => Ok(Command::Resume),
        "stop" | "s" => Ok(Command::Stop),
        "speed" => rest
            .parse::<f32>()
            .map(Command::Speed)
            .map_err(|_| format!("speed needs a number, got '{rest}'")),
        "repeat" | "loop" => match rest.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(Command::Repeat(true)),
            "off" | "false" | "0" => Ok(Command::Repeat(false)),
            _ => Err("repeat needs 'on' or 'off'".into()),
        },
        "status" => Ok(Command::Status),
        "load" if !rest.is_empty() => Ok(Command::Load(rest.to_string())),
        "load" => Err("load needs some text".into()),
        "retry" => Ok(Command::Retry),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        "" => Err(String::new()),
        other => Err(format!("unknown command '{other}', try 'help'")),
    }
}

const HELP: &str = "commands: play | resume | stop | speed <0.5-1.5> | repeat on|off | status | load <text> | retry | quit";

/// Flattened text from a plain or JSON script file.
fn read_script(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let script = if path.extension().is_some_and(|ext| ext == "json") {
        RhythmScript::from_json(&contents)?
    } else if contents.trim_start().starts_with(['{', '[']) {
        RhythmScript::from_json(&contents).unwrap_or_else(|e| {
            debug!("{} is not a JSON script ({e}), reading as plain text", path.display());
            RhythmScript::from_plain(&contents)
        })
    } else {
        RhythmScript::from_plain(&contents)
    };
    info!("Read {} sentences from {}", script.sentence_count(), path.display());
    Ok(script.full_text())
}

fn describe(status: &PlayerStatus) -> String {
    let mut line = format!(
        "{} {:.1}s / {:.1}s, speed {}, repeat {}",
        status.state,
        status.position,
        status.duration,
        status.rate,
        if status.repeat { "on" } else { "off" }
    );
    if let Some(error) = &status.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

/// Load text and wait for the outcome, printing what happened.
async fn load_and_report(player: &PlayerHandle, text: &str) -> Result<PlayerStatus, PlaybackError> {
    if player.load(text).await? == ControllerState::Loading {
        println!("synthesizing...");
    }
    let status = player.wait_until_loaded().await?;
    match status.state {
        ControllerState::Ready | ControllerState::Playing => println!("ready: {:.1}s of audio", status.duration),
        ControllerState::Idle => println!("nothing to speak"),
        ControllerState::Error => println!(
            "could not load audio: {}; type 'retry' to try again",
            status.error.as_deref().unwrap_or("unknown error")
        ),
        ControllerState::Loading => {}
    }
    Ok(status)
}

fn report_transport(action: &str, result: Result<bool, PlaybackError>) {
    match result {
        Ok(true) => println!("{action}"),
        Ok(false) => println!("no clip is ready"),
        Err(e) => println!("{e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP/audio internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,rodio=info,cpal=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn,rodio=warn,cpal=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rhythm-reader starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(speed) = args.speed {
        config.playback.speed = speed;
    }
    if args.repeat {
        config.playback.repeat = true;
    }

    let initial_text = match (&args.text, &args.file) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => Some(read_script(path)?),
        (None, None) => None,
    };

    let synthesizer = Arc::new(GeminiSynthesizer::new(&config.synthesis)?);
    let (player, task) = spawn_player(RodioOutput::new(), synthesizer, config.playback.clone());

    if let Some(text) = initial_text {
        let status = load_and_report(&player, &text).await?;
        if let (Some(path), ControllerState::Ready) = (&args.save_wav, status.state) {
            if let Some(clip) = player.clip().await? {
                match clip.write_wav(path) {
                    Ok(()) => println!("saved {}", path.display()),
                    Err(e) => warn!("Failed to write {}: {e}", path.display()),
                }
            }
        }
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                if !message.is_empty() {
                    println!("{message}");
                }
                continue;
            }
        };

        match command {
            Command::Play => report_transport("playing", player.play_from_start().await),
            Command::Resume => report_transport("resumed", player.resume().await),
            Command::Stop => {
                if player.stop().await? {
                    println!("stopped at {:.1}s", player.status().await?.position);
                } else {
                    println!("not playing");
                }
            }
            Command::Speed(rate) => println!("speed {}", player.set_speed(rate).await?),
            Command::Repeat(repeat) => {
                player.set_repeat(repeat).await?;
                println!("repeat {}", if repeat { "on" } else { "off" });
            }
            Command::Status => println!("{}", describe(&player.status().await?)),
            Command::Load(text) => {
                load_and_report(&player, &text).await?;
            }
            Command::Retry => match player.status().await?.source {
                Some(source) => {
                    load_and_report(&player, &source).await?;
                }
                None => println!("nothing to retry"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    player.shutdown().await;
    task.await?;
    info!("rhythm-reader stopped");
    Ok(())
}
