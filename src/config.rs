//! Configuration management for rhythm-reader.
//!
//! Loads config from YAML files in standard locations. Every section
//! falls back to its defaults, so a partial file is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub host: String,
    pub model: String,
    pub voice: String,
    /// Inline API key. Prefer `api_key_env` outside of local testing.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            host: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Kore".into(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".into(),
            timeout_secs: 60,
        }
    }
}

impl SynthesisConfig {
    /// Inline key first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub speed: f32,
    pub repeat: bool,
    pub min_speed: f32,
    pub max_speed: f32,
    pub activation_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            repeat: false,
            min_speed: 0.5,
            max_speed: 1.5,
            activation_timeout_ms: 3000,
        }
    }
}

impl PlaybackConfig {
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    /// Configured rate range. Non-finite or non-positive bounds fall back
    /// to the defaults, a misordered pair is swapped.
    pub fn speed_range(&self) -> (f32, f32) {
        if !self.has_usable_range() {
            let defaults = Self::default();
            return (defaults.min_speed, defaults.max_speed);
        }
        if self.min_speed <= self.max_speed {
            (self.min_speed, self.max_speed)
        } else {
            (self.max_speed, self.min_speed)
        }
    }

    fn has_usable_range(&self) -> bool {
        let usable = |bound: f32| bound.is_finite() && bound > 0.0;
        usable(self.min_speed) && usable(self.max_speed)
    }

    /// Clamp a requested rate into the configured range.
    pub fn clamp_speed(&self, rate: f32) -> f32 {
        let (lo, hi) = self.speed_range();
        if rate.is_nan() {
            return 1.0f32.clamp(lo, hi);
        }
        rate.clamp(lo, hi)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub synthesis: SynthesisConfig,
    pub playback: PlaybackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/rhythm-reader/config.yaml
    /// 3. /etc/rhythm-reader/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/rhythm-reader/config.yaml")),
                Some(PathBuf::from("/etc/rhythm-reader/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        let mut config: Self = serde_yml::from_str(contents)?;
        let playback = &mut config.playback;
        if !playback.has_usable_range() {
            let (lo, hi) = playback.speed_range();
            tracing::warn!(
                "Invalid speed range {}..{}, using {lo}..{hi}",
                playback.min_speed,
                playback.max_speed
            );
            playback.min_speed = lo;
            playback.max_speed = hi;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse("playback:\n  speed: 1.25\n").unwrap();
        assert_eq!(config.playback.speed, 1.25);
        assert!(!config.playback.repeat);
        assert_eq!(config.playback.max_speed, 1.5);
        assert_eq!(config.synthesis.voice, "Kore");
    }

    #[test]
    fn clamp_speed_uses_product_range() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.clamp_speed(0.1), 0.5);
        assert_eq!(playback.clamp_speed(5.0), 1.5);
        assert_eq!(playback.clamp_speed(0.8), 0.8);
        assert_eq!(playback.clamp_speed(f32::NAN), 1.0);
    }

    #[test]
    fn clamp_speed_tolerates_swapped_bounds() {
        let playback = PlaybackConfig {
            min_speed: 2.0,
            max_speed: 0.75,
            ..Default::default()
        };
        assert_eq!(playback.clamp_speed(3.0), 2.0);
        assert_eq!(playback.clamp_speed(0.1), 0.75);
    }

    #[test]
    fn unusable_speed_bounds_fall_back_to_defaults() {
        let config = Config::parse("playback:\n  min_speed: .nan\n").unwrap();
        assert_eq!(config.playback.min_speed, 0.5);
        assert_eq!(config.playback.max_speed, 1.5);
        assert_eq!(config.playback.clamp_speed(1.0), 1.0);

        let config = Config::parse("playback:\n  min_speed: 0.0\n  max_speed: .inf\n").unwrap();
        assert_eq!(config.playback.speed_range(), (0.5, 1.5));
        assert_eq!(config.playback.clamp_speed(0.0), 0.5);

        let raw = PlaybackConfig {
            min_speed: 0.75,
            max_speed: f32::NAN,
            ..Default::default()
        };
        assert_eq!(raw.clamp_speed(5.0), 1.5);
        assert_eq!(raw.clamp_speed(-1.0), 0.5);
    }

    #[test]
    fn inline_api_key_wins() {
        let synthesis = SynthesisConfig {
            api_key: Some("abc".into()),
            api_key_env: "RHYTHM_READER_TEST_UNSET_KEY".into(),
            ..Default::default()
        };
        assert_eq!(synthesis.resolve_api_key().as_deref(), Some("abc"));

        let blank = SynthesisConfig {
            api_key: Some("  ".into()),
            api_key_env: "RHYTHM_READER_TEST_UNSET_KEY".into(),
            ..Default::default()
        };
        assert_eq!(blank.resolve_api_key(), None);
    }

    #[test]
    fn activation_timeout_is_millis() {
        let playback = PlaybackConfig {
            activation_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(playback.activation_timeout(), Duration::from_millis(250));
    }
}
