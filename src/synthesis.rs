//! Speech synthesis client.
//!
//! Sends plain text to a Gemini TTS model and returns the base64 PCM
//! payload untouched. Decoding happens in the controller so that a bad
//! payload and a failed request end up in the same error state.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;

/// Text in, base64 16-bit mono 24 kHz PCM out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<String, SynthesisError>;
}

pub struct GeminiSynthesizer {
    client: Client,
    host: String,
    model: String,
    voice: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl GeminiSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self, SynthesisError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            api_key: config.resolve_api_key(),
            api_key_env: config.api_key_env.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.host, self.model)
    }

    fn request_body(&self, text: &str) -> Value {
        json!({
            "contents": [{
                "parts": [{ "text": text }]
            }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<String, SynthesisError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SynthesisError::MissingApiKey(self.api_key_env.clone()))?;

        let t_start = Instant::now();
        debug!("Requesting speech for {} chars from '{}'", text.len(), self.model);

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .inspect_err(|e| {
                if e.is_connect() {
                    warn!("Cannot connect to synthesis service at {}", self.host);
                } else if e.is_timeout() {
                    warn!("Synthesis request timed out");
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Synthesis service returned status {status}");
            return Err(SynthesisError::Status { status, body });
        }

        let data: Value = resp.json().await?;
        let payload = extract_audio(&data).ok_or(SynthesisError::MissingAudio)?;

        info!(
            "Synthesized {} chars → {} base64 bytes ({:.0}ms)",
            text.len(),
            payload.len(),
            t_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(payload.to_string())
    }
}

/// First non-empty `inlineData.data` of the first candidate.
fn extract_audio(data: &Value) -> Option<&str> {
    data["candidates"][0]["content"]["parts"]
        .as_array()?
        .iter()
        .filter_map(|part| part["inlineData"]["data"].as_str())
        .find(|payload| !payload.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_for(host: String) -> SynthesisConfig {
        SynthesisConfig {
            host,
            model: "test-tts".into(),
            voice: "Puck".into(),
            api_key: Some("secret".into()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn returns_inline_audio_payload() {
        let router = Router::new().route(
            "/v1beta/models/test-tts:generateContent",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-goog-api-key"], "secret");
                assert_eq!(body["contents"][0]["parts"][0]["text"], "Hello world");
                assert_eq!(
                    body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                        ["voiceName"],
                    "Puck"
                );
                Json(json!({
                    "candidates": [{
                        "content": {
                            "parts": [{
                                "inlineData": { "mimeType": "audio/L16;rate=24000", "data": "AEAAwA==" }
                            }]
                        }
                    }]
                }))
            }),
        );
        let host = serve(router).await;

        let synth = GeminiSynthesizer::new(&config_for(host)).unwrap();
        let payload = synth.synthesize("Hello world").await.unwrap();
        assert_eq!(payload, "AEAAwA==");
    }

    #[tokio::test]
    async fn missing_audio_is_an_error() {
        let router = Router::new().route(
            "/v1beta/models/test-tts:generateContent",
            post(|| async { Json(json!({ "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }] })) }),
        );
        let host = serve(router).await;

        let synth = GeminiSynthesizer::new(&config_for(host)).unwrap();
        let err = synth.synthesize("Hello").await.unwrap_err();
        assert!(matches!(err, SynthesisError::MissingAudio));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let router = Router::new().route(
            "/v1beta/models/test-tts:generateContent",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exhausted") }),
        );
        let host = serve(router).await;

        let synth = GeminiSynthesizer::new(&config_for(host)).unwrap();
        match synth.synthesize("Hello").await.unwrap_err() {
            SynthesisError::Status { status, body } => {
                assert_eq!(status, reqwest::StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(body, "quota exhausted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let config = SynthesisConfig {
            host: "http://127.0.0.1:9".into(),
            api_key: None,
            api_key_env: "RHYTHM_READER_TEST_UNSET_KEY".into(),
            ..Default::default()
        };
        let synth = GeminiSynthesizer::new(&config).unwrap();
        let err = synth.synthesize("Hello").await.unwrap_err();
        assert!(matches!(err, SynthesisError::MissingApiKey(ref env) if env == "RHYTHM_READER_TEST_UNSET_KEY"));
    }

    #[test]
    fn extract_skips_empty_parts() {
        let data = json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "data": "" } },
                { "inlineData": { "data": "AAAA" } }
            ] } }]
        });
        assert_eq!(extract_audio(&data), Some("AAAA"));
        assert_eq!(extract_audio(&json!({})), None);
    }
}
