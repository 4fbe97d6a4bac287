//! External multimodal inference provider client.
//!
//! One POST per reasoning attempt, hard timeout, no internal retry. Any
//! failure comes back as a structured kind + message; the caller decides
//! how to degrade.

use crate::config::ProviderConfig;
use base64::Engine;
use cradle_common::ReasoningErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Metadata recorded for every reasoning attempt, including failed ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiMeta {
    pub model_name: String,
    pub latency_ms: u64,
    pub request_mode: String,
}

/// Raw binary audio handed to the provider inline.
#[derive(Debug, Clone, Copy)]
pub struct AudioInput<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

pub struct ProviderClient {
    http: reqwest::Client,
    api_key: String,
    api_endpoint: String,
    model_name: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: config.api_key.clone(),
            api_endpoint: config.api_endpoint.clone(),
            model_name: config.model_name.clone(),
        }
    }

    /// Send one generation request. Returns the free-text response on
    /// success; on failure, the kind + message, with `AiMeta` either way.
    pub async fn generate(
        &self,
        prompt: &str,
        context: &Value,
        audio: Option<AudioInput<'_>>,
    ) -> (Option<String>, AiMeta, Option<(ReasoningErrorKind, String)>) {
        let request_mode = if audio.is_some() {
            "multimodal"
        } else {
            "text_contextual"
        };
        let mut meta = AiMeta {
            model_name: self.model_name.clone(),
            latency_ms: 0,
            request_mode: request_mode.to_string(),
        };

        if self.api_key.is_empty() {
            return (
                None,
                meta,
                Some((
                    ReasoningErrorKind::ConfigurationError,
                    "CRADLE_API_KEY not set".to_string(),
                )),
            );
        }
        if self.api_endpoint.is_empty() {
            return (
                None,
                meta,
                Some((
                    ReasoningErrorKind::ConfigurationError,
                    "CRADLE_API_ENDPOINT not set".to_string(),
                )),
            );
        }

        let endpoint = if self.api_endpoint.contains("key=") {
            self.api_endpoint.clone()
        } else {
            format!("{}?key={}", self.api_endpoint, self.api_key)
        };

        let mut parts = vec![
            json!({"text": prompt}),
            json!({"text": context.to_string()}),
        ];
        if let Some(audio) = audio {
            parts.push(json!({
                "inlineData": {
                    "mimeType": audio.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(audio.bytes),
                }
            }));
        }
        let request_body = json!({"contents": [{"role": "user", "parts": parts}]});

        let start = Instant::now();
        let response = match self.http.post(&endpoint).json(&request_body).send().await {
            Ok(response) => response,
            Err(e) => {
                meta.latency_ms = start.elapsed().as_millis() as u64;
                return (
                    None,
                    meta,
                    Some((
                        ReasoningErrorKind::TransportError,
                        format!("provider request failed: {}", e),
                    )),
                );
            }
        };
        meta.latency_ms = start.elapsed().as_millis() as u64;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return (
                None,
                meta,
                Some((
                    ReasoningErrorKind::TransportError,
                    format!("provider HTTP {}: {}", status.as_u16(), truncate(&body, 300)),
                )),
            );
        }

        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(e) => {
                return (
                    None,
                    meta,
                    Some((
                        ReasoningErrorKind::ParseError,
                        format!("provider response is not JSON: {}", e),
                    )),
                );
            }
        };

        if let Some(model) = data
            .get("modelVersion")
            .or_else(|| data.get("model"))
            .and_then(Value::as_str)
        {
            meta.model_name = model.to_string();
        }

        let text = data
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str);

        match text {
            Some(text) => (Some(text.to_string()), meta, None),
            None => (
                None,
                meta,
                Some((
                    ReasoningErrorKind::ParseError,
                    "provider response carried no candidate text".to_string(),
                )),
            ),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
