//! Vision chat-completions backend (OpenAI-compatible, OpenRouter by default)
//!
//! The model is asked for a strict JSON object `{"text", "confidence"}` with
//! confidence in 0..1, which is rescaled to 0..100.

use crate::adapter::RecognitionBackend;
use crate::aggregate::{ConfidenceReport, RawRecognition};
use crate::error::{OcrError, Result};
use crate::request::{EncodedImage, RecognitionOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are an OCR assistant. You transcribe text from images exactly.";

/// Chat backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,

    /// API key; when empty, `OPENROUTER_API_KEY` is read from the environment
    pub api_key: Option<String>,

    /// Sent as `X-Title`
    pub app_title: String,

    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            app_title: "snipocr".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<CompletionError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
    confidence: Option<f64>,
}

pub struct ChatBackend {
    client: reqwest::Client,
    config: ChatConfig,
    api_key: String,
}

impl ChatBackend {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .ok_or_else(|| {
                OcrError::Configuration("no API key configured (set OPENROUTER_API_KEY)".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OcrError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn payload(&self, image: &EncodedImage, options: &RecognitionOptions) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": instruction(options) },
                        { "type": "image_url", "image_url": { "url": image.to_data_url() } }
                    ]
                }
            ],
            "temperature": 0,
            "response_format": { "type": "json_object" }
        })
    }
}

fn instruction(options: &RecognitionOptions) -> String {
    let mut text = String::from("Extract the text in this image exactly as-is.");
    if options.single_line_hint {
        text.push_str(" It is a single line.");
    }
    if let Some(whitelist) = options.charset_whitelist.as_deref().filter(|w| !w.is_empty()) {
        text.push_str(&format!(" Only these characters can appear: {}.", whitelist));
    }
    text.push_str(&format!(" Language code: {}.", options.language));
    text.push_str(
        " Return a strict JSON object with keys 'text' (string) and 'confidence' (float 0-1). No extra commentary.",
    );
    text
}

#[async_trait]
impl RecognitionBackend for ChatBackend {
    async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RawRecognition> {
        debug!("requesting transcription from {}", self.config.model);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", &self.config.app_title)
            .json(&self.payload(image, options))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Network(format!(
                "chat completion returned HTTP {}",
                status
            )));
        }

        let body = response.text().await?;
        parse_completion(&body)
    }

    fn name(&self) -> &str {
        "chat"
    }
}

fn parse_completion(body: &str) -> Result<RawRecognition> {
    let completion: Completion = serde_json::from_str(body)
        .map_err(|e| OcrError::Backend(format!("malformed chat completion: {}", e)))?;

    if let Some(error) = completion.error {
        return Err(OcrError::Backend(error.message));
    }

    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    match serde_json::from_str::<Transcription>(&content) {
        Ok(t) => Ok(RawRecognition {
            text: t.text,
            confidence: t
                .confidence
                .map(|c| ConfidenceReport::Aggregate(c * 100.0))
                .unwrap_or(ConfidenceReport::Absent),
        }),
        Err(e) => {
            warn!("model did not return the requested JSON: {}", e);
            Ok(RawRecognition {
                text: String::new(),
                confidence: ConfidenceReport::Aggregate(0.0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices": [{"message": {"role": "assistant",
            "content": "{\"text\": \"X7KQ2\", \"confidence\": 0.75}"}}]}"#;
        let raw = parse_completion(body).unwrap();
        assert_eq!(raw.text, "X7KQ2");
        assert_eq!(raw.confidence, ConfidenceReport::Aggregate(75.0));
    }

    #[test]
    fn test_non_json_content_yields_empty_result() {
        let body = r#"{"choices": [{"message": {"content": "The text says hello"}}]}"#;
        let raw = parse_completion(body).unwrap();
        assert_eq!(raw.text, "");
        assert_eq!(raw.confidence.resolve(), 0.0);
    }

    #[test]
    fn test_provider_error_is_backend_error() {
        let body = r#"{"error": {"message": "No endpoints found that support image input", "code": 404}}"#;
        let err = parse_completion(body).unwrap_err();
        assert_eq!(err.to_string(), "No endpoints found that support image input");
    }

    #[test]
    fn test_instruction_mentions_hints() {
        let options = RecognitionOptions {
            charset_whitelist: Some("0123456789".to_string()),
            single_line_hint: true,
            ..Default::default()
        };
        let text = instruction(&options);
        assert!(text.contains("single line"));
        assert!(text.contains("0123456789"));
    }
}
