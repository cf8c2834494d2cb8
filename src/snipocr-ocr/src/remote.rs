//! Remote recognition over an OCR.space-compatible HTTP API

use crate::adapter::RecognitionBackend;
use crate::aggregate::{ConfidenceReport, RawRecognition};
use crate::error::{OcrError, Result};
use crate::request::{EncodedImage, RecognitionOptions};
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Remote backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,

    /// API key; when empty, `OCR_SPACE_API_KEY` is read from the environment
    pub api_key: Option<String>,

    /// Engine/mode selector passed as `OCREngine`
    pub engine: u8,

    pub detect_orientation: bool,

    /// Ask the service to upscale small images
    pub scale_hint: bool,

    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            engine: 2,
            detect_orientation: true,
            scale_hint: true,
            timeout_secs: 30,
        }
    }
}

/// `ErrorMessage` is a string or a list of strings depending on the failure
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn joined(&self) -> String {
        match self {
            ErrorMessage::One(m) => m.clone(),
            ErrorMessage::Many(ms) => ms.join("; "),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    error_message: Option<ErrorMessage>,
    error_details: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
    /// Aggregate confidence, reported by some deployments
    mean_confidence: Option<f64>,
    text_overlay: Option<TextOverlay>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TextOverlay {
    #[serde(default)]
    lines: Vec<OverlayLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OverlayLine {
    #[serde(default)]
    words: Vec<OverlayWord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OverlayWord {
    confidence: Option<f64>,
}

pub struct RemoteBackend {
    client: reqwest::Client,
    config: RemoteConfig,
    api_key: String,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OCR_SPACE_API_KEY").ok())
            .ok_or_else(|| {
                OcrError::Configuration("no API key configured (set OCR_SPACE_API_KEY)".to_string())
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

    fn form(&self, image: &EncodedImage, options: &RecognitionOptions) -> Form {
        Form::new()
            .text("base64Image", image.to_data_url())
            .text("language", options.language.clone())
            .text("OCREngine", self.config.engine.to_string())
            .text("detectOrientation", self.config.detect_orientation.to_string())
            .text("scale", self.config.scale_hint.to_string())
            .text("isOverlayRequired", "true")
            .text("isTable", "false")
    }
}

#[async_trait]
impl RecognitionBackend for RemoteBackend {
    async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RawRecognition> {
        debug!("posting image to {}", self.config.endpoint);

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("apikey", &self.api_key)
            .multipart(self.form(image, options))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Network(format!(
                "recognition service returned HTTP {}",
                status
            )));
        }

        let body = response.text().await?;
        parse_response(&body)
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// Reduce a service response body to raw text and confidence
fn parse_response(body: &str) -> Result<RawRecognition> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| OcrError::Backend(format!("malformed response from recognition service: {}", e)))?;

    if response.is_errored_on_processing {
        let message = response
            .error_message
            .map(|m| m.joined())
            .or(response.error_details)
            .or_else(|| {
                response
                    .parsed_results
                    .iter()
                    .find_map(|r| r.error_message.clone())
                    .filter(|m| !m.is_empty())
            })
            .unwrap_or_else(|| "recognition service reported a processing error".to_string());
        return Err(OcrError::Backend(message));
    }

    let text = response
        .parsed_results
        .iter()
        .map(|r| r.parsed_text.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    let aggregates: Vec<f64> = response
        .parsed_results
        .iter()
        .filter_map(|r| r.mean_confidence)
        .collect();

    let confidence = if !aggregates.is_empty() {
        ConfidenceReport::Aggregate(aggregates.iter().sum::<f64>() / aggregates.len() as f64)
    } else {
        let words: Vec<f64> = response
            .parsed_results
            .iter()
            .filter_map(|r| r.text_overlay.as_ref())
            .flat_map(|o| o.lines.iter())
            .flat_map(|l| l.words.iter())
            .filter_map(|w| w.confidence)
            .collect();
        if words.is_empty() {
            ConfidenceReport::Absent
        } else {
            ConfidenceReport::PerToken(words)
        }
    };

    Ok(RawRecognition { text, confidence })
}
