//! HTTP client for the Gemini Generative Language API.
//!
//! Implements both [`ScriptSegmenter`] (structured JSON output from the text
//! model) and [`ImageGenerator`] (inline image output from the image model).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{PanelGenerationError, SegmentationError};
use crate::generation::image::{ImageGenerator, ImageRequest};
use crate::generation::segmentation::{
    parse_segmentation, segmentation_schema, ScriptSegmenter, Segmentation, SegmentationRequest,
};
use crate::storyboard::model::PanelImage;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] header::InvalidHeaderValue),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Response carried no candidate content")]
    MissingContent,
    #[error("No API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,
}

impl From<GeminiError> for SegmentationError {
    fn from(err: GeminiError) -> Self {
        match err {
            GeminiError::MissingContent => SegmentationError::malformed(err.to_string()),
            other => SegmentationError::upstream(other.to_string()),
        }
    }
}

impl From<GeminiError> for PanelGenerationError {
    fn from(err: GeminiError) -> Self {
        match err {
            GeminiError::MissingContent => PanelGenerationError::NoImage,
            other => PanelGenerationError::upstream(other.to_string()),
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads the key from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env() -> Result<Self, GeminiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GeminiError> {
        ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|name| lookup(name))
            .find(|key| !key.trim().is_empty())
            .map(Self::new)
            .ok_or(GeminiError::MissingApiKey)
    }

    /// Builder: Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: Set the segmentation model.
    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    /// Builder: Set the image model.
    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    /// Builder: Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }
}

fn segmentation_body(request: &SegmentationRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: Some(request.prompt()),
                inline_data: None,
            }],
        }],
        generation_config: GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(segmentation_schema()),
            image_config: None,
        },
    }
}

fn image_body(request: &ImageRequest) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(2);
    if let Some(reference) = &request.reference {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: reference.mime_type.clone(),
                data: reference.data.clone(),
            }),
        });
    }
    parts.push(Part {
        text: Some(request.instruction()),
        inline_data: None,
    });
    GenerateContentRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig {
            image_config: Some(ImageConfig {
                aspect_ratio: request.aspect_ratio.as_str().to_string(),
            }),
            ..Default::default()
        },
    }
}

/// Concatenated text parts of the first candidate.
fn extract_text(response: &GenerateContentResponse) -> Result<String, GeminiError> {
    let text: String = response
        .parts()
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    if text.is_empty() {
        return Err(GeminiError::MissingContent);
    }
    Ok(text)
}

/// First inline image part of the first candidate.
fn extract_image(response: &GenerateContentResponse) -> Result<PanelImage, PanelGenerationError> {
    let inline = response
        .parts()
        .iter()
        .find_map(|p| p.inline_data.as_ref())
        .ok_or(PanelGenerationError::NoImage)?;
    base64::engine::general_purpose::STANDARD
        .decode(&inline.data)
        .map_err(|e| PanelGenerationError::invalid_image(e.to_string()))?;
    let mime_type = if inline.mime_type.is_empty() {
        "image/png"
    } else {
        inline.mime_type.as_str()
    };
    Ok(PanelImage::new(mime_type, inline.data.clone()))
}

// =============================================================================
// CLIENT
// =============================================================================

/// API client for segmentation and panel image calls
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        if config.api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }
        let mut headers = header::HeaderMap::new();
        let mut key = header::HeaderValue::from_str(&config.api_key)?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let builder = Client::builder().default_headers(headers);
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(config.timeout);
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// POST {base}/models/{model}:generateContent
    async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let url = format!("{}/models/{}:generateContent", self.config.base_url, model);
        let resp = self.client.post(&url).json(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(GeminiError::Api { status, message });
        }

        resp.json().await.map_err(Into::into)
    }
}

#[async_trait]
impl ScriptSegmenter for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.text_model))]
    async fn segment(&self, request: &SegmentationRequest) -> Result<Segmentation, SegmentationError> {
        let response = self
            .generate_content(&self.config.text_model, &segmentation_body(request))
            .await?;
        let text = extract_text(&response)?;
        debug!(bytes = text.len(), "segmentation response received");
        parse_segmentation(&text)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.image_model, ratio = %request.aspect_ratio))]
    async fn generate(&self, request: &ImageRequest) -> Result<PanelImage, PanelGenerationError> {
        let response = self
            .generate_content(&self.config.image_model, &image_body(request))
            .await?;
        extract_image(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storyboard::model::{AspectRatio, StylePreset};
    use serde_json::json;

    fn response(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_config_defaults_and_builders() {
        let config = GeminiConfig::new("k")
            .with_base_url("http://localhost:8080/")
            .with_image_model("img")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(config.image_model, "img");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_lookup_falls_back_to_api_key() {
        let config = GeminiConfig::from_lookup(|name| match name {
            "API_KEY" => Some("fallback".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.api_key, "fallback");

        let config = GeminiConfig::from_lookup(|name| Some(format!("{name}-value"))).unwrap();
        assert_eq!(config.api_key, "GEMINI_API_KEY-value");

        assert!(matches!(
            GeminiConfig::from_lookup(|_| None),
            Err(GeminiError::MissingApiKey)
        ));
    }

    #[test]
    fn test_client_rejects_empty_key() {
        assert!(matches!(
            GeminiClient::new(GeminiConfig::new(" ")),
            Err(GeminiError::MissingApiKey)
        ));
    }

    #[test]
    fn test_segmentation_body_requests_json() {
        let request = SegmentationRequest::new("INT. ROOM", StylePreset::Sketch, "robot").unwrap();
        let body = serde_json::to_value(segmentation_body(&request)).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body["generationConfig"]["responseSchema"].is_object());
        assert!(body["generationConfig"].get("imageConfig").is_none());
        assert!(body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("STYLE PRESET: Sketch"));
    }

    #[test]
    fn test_image_body_without_reference() {
        let request = ImageRequest::new("wide shot", AspectRatio::Ultrawide);
        let body = serde_json::to_value(image_body(&request)).unwrap();
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
        assert_eq!(body["contents"][0]["parts"], json!([{ "text": "wide shot" }]));
    }

    #[test]
    fn test_image_body_with_reference_puts_image_first() {
        let request = ImageRequest::new("wide shot", AspectRatio::Portrait)
            .with_reference(Some(PanelImage::new("image/png", "QUJD")));
        let body = serde_json::to_value(image_body(&request)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "QUJD");
        assert!(parts[1]["text"].as_str().unwrap().starts_with("Referencing"));
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "9:16");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let resp = response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } }]
        }));
        assert_eq!(extract_text(&resp).unwrap(), "{\"a\":1}");
        assert!(matches!(
            extract_text(&response(json!({}))),
            Err(GeminiError::MissingContent)
        ));
    }

    #[test]
    fn test_extract_image_takes_first_inline_part() {
        let resp = response(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inlineData": { "mimeType": "image/png", "data": "QUJD" } },
                { "inlineData": { "mimeType": "image/jpeg", "data": "REVG" } }
            ] } }]
        }));
        let image = extract_image(&resp).unwrap();
        assert_eq!(image, PanelImage::new("image/png", "QUJD"));
    }

    #[test]
    fn test_extract_image_without_image_part() {
        let resp = response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }]
        }));
        let err = extract_image(&resp).unwrap_err();
        assert_eq!(err, PanelGenerationError::NoImage);
        assert_eq!(err.to_string(), "Failed to generate image part");
    }

    #[test]
    fn test_extract_image_rejects_bad_payload() {
        let resp = response(json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "!!not base64!!" } }
            ] } }]
        }));
        assert!(matches!(
            extract_image(&resp),
            Err(PanelGenerationError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_error_conversions() {
        let api = GeminiError::Api {
            status: 429,
            message: "quota".into(),
        };
        assert!(matches!(
            SegmentationError::from(api),
            SegmentationError::Upstream(_)
        ));
        assert_eq!(
            PanelGenerationError::from(GeminiError::MissingContent),
            PanelGenerationError::NoImage
        );
    }
}
