//! Remote generation client
//!
//! [`ImageGenerator`] is the seam the orchestration layer talks to.
//! [`GeminiGenerator`] implements it against a `generateContent` endpoint
//! that accepts inline images and answers with inline image parts.

use crate::codec::{EncodedImage, MediaType};
use crate::error::{RemoteError, Result};
use crate::prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One try-on generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Photo of the person
    pub base: EncodedImage,
    /// Optional outfit image
    pub reference: Option<EncodedImage>,
    /// Outfit description, may be empty when a reference is present
    pub instruction: String,
    /// Ask for a creative reinterpretation instead of a literal repeat
    pub variation: bool,
}

/// Backend producing try-on and enhanced images
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one composite image
    async fn generate(&self, request: &GenerationRequest) -> Result<EncodedImage>;

    /// Enhance (upscale) an already generated image
    async fn enhance(&self, image: &EncodedImage) -> Result<EncodedImage>;
}

/// Connection settings for [`GeminiGenerator`]
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash-image-preview".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// HTTP client for a Gemini-style image model
pub struct GeminiGenerator {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn call(&self, body: &GenerateContentRequest) -> Result<EncodedImage> {
        let mut request = self.client.post(self.url()).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(service_error(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        extract_image(parsed)
    }
}

#[async_trait]
impl ImageGenerator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<EncodedImage> {
        if request.reference.is_none() && request.instruction.trim().is_empty() {
            return Err(RemoteError::InvalidRequest(
                "an outfit image or description is required".into(),
            ));
        }

        tracing::debug!(
            model = %self.config.model,
            reference = request.reference.is_some(),
            variation = request.variation,
            "requesting try-on generation"
        );

        let mut parts = vec![Part::image(&request.base)];
        if let Some(reference) = &request.reference {
            parts.push(Part::image(reference));
        }
        parts.push(Part::text(prompt::try_on(
            &request.instruction,
            request.reference.is_some(),
            request.variation,
        )));

        self.call(&GenerateContentRequest::new(parts)).await
    }

    async fn enhance(&self, image: &EncodedImage) -> Result<EncodedImage> {
        tracing::debug!(model = %self.config.model, "requesting enhance");

        let parts = vec![Part::image(image), Part::text(prompt::enhance())];
        self.call(&GenerateContentRequest::new(parts)).await
    }
}

/// Pull the generated image out of a response.
///
/// Generated images are always treated as PNG, whatever the input type was.
fn extract_image(response: GenerateContentResponse) -> Result<EncodedImage> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    if let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref()) {
        if !inline.data.is_empty() {
            return Ok(EncodedImage::from_base64(inline.data.as_str(), MediaType::Png));
        }
    }

    if let Some(text) = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .find(|t| !t.trim().is_empty())
    {
        return Err(RemoteError::Explanation(text.to_string()));
    }

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(RemoteError::Explanation(format!("request blocked: {reason}")));
    }

    Err(RemoteError::NoImage)
}

fn service_error(status: u16, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    RemoteError::Service { status, message }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn new(parts: Vec<Part>) -> Self {
        Self {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".to_string(), "TEXT".to_string()],
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn image(image: &EncodedImage) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: image.media_type().mime().to_string(),
                data: image.data().to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
