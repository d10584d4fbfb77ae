pub mod gemini;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use gemini::{GeminiClient, GeminiConfig};

/// Raw image bytes plus the mime type they were produced or uploaded with.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> Result<Self, GatewayError> {
        let bytes = BASE64
            .decode(data.trim())
            .map_err(|err| GatewayError::InvalidResponse(format!("bad image encoding: {err}")))?;
        Ok(Self::new(mime_type, bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFields {
    pub title: String,
    pub description: String,
    pub price: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing inference credential")]
    MissingCredential,
    #[error("http error: {0}")]
    Http(String),
    #[error("HTTP {0}: {1}")]
    Status(u16, String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("composite failed: {0}")]
    CompositeFailed(String),
}

/// The three remote capabilities the studio depends on. Every call is a single
/// request with no retry; a failure is terminal for that call.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn extract_listing_fields(
        &self,
        image: &ImagePayload,
    ) -> Result<ListingFields, GatewayError>;

    async fn generate_background(&self, prompt: &str) -> Result<ImagePayload, GatewayError>;

    async fn composite_on_background(
        &self,
        foreground: &ImagePayload,
        background: &ImagePayload,
    ) -> Result<ImagePayload, GatewayError>;
}

/// Parses the `{title, description, price}` object a model returned, tolerating a
/// markdown code fence around it. Missing fields become empty strings.
pub fn parse_listing_fields(text: &str) -> Result<ListingFields, GatewayError> {
    let body = unwrap_code_fence(text.trim());
    let value: Value = serde_json::from_str(body).map_err(|err| {
        GatewayError::InvalidResponse(format!("listing fields are not json: {err}"))
    })?;
    let Value::Object(map) = value else {
        return Err(GatewayError::InvalidResponse(
            "listing fields must be a json object".into(),
        ));
    };
    Ok(ListingFields {
        title: field_text(&map, "title"),
        description: field_text(&map, "description"),
        price: field_text(&map, "price"),
    })
}

fn unwrap_code_fence(input: &str) -> &str {
    let Some(start) = input.find("```") else {
        return input;
    };
    let rest = &input[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    match rest.find("```") {
        Some(end) => {
            let inner = &rest[..end];
            inner.strip_suffix('\n').unwrap_or(inner)
        }
        None => input,
    }
}

fn field_text(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}
