use super::{GatewayError, ImagePayload, InferenceGateway, ListingFields, parse_listing_fields};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use serde_with::skip_serializing_none;
use urlencoding::encode;

const EXTRACT_INSTRUCTION: &str = "Analyze this product image. Provide a creative, concise title, a detailed description (mentioning potential materials, style, and use), and a suggested price in USD. Format the output as JSON.";

const COMPOSITE_INSTRUCTION: &str = "Your task is to replace the original background of the first image (the product) with the second image (the studio background). The final image should only contain the product seamlessly placed on the new background. Preserve the product's natural shadows and lighting. Do not add any extra elements.";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub text_model: String,
    pub image_model: String,
    pub imagen_model: String,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self {
            api_base: std::env::var("GEMINI_API_BASE")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            text_model: std::env::var("GEMINI_TEXT_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".into()),
            image_model: std::env::var("GEMINI_IMAGE_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-image-preview".into()),
            imagen_model: std::env::var("IMAGEN_MODEL")
                .unwrap_or_else(|_| "imagen-4.0-generate-001".into()),
        }
    }
}

pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{method}",
            self.config.api_base.trim_end_matches('/'),
            encode(model)
        )
    }

    async fn post<B, R>(&self, url: String, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GatewayError::MissingCredential)?;

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|err| GatewayError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        response
            .json()
            .await
            .map_err(|err| GatewayError::InvalidResponse(err.to_string()))
    }
}

const MAX_ERROR_BODY: usize = 512;

fn status_error(status: u16, body: &str) -> GatewayError {
    let body = body.trim();
    let detail = match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    };
    GatewayError::Status(status, detail)
}

#[async_trait]
impl InferenceGateway for GeminiClient {
    async fn extract_listing_fields(
        &self,
        image: &ImagePayload,
    ) -> Result<ListingFields, GatewayError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user(vec![
                Part::inline(image),
                Part::text(EXTRACT_INSTRUCTION),
            ])],
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".into()),
                response_schema: Some(listing_schema()),
                response_modalities: None,
            }),
        };
        let url = self.endpoint(&self.config.text_model, "generateContent");
        let response: GenerateContentResponse = self.post(url, &body).await?;
        let text = response.text().ok_or_else(|| {
            GatewayError::InvalidResponse("missing text in listing response".into())
        })?;
        parse_listing_fields(&text)
    }

    async fn generate_background(&self, prompt: &str) -> Result<ImagePayload, GatewayError> {
        let body = PredictRequest {
            instances: vec![PredictInstance {
                prompt: background_prompt(prompt),
            }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio: "1:1",
                output_options: OutputOptions {
                    mime_type: "image/jpeg",
                },
            },
        };
        let url = self.endpoint(&self.config.imagen_model, "predict");
        let response: PredictResponse = self.post(url, &body).await?;
        let prediction = response
            .predictions
            .into_iter()
            .find(|prediction| prediction.bytes_base64_encoded.is_some())
            .ok_or_else(|| GatewayError::GenerationFailed("no image returned".into()))?;
        let mime = prediction
            .mime_type
            .unwrap_or_else(|| "image/jpeg".to_string());
        ImagePayload::from_base64(mime, prediction.bytes_base64_encoded.as_deref().unwrap_or(""))
    }

    async fn composite_on_background(
        &self,
        foreground: &ImagePayload,
        background: &ImagePayload,
    ) -> Result<ImagePayload, GatewayError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user(vec![
                Part::inline(foreground),
                Part::inline(background),
                Part::text(COMPOSITE_INSTRUCTION),
            ])],
            generation_config: Some(GenerationConfig {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["IMAGE".into(), "TEXT".into()]),
            }),
        };
        let url = self.endpoint(&self.config.image_model, "generateContent");
        let response: GenerateContentResponse = self.post(url, &body).await?;
        let inline = response
            .first_inline_image()
            .ok_or_else(|| GatewayError::CompositeFailed("no image part returned".into()))?;
        ImagePayload::from_base64(inline.mime_type.clone(), &inline.data)
    }
}

fn background_prompt(prompt: &str) -> String {
    format!(
        "A professional, high-quality studio photography background: {prompt}. Centered, clean, photorealistic."
    )
}

fn listing_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "description": { "type": "STRING" },
            "price": { "type": "STRING" },
        },
    })
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: Option<GenerationConfig>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: Option<String>,
    response_schema: Option<Value>,
    response_modalities: Option<Vec<String>>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize)]
struct Content {
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".into()),
            parts,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    fn inline(image: &ImagePayload) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: image.mime_type.clone(),
                data: image.to_base64(),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    fn text(&self) -> Option<String> {
        let text: String = self
            .parts()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn first_inline_image(&self) -> Option<&InlineData> {
        self.parts().find_map(|part| part.inline_data.as_ref())
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance {
    prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    aspect_ratio: &'static str,
    output_options: OutputOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputOptions {
    mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}
