use crate::studio::{
    backgrounds::BackgroundSummary,
    photos::{PhotoId, PhotoUpload},
    StudioSnapshot,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct AddPhotosRequest {
    pub photos: Vec<PhotoUpload>,
}

#[derive(Debug, Serialize)]
pub struct AddPhotosResponse {
    pub added: Vec<PhotoId>,
    pub studio: StudioSnapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBackgroundRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectBackgroundRequest {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct BackgroundsResponse {
    pub backgrounds: Vec<BackgroundSummary>,
    pub selected: BackgroundSummary,
    pub generating: bool,
    pub default_ready: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageVariant {
    /// Enhanced payload when present, otherwise the original.
    #[default]
    Display,
    Original,
    Enhanced,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub variant: ImageVariant,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
