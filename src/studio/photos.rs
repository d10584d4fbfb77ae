use crate::gateway::ImagePayload;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_PHOTOS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(Uuid);

impl PhotoId {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PhotoId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A raw upload as the front end sends it: base64 bytes or a `data:` URL.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoUpload {
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhotoReadError {
    #[error("upload #{index} is not valid base64 image data")]
    Encoding { index: usize },
    #[error("upload #{index} has unsupported type `{mime}`")]
    UnsupportedType { index: usize, mime: String },
    #[error("upload #{index} is empty")]
    Empty { index: usize },
}

#[derive(Debug, Clone)]
pub struct Photo {
    pub id: PhotoId,
    pub original: ImagePayload,
    pub enhanced: Option<ImagePayload>,
    pub added_at: DateTime<Utc>,
}

impl Photo {
    fn new(original: ImagePayload) -> Self {
        Self {
            id: PhotoId::fresh(),
            original,
            enhanced: None,
            added_at: Utc::now(),
        }
    }

    pub fn is_enhanced(&self) -> bool {
        self.enhanced.is_some()
    }

    /// What a viewer should see: the enhanced image once it exists.
    pub fn display(&self) -> &ImagePayload {
        self.enhanced.as_ref().unwrap_or(&self.original)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoSummary {
    pub id: PhotoId,
    pub mime_type: String,
    pub bytes: usize,
    pub enhanced: bool,
    pub added_at: DateTime<Utc>,
}

impl From<&Photo> for PhotoSummary {
    fn from(photo: &Photo) -> Self {
        Self {
            id: photo.id,
            mime_type: photo.original.mime_type.clone(),
            bytes: photo.original.bytes.len(),
            enhanced: photo.is_enhanced(),
            added_at: photo.added_at,
        }
    }
}

/// Ordered photo list, never longer than [`MAX_PHOTOS`].
#[derive(Debug, Default)]
pub struct PhotoCollection {
    photos: Vec<Photo>,
}

impl PhotoCollection {
    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Photo> {
        self.photos.iter()
    }

    pub fn first(&self) -> Option<&Photo> {
        self.photos.first()
    }

    pub fn get(&self, id: PhotoId) -> Option<&Photo> {
        self.photos.iter().find(|photo| photo.id == id)
    }

    pub fn remaining_slots(&self) -> usize {
        MAX_PHOTOS.saturating_sub(self.photos.len())
    }

    pub fn enhanced_count(&self) -> usize {
        self.photos.iter().filter(|photo| photo.is_enhanced()).count()
    }

    /// Reads and appends uploads. Inputs past the remaining slots are dropped in
    /// order. Every kept upload is read before anything is committed, so a bad
    /// upload leaves the collection untouched.
    pub fn add(&mut self, uploads: &[PhotoUpload]) -> Result<Vec<PhotoId>, PhotoReadError> {
        let payloads = uploads
            .iter()
            .take(self.remaining_slots())
            .enumerate()
            .map(|(index, upload)| read_upload(index, upload))
            .collect::<Result<Vec<_>, _>>()?;

        let ids = payloads
            .into_iter()
            .map(|payload| {
                let photo = Photo::new(payload);
                let id = photo.id;
                self.photos.push(photo);
                id
            })
            .collect();
        Ok(ids)
    }

    pub fn remove(&mut self, id: PhotoId) -> bool {
        let before = self.photos.len();
        self.photos.retain(|photo| photo.id != id);
        self.photos.len() != before
    }

    /// Attaches an enhanced image. Returns false when the photo was removed in
    /// the meantime.
    pub fn set_enhanced(&mut self, id: PhotoId, payload: ImagePayload) -> bool {
        match self.photos.iter_mut().find(|photo| photo.id == id) {
            Some(photo) => {
                photo.enhanced = Some(payload);
                true
            }
            None => false,
        }
    }

    pub fn pending_enhancement(&self) -> Vec<(PhotoId, ImagePayload)> {
        self.photos
            .iter()
            .filter(|photo| !photo.is_enhanced())
            .map(|photo| (photo.id, photo.original.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.photos.clear();
    }
}

fn read_upload(index: usize, upload: &PhotoUpload) -> Result<ImagePayload, PhotoReadError> {
    let (declared, encoded) = match upload.data.trim().strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or(PhotoReadError::Encoding { index })?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or(PhotoReadError::Encoding { index })?;
            (Some(mime), body)
        }
        None => (None, upload.data.trim()),
    };

    let mime = upload
        .mime_type
        .as_deref()
        .or(declared)
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !mime.starts_with("image/") {
        return Err(PhotoReadError::UnsupportedType { index, mime });
    }

    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| PhotoReadError::Encoding { index })?;
    if bytes.is_empty() {
        return Err(PhotoReadError::Empty { index });
    }
    Ok(ImagePayload::new(mime, bytes))
}
