use crate::gateway::ImagePayload;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_SEED_PROMPT: &str = "A clean, neutral, professional studio background for product photography, light gray with soft, diffused lighting.";

const PLACEHOLDER_PROMPT: &str = "Generating initial background...";
pub const SEEDED_PROMPT: &str = "Neutral Studio Background";
pub const FALLBACK_PROMPT: &str = "Error: Using fallback background";

static PLACEHOLDER_IMAGE: Lazy<ImagePayload> = Lazy::new(|| {
    ImagePayload::new(
        "image/png",
        include_bytes!("../../assets/placeholder_background.png").to_vec(),
    )
});

static FALLBACK_IMAGE: Lazy<ImagePayload> = Lazy::new(|| {
    ImagePayload::new(
        "image/png",
        include_bytes!("../../assets/fallback_background.png").to_vec(),
    )
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackgroundId {
    Default,
    Custom(Uuid),
}

#[derive(Debug, Error)]
#[error("unknown background id `{0}`")]
pub struct BackgroundIdError(String);

impl fmt::Display for BackgroundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundId::Default => f.write_str("default"),
            BackgroundId::Custom(id) => id.fmt(f),
        }
    }
}

impl FromStr for BackgroundId {
    type Err = BackgroundIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("default") {
            return Ok(BackgroundId::Default);
        }
        Uuid::parse_str(trimmed)
            .map(BackgroundId::Custom)
            .map_err(|_| BackgroundIdError(trimmed.to_string()))
    }
}

impl TryFrom<String> for BackgroundId {
    type Error = BackgroundIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackgroundId> for String {
    fn from(value: BackgroundId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Background {
    pub id: BackgroundId,
    pub image: ImagePayload,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl Background {
    fn new(id: BackgroundId, image: ImagePayload, prompt: impl Into<String>) -> Self {
        Self {
            id,
            image,
            prompt: prompt.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == BackgroundId::Default
    }

    pub fn summary(&self, selected: bool) -> BackgroundSummary {
        BackgroundSummary {
            id: self.id,
            prompt: self.prompt.clone(),
            is_default: self.is_default(),
            selected,
            mime_type: self.image.mime_type.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundSummary {
    pub id: BackgroundId,
    pub prompt: String,
    pub is_default: bool,
    pub selected: bool,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// The default background plus user-generated ones. The default slot always
/// exists; selection is stored as given and resolved on read.
#[derive(Debug)]
pub struct BackgroundCatalog {
    default: Background,
    custom: Vec<Background>,
    selected: BackgroundId,
}

impl Default for BackgroundCatalog {
    fn default() -> Self {
        Self {
            default: Background::new(
                BackgroundId::Default,
                PLACEHOLDER_IMAGE.clone(),
                PLACEHOLDER_PROMPT,
            ),
            custom: Vec::new(),
            selected: BackgroundId::Default,
        }
    }
}

impl BackgroundCatalog {
    pub fn iter(&self) -> impl Iterator<Item = &Background> {
        std::iter::once(&self.default).chain(self.custom.iter())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        1 + self.custom.len()
    }

    pub fn get(&self, id: BackgroundId) -> Option<&Background> {
        self.iter().find(|background| background.id == id)
    }

    #[cfg(test)]
    pub fn selected_id(&self) -> BackgroundId {
        self.selected
    }

    /// The active background, falling back to the default when the stored
    /// selection no longer resolves.
    pub fn selected(&self) -> &Background {
        self.get(self.selected).unwrap_or(&self.default)
    }

    pub fn select(&mut self, id: BackgroundId) {
        self.selected = id;
    }

    pub fn reset_selection(&mut self) {
        self.selected = BackgroundId::Default;
    }

    pub fn replace_default(&mut self, image: ImagePayload, prompt: &str) {
        self.default = Background::new(BackgroundId::Default, image, prompt);
    }

    pub fn install_fallback_default(&mut self) {
        self.replace_default(FALLBACK_IMAGE.clone(), FALLBACK_PROMPT);
    }

    /// Appends a custom background and makes it the selection.
    pub fn insert_custom(&mut self, image: ImagePayload, prompt: impl Into<String>) -> BackgroundId {
        let id = BackgroundId::Custom(Uuid::new_v4());
        self.custom.push(Background::new(id, image, prompt));
        self.selected = id;
        id
    }

    /// Removes a custom background. The default cannot be deleted.
    pub fn delete(&mut self, id: BackgroundId) -> bool {
        if id == BackgroundId::Default {
            return false;
        }
        let before = self.custom.len();
        self.custom.retain(|background| background.id != id);
        let removed = self.custom.len() != before;
        if removed && self.selected == id {
            self.selected = BackgroundId::Default;
        }
        removed
    }

    pub fn summaries(&self) -> Vec<BackgroundSummary> {
        let active = self.selected().id;
        self.iter()
            .map(|background| background.summary(background.id == active))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> ImagePayload {
        ImagePayload::new("image/jpeg", tag.as_bytes().to_vec())
    }

    #[test]
    fn starts_with_placeholder_default_selected() {
        let catalog = BackgroundCatalog::default();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.selected_id(), BackgroundId::Default);
        assert!(catalog.selected().is_default());
        assert_eq!(catalog.selected().prompt, PLACEHOLDER_PROMPT);
        assert!(!catalog.selected().image.bytes.is_empty());
    }

    #[test]
    fn replacing_default_keeps_a_single_default() {
        let mut catalog = BackgroundCatalog::default();
        catalog.insert_custom(image("a"), "red");
        catalog.replace_default(image("seed"), SEEDED_PROMPT);
        catalog.install_fallback_default();
        let defaults = catalog.iter().filter(|bg| bg.is_default()).count();
        assert_eq!(defaults, 1);
        assert_eq!(catalog.len(), 2);
        let default = catalog.get(BackgroundId::Default).expect("default");
        assert_eq!(default.prompt, FALLBACK_PROMPT);
    }

    #[test]
    fn insert_custom_selects_it() {
        let mut catalog = BackgroundCatalog::default();
        let id = catalog.insert_custom(image("a"), "black velvet");
        assert_eq!(catalog.selected_id(), id);
        assert_eq!(catalog.selected().prompt, "black velvet");
    }

    #[test]
    fn deleting_selected_background_reverts_to_default() {
        let mut catalog = BackgroundCatalog::default();
        let id = catalog.insert_custom(image("a"), "a");
        assert!(catalog.delete(id));
        assert_eq!(catalog.selected_id(), BackgroundId::Default);
        assert!(catalog.get(id).is_none());
    }

    #[test]
    fn deleting_unselected_background_keeps_selection() {
        let mut catalog = BackgroundCatalog::default();
        let first = catalog.insert_custom(image("a"), "a");
        let second = catalog.insert_custom(image("b"), "b");
        assert!(catalog.delete(first));
        assert_eq!(catalog.selected_id(), second);
    }

    #[test]
    fn default_cannot_be_deleted() {
        let mut catalog = BackgroundCatalog::default();
        assert!(!catalog.delete(BackgroundId::Default));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn unknown_selection_resolves_to_default_on_read() {
        let mut catalog = BackgroundCatalog::default();
        let dangling = BackgroundId::Custom(Uuid::new_v4());
        catalog.select(dangling);
        assert_eq!(catalog.selected_id(), dangling);
        assert!(catalog.selected().is_default());
        let summaries = catalog.summaries();
        assert!(summaries[0].selected);
    }

    #[test]
    fn ids_round_trip_through_strings() {
        assert_eq!("default".parse::<BackgroundId>().ok(), Some(BackgroundId::Default));
        let id = BackgroundId::Custom(Uuid::new_v4());
        assert_eq!(id.to_string().parse::<BackgroundId>().ok(), Some(id));
        assert!("not-an-id".parse::<BackgroundId>().is_err());
        assert_eq!(
            serde_json::to_value(BackgroundId::Default).expect("json"),
            serde_json::json!("default")
        );
    }
}
