use super::{form::ProductDetails, photos::PhotoCollection};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Editing,
    Viewing,
}

impl ViewMode {
    /// Moves to the product view only when the form is complete.
    pub fn publish(self, form_complete: bool) -> Self {
        if form_complete { ViewMode::Viewing } else { self }
    }

    pub fn back(self) -> Self {
        ViewMode::Editing
    }
}

/// Read-only product page: one display image per photo, enhanced when available.
#[derive(Debug, Clone, Serialize)]
pub struct ProductPage {
    pub photos: Vec<String>,
    pub title: String,
    pub description: String,
    pub price: String,
}

impl ProductPage {
    pub fn render(photos: &PhotoCollection, details: &ProductDetails) -> Self {
        Self {
            photos: photos
                .iter()
                .map(|photo| photo.display().to_data_url())
                .collect(),
            title: details.title.clone(),
            description: details.description.clone(),
            price: details.price.clone(),
        }
    }
}
