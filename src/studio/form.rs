use crate::gateway::ListingFields;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub title: String,
    pub description: String,
    pub price: String,
}

impl ProductDetails {
    pub fn is_filled(&self) -> bool {
        !self.title.is_empty() && !self.description.is_empty() && !self.price.is_empty()
    }

    pub fn apply(&mut self, patch: DetailsPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
    }
}

impl From<ListingFields> for ProductDetails {
    fn from(fields: ListingFields) -> Self {
        Self {
            title: fields.title,
            description: fields.description,
            price: fields.price,
        }
    }
}

/// Field edits from the form; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailsPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

pub fn is_form_complete(photo_count: usize, enhanced_count: usize, details: &ProductDetails) -> bool {
    photo_count > 0 && enhanced_count == photo_count && details.is_filled()
}
