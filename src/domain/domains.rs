use serde::{Deserialize, Serialize};

/// A site domain assigned to a root document, used for routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i32,
    pub name: String,
    pub content_id: i32,
    pub culture: String,
    #[serde(default)]
    pub is_wildcard: bool,
    #[serde(default)]
    pub sort_order: i32,
}

impl Domain {
    pub fn new(id: i32, name: impl Into<String>, content_id: i32, culture: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            content_id,
            culture: culture.into(),
            is_wildcard: false,
            sort_order: 0,
        }
    }

    pub fn wildcard(mut self) -> Self {
        self.is_wildcard = true;
        self
    }
}
