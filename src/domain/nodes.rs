//! Raw nodes as stored by the editorial repository.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::published::value::PropertyValues;

use super::types::ItemKind;

/// One version of a node's data (draft or published).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentData {
    pub name: String,
    /// Monotonic version id; two datas with the same version are identical.
    pub version: i64,
    #[serde(default)]
    pub values: PropertyValues,
}

impl ContentData {
    pub fn new(name: impl Into<String>, version: i64, values: PropertyValues) -> Self {
        Self {
            name: name.into(),
            version,
            values,
        }
    }
}

/// A node as loaded from the content, media or member repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: i32,
    pub key: Uuid,
    pub kind: ItemKind,
    #[serde(default)]
    pub parent_id: Option<i32>,
    #[serde(default)]
    pub sort_order: i32,
    pub content_type_id: i32,
    #[serde(default)]
    pub draft: Option<ContentData>,
    #[serde(default)]
    pub published: Option<ContentData>,
}

impl RawNode {
    pub fn new(id: i32, kind: ItemKind, content_type_id: i32) -> Self {
        Self {
            id,
            key: Uuid::new_v4(),
            kind,
            parent_id: None,
            sort_order: 0,
            content_type_id,
            draft: None,
            published: None,
        }
    }

    pub fn with_parent(mut self, parent_id: i32) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_published(mut self, data: ContentData) -> Self {
        self.published = Some(data);
        self
    }

    pub fn with_draft(mut self, data: ContentData) -> Self {
        self.draft = Some(data);
        self
    }

    pub fn is_published(&self) -> bool {
        self.published.is_some()
    }

    /// Data visible to a reader with the given previewing flag.
    pub fn data(&self, previewing: bool) -> Option<&ContentData> {
        if previewing {
            self.draft.as_ref().or(self.published.as_ref())
        } else {
            self.published.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preview_prefers_draft_and_falls_back_to_published() {
        let published = ContentData::new("Live", 1, PropertyValues::from([("title", json!("a"))]));
        let draft = ContentData::new("Edit", 2, PropertyValues::from([("title", json!("b"))]));
        let node = RawNode::new(1, ItemKind::Document, 10)
            .with_published(published.clone())
            .with_draft(draft.clone());

        assert_eq!(node.data(false), Some(&published));
        assert_eq!(node.data(true), Some(&draft));

        let unpublished = RawNode::new(2, ItemKind::Document, 10).with_draft(draft.clone());
        assert_eq!(unpublished.data(false), None);
        assert_eq!(unpublished.data(true), Some(&draft));

        let published_only = RawNode::new(3, ItemKind::Document, 10).with_published(published.clone());
        assert_eq!(published_only.data(true), Some(&published));
    }
}
