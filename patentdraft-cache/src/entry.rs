//! Cached values and the entries that wrap them.

use chrono::{DateTime, Utc};
use patentdraft_core::{rebuild_or_empty, DraftDocument, SectionMap};
use serde::{Deserialize, Serialize};

/// The composed-content view of a project's drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedContent {
    pub documents: Vec<DraftDocument>,
    pub content: String,
    pub has_content: bool,
}

impl ComposedContent {
    /// Build the view by rebuilding content from the document sections.
    pub fn rebuild(documents: Vec<DraftDocument>) -> Self {
        let content = rebuild_or_empty(&SectionMap::from_documents(&documents));
        Self::with_content(documents, content)
    }

    /// Build the view around an explicit content string.
    pub fn with_content(documents: Vec<DraftDocument>, content: String) -> Self {
        let has_content = !content.trim().is_empty();
        Self {
            documents,
            content,
            has_content,
        }
    }
}

/// A value held by the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Documents(Vec<DraftDocument>),
    Composed(ComposedContent),
    Document(Option<DraftDocument>),
    Exists(bool),
}

impl CacheValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Documents(_) => "documents",
            Self::Composed(_) => "composed",
            Self::Document(_) => "document",
            Self::Exists(_) => "exists",
        }
    }

    pub fn as_documents(&self) -> Option<&[DraftDocument]> {
        match self {
            Self::Documents(docs) => Some(docs),
            _ => None,
        }
    }

    pub fn as_composed(&self) -> Option<&ComposedContent> {
        match self {
            Self::Composed(composed) => Some(composed),
            _ => None,
        }
    }

    pub fn as_exists(&self) -> Option<bool> {
        match self {
            Self::Exists(flag) => Some(*flag),
            _ => None,
        }
    }
}

/// A cached value with the metadata needed to judge staleness.
///
/// Invalidation flags an entry without dropping its value, so readers can
/// still show the last known data while a refresh is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub cached_at: DateTime<Utc>,
    pub invalidated: bool,
}

impl CacheEntry {
    pub fn new(value: CacheValue) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            invalidated: false,
        }
    }

    /// Whether the entry can be served without a refresh.
    pub fn is_valid(&self) -> bool {
        !self.invalidated
    }
}
