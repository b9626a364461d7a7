//! Draft document entities and section bookkeeping

use crate::error::ComposeError;
use crate::identity::{DocumentId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of a draft section.
///
/// Variants are declared in canonical composition order, so the derived
/// `Ord` is the order sections appear in a composed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionType {
    Title,
    FieldOfInvention,
    Background,
    Summary,
    BriefDescriptionOfDrawings,
    DetailedDescription,
    Claims,
    Abstract,
    /// Reserved composite of every other section. Never composed from.
    FullContent,
}

impl SectionType {
    /// Every composable section, in canonical order.
    pub const SECTIONS: [SectionType; 8] = [
        SectionType::Title,
        SectionType::FieldOfInvention,
        SectionType::Background,
        SectionType::Summary,
        SectionType::BriefDescriptionOfDrawings,
        SectionType::DetailedDescription,
        SectionType::Claims,
        SectionType::Abstract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "TITLE",
            Self::FieldOfInvention => "FIELD_OF_INVENTION",
            Self::Background => "BACKGROUND",
            Self::Summary => "SUMMARY",
            Self::BriefDescriptionOfDrawings => "BRIEF_DESCRIPTION_OF_DRAWINGS",
            Self::DetailedDescription => "DETAILED_DESCRIPTION",
            Self::Claims => "CLAIMS",
            Self::Abstract => "ABSTRACT",
            Self::FullContent => "FULL_CONTENT",
        }
    }

    /// Heading printed above the section in a composed document.
    pub fn heading(&self) -> &'static str {
        match self {
            Self::Title => "TITLE",
            Self::FieldOfInvention => "FIELD OF THE INVENTION",
            Self::Background => "BACKGROUND",
            Self::Summary => "SUMMARY",
            Self::BriefDescriptionOfDrawings => "BRIEF DESCRIPTION OF THE DRAWINGS",
            Self::DetailedDescription => "DETAILED DESCRIPTION",
            Self::Claims => "CLAIMS",
            Self::Abstract => "ABSTRACT",
            Self::FullContent => "FULL CONTENT",
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::FullContent)
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionType {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        SectionType::SECTIONS
            .iter()
            .chain(std::iter::once(&SectionType::FullContent))
            .find(|section| section.as_str() == normalized)
            .copied()
            .ok_or_else(|| ComposeError::UnknownSection(s.to_string()))
    }
}

/// A persisted section of a patent application draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftDocument {
    pub id: DocumentId,
    pub project_id: ProjectId,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftDocument {
    /// Build an unconfirmed document carrying a synthetic id.
    pub fn pending(
        project_id: ProjectId,
        section_type: SectionType,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::pending(),
            project_id,
            section_type,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }
}

/// A requested change to one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionUpdate {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub content: String,
}

impl SectionUpdate {
    pub fn new(section_type: SectionType, content: impl Into<String>) -> Self {
        Self {
            section_type,
            content: content.into(),
        }
    }
}

/// Section type to section text, ordered canonically regardless of how it
/// was built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionMap(BTreeMap<SectionType, String>);

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the composable sections of a document list.
    ///
    /// `FullContent` is skipped. When a type appears more than once the most
    /// recently updated document wins; equal timestamps fall back to list
    /// order.
    pub fn from_documents(documents: &[DraftDocument]) -> Self {
        let mut latest: BTreeMap<SectionType, &DraftDocument> = BTreeMap::new();
        for doc in documents.iter().filter(|d| !d.section_type.is_reserved()) {
            let newer = latest
                .get(&doc.section_type)
                .map_or(true, |existing| existing.updated_at <= doc.updated_at);
            if newer {
                latest.insert(doc.section_type, doc);
            }
        }
        Self(
            latest
                .into_iter()
                .map(|(section, doc)| (section, doc.content.clone()))
                .collect(),
        )
    }

    pub fn insert(&mut self, section: SectionType, text: impl Into<String>) -> Option<String> {
        self.0.insert(section, text.into())
    }

    pub fn get(&self, section: SectionType) -> Option<&str> {
        self.0.get(&section).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionType, &str)> {
        self.0.iter().map(|(section, text)| (*section, text.as_str()))
    }
}

impl FromIterator<(SectionType, String)> for SectionMap {
    fn from_iter<I: IntoIterator<Item = (SectionType, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Insert `document` into `documents`, replacing any document of the same
/// section type.
pub fn upsert_document(documents: &mut Vec<DraftDocument>, document: DraftDocument) {
    match documents
        .iter_mut()
        .find(|existing| existing.section_type == document.section_type)
    {
        Some(existing) => *existing = document,
        None => documents.push(document),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn doc(project: ProjectId, section: SectionType, content: &str) -> DraftDocument {
        let now = Utc::now();
        DraftDocument {
            id: DocumentId::Confirmed(uuid::Uuid::now_v7()),
            project_id: project,
            section_type: section,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_section_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&SectionType::BriefDescriptionOfDrawings).unwrap(),
            "\"BRIEF_DESCRIPTION_OF_DRAWINGS\""
        );
        assert_eq!(
            serde_json::from_str::<SectionType>("\"FULL_CONTENT\"").unwrap(),
            SectionType::FullContent
        );
        assert!(serde_json::from_str::<SectionType>("\"PREAMBLE\"").is_err());
    }

    #[test]
    fn test_section_type_from_str_is_lenient_on_case() {
        assert_eq!("claims".parse::<SectionType>().unwrap(), SectionType::Claims);
        assert_eq!(
            "field-of-invention".parse::<SectionType>().unwrap(),
            SectionType::FieldOfInvention
        );
        assert_eq!(
            "preamble".parse::<SectionType>(),
            Err(ComposeError::UnknownSection("preamble".to_string()))
        );
    }

    #[test]
    fn test_draft_document_json_shape() {
        let project = ProjectId::now_v7();
        let document = doc(project, SectionType::Claims, "A claim.");
        let value = serde_json::to_value(&document).unwrap();

        assert_eq!(value["type"], "CLAIMS");
        assert_eq!(value["projectId"], project.to_string());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn test_section_map_skips_full_content_and_prefers_latest() {
        let project = ProjectId::now_v7();
        let mut older = doc(project, SectionType::Claims, "old");
        older.updated_at = Utc::now() - Duration::seconds(30);
        let newer = doc(project, SectionType::Claims, "new");
        let full = doc(project, SectionType::FullContent, "everything");

        let map = SectionMap::from_documents(&[newer, older, full]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(SectionType::Claims), Some("new"));
        assert_eq!(map.get(SectionType::FullContent), None);
    }

    #[test]
    fn test_upsert_replaces_by_type() {
        let project = ProjectId::now_v7();
        let mut docs = vec![
            doc(project, SectionType::Claims, "A claim."),
            doc(project, SectionType::Summary, "A summary."),
        ];
        upsert_document(&mut docs, doc(project, SectionType::Claims, "An amended claim."));
        upsert_document(&mut docs, doc(project, SectionType::Abstract, "An abstract."));

        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].content, "An amended claim.");
        assert_eq!(docs[2].section_type, SectionType::Abstract);
    }
}
