//! Content rebuilder: turns a section map into one composed document.
//!
//! Composition is a pure function of the map. The map is ordered by section
//! rank, so the way it was built never changes the output. The same function
//! runs when hydrating from a server fetch and when recomputing content after
//! an optimistic edit.

use crate::document::{SectionMap, SectionType};
use crate::error::ComposeError;

const BLOCK_SEPARATOR: &str = "\n\n";

/// Compose a single document string from its sections.
///
/// The title is emitted as bare text; every other section is emitted as its
/// heading followed by a blank line and the trimmed section text. Blank
/// sections are skipped. An empty map composes to an empty string.
pub fn compose_content(sections: &SectionMap) -> Result<String, ComposeError> {
    let mut blocks = Vec::with_capacity(sections.len());
    for (section, text) in sections.iter() {
        if section.is_reserved() {
            return Err(ComposeError::ReservedSection(section));
        }
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match section {
            SectionType::Title => blocks.push(text.to_string()),
            _ => blocks.push(format!("{}{}{}", section.heading(), BLOCK_SEPARATOR, text)),
        }
    }
    Ok(blocks.join(BLOCK_SEPARATOR))
}

/// Compose, degrading to empty content when the map cannot be composed.
pub fn rebuild_or_empty(sections: &SectionMap) -> String {
    compose_content(sections).unwrap_or_else(|err| {
        tracing::warn!(error = %err, sections = sections.len(), "Content rebuild failed");
        String::new()
    })
}
