//! PatentDraft Core - Draft Document Types
//!
//! Pure data structures and functions shared by the cache and sync crates:
//! identities, draft documents, the content rebuilder and the error taxonomy.
//! Nothing in this crate performs I/O.

pub mod compose;
pub mod document;
pub mod error;
pub mod identity;

pub use compose::{compose_content, rebuild_or_empty};
pub use document::{upsert_document, DraftDocument, SectionMap, SectionType, SectionUpdate};
pub use error::{CacheError, ComposeError, ConfigError, DraftError, DraftResult, GatewayError};
pub use identity::{DocumentId, ProjectId, TenantId, PENDING_ID_PREFIX};

