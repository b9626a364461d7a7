//! Identity types for draft documents and their owners

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix that marks a client-minted document id awaiting server assignment.
pub const PENDING_ID_PREFIX: &str = "temp-";

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub const fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Mint a fresh timestamp-sortable id.
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_newtype!(
    /// Tenant that owns a project. Every cache key carries one.
    TenantId
);

uuid_newtype!(
    /// Project (invention) whose draft documents are being synchronized.
    ProjectId
);

/// Identifier of a draft document.
///
/// Documents created optimistically on the client carry a `Pending` id until
/// the server confirms them and hands back its own id. On the wire a pending
/// id is rendered as `temp-<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentId {
    Confirmed(Uuid),
    Pending(Uuid),
}

impl DocumentId {
    /// Mint a synthetic id for an unconfirmed document.
    pub fn pending() -> Self {
        Self::Pending(Uuid::now_v7())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn as_uuid(&self) -> Uuid {
        match self {
            Self::Confirmed(id) | Self::Pending(id) => *id,
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{}", id),
            Self::Pending(id) => write!(f, "{}{}", PENDING_ID_PREFIX, id),
        }
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(PENDING_ID_PREFIX) {
            Some(rest) => Uuid::parse_str(rest).map(Self::Pending),
            None => Uuid::parse_str(s).map(Self::Confirmed),
        }
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_id_renders_with_prefix() {
        let id = DocumentId::pending();
        assert!(id.is_pending());
        assert!(id.to_string().starts_with(PENDING_ID_PREFIX));
    }

    #[test]
    fn test_document_id_parses_both_forms() {
        let uuid = Uuid::now_v7();
        let confirmed: DocumentId = uuid.to_string().parse().unwrap();
        let pending: DocumentId = format!("temp-{}", uuid).parse().unwrap();

        assert_eq!(confirmed, DocumentId::Confirmed(uuid));
        assert_eq!(pending, DocumentId::Pending(uuid));
        assert_ne!(confirmed, pending);
    }

    #[test]
    fn test_document_id_serde_uses_string_form() {
        let id = DocumentId::Pending(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"temp-00000000-0000-0000-0000-000000000000\"");

        let back: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_malformed_document_id_is_rejected() {
        assert!("temp-not-a-uuid".parse::<DocumentId>().is_err());
        assert!(serde_json::from_str::<DocumentId>("\"nope\"").is_err());
    }

    #[test]
    fn test_project_id_is_transparent_in_json() {
        let project = ProjectId::new(Uuid::nil());
        assert_eq!(
            serde_json::to_string(&project).unwrap(),
            "\"00000000-0000-0000-0000-000000000000\""
        );
    }
}
