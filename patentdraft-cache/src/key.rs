//! Cache key registry for project-scoped draft views.
//!
//! A `DraftCacheKey` can only be built through constructors that take both a
//! tenant and a project, so a key that leaks across tenants cannot be
//! written. Keys built from the same logical parameters compare and hash
//! equal regardless of which constructor produced them.

use patentdraft_core::{ProjectId, SectionType, TenantId};
use std::fmt;

/// The view of a project's drafts a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DraftView {
    /// The ordered document list. `skip_init` selects the list variant that
    /// is fetched without server-side section initialization.
    List { skip_init: bool },
    /// The composed-content view derived from the list.
    WithContent { skip_init: bool },
    /// A single section.
    ByType(SectionType),
    /// The lightweight "has any drafts" flag.
    Exists,
}

/// A cache key scoped to one tenant and one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DraftCacheKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    tenant_id: TenantId,
    project_id: ProjectId,
    view: DraftView,
}

impl DraftCacheKey {
    fn new(tenant_id: TenantId, project_id: ProjectId, view: DraftView) -> Self {
        Self {
            inner: KeyInner {
                tenant_id,
                project_id,
                view,
            },
        }
    }

    /// Base document list.
    pub fn list(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self::new(tenant_id, project_id, DraftView::List { skip_init: false })
    }

    /// Document list fetched without section initialization.
    pub fn list_skip_init(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self::new(tenant_id, project_id, DraftView::List { skip_init: true })
    }

    /// Composed-content view.
    pub fn with_content(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self::new(tenant_id, project_id, DraftView::WithContent { skip_init: false })
    }

    /// Composed-content view over the skip-init list.
    pub fn with_content_skip_init(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self::new(tenant_id, project_id, DraftView::WithContent { skip_init: true })
    }

    pub fn by_type(tenant_id: TenantId, project_id: ProjectId, section: SectionType) -> Self {
        Self::new(tenant_id, project_id, DraftView::ByType(section))
    }

    pub fn exists(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self::new(tenant_id, project_id, DraftView::Exists)
    }

    /// List key for the given initialization flag.
    pub fn list_for(tenant_id: TenantId, project_id: ProjectId, skip_init: bool) -> Self {
        Self::new(tenant_id, project_id, DraftView::List { skip_init })
    }

    /// Content key for the given initialization flag.
    pub fn content_for(tenant_id: TenantId, project_id: ProjectId, skip_init: bool) -> Self {
        Self::new(tenant_id, project_id, DraftView::WithContent { skip_init })
    }

    /// Every list variant of a project.
    ///
    /// The reconciler writes all of these together; nothing else should pick
    /// variants by hand.
    pub fn list_variants(tenant_id: TenantId, project_id: ProjectId) -> [Self; 2] {
        [
            Self::list(tenant_id, project_id),
            Self::list_skip_init(tenant_id, project_id),
        ]
    }

    /// Every composed-content variant of a project.
    pub fn content_variants(tenant_id: TenantId, project_id: ProjectId) -> [Self; 2] {
        [
            Self::with_content(tenant_id, project_id),
            Self::with_content_skip_init(tenant_id, project_id),
        ]
    }

    /// Prefix shared by every key of this key's project.
    pub fn prefix(&self) -> ProjectPrefix {
        ProjectPrefix::new(self.inner.tenant_id, self.inner.project_id)
    }
}

impl fmt::Display for DraftCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "drafts/{}/{}/", self.inner.tenant_id, self.inner.project_id)?;
        match self.inner.view {
            DraftView::List { skip_init: false } => f.write_str("list"),
            DraftView::List { skip_init: true } => f.write_str("list/skip-init"),
            DraftView::WithContent { skip_init: false } => f.write_str("with-content"),
            DraftView::WithContent { skip_init: true } => f.write_str("with-content/skip-init"),
            DraftView::ByType(section) => write!(f, "by-type/{}", section),
            DraftView::Exists => f.write_str("exists"),
        }
    }
}

/// Matches every key belonging to one tenant's project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectPrefix {
    tenant_id: TenantId,
    project_id: ProjectId,
}

impl ProjectPrefix {
    pub fn new(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self {
            tenant_id,
            project_id,
        }
    }

    pub fn matches(&self, key: &DraftCacheKey) -> bool {
        key.inner.tenant_id == self.tenant_id && key.inner.project_id == self.project_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identical_parameters_give_equal_keys() {
        let tenant = TenantId::now_v7();
        let project = ProjectId::now_v7();

        assert_eq!(
            DraftCacheKey::list(tenant, project),
            DraftCacheKey::list_for(tenant, project, false)
        );
        assert_eq!(
            DraftCacheKey::with_content_skip_init(tenant, project),
            DraftCacheKey::content_for(tenant, project, true)
        );
        assert_eq!(
            DraftCacheKey::by_type(tenant, project, SectionType::Claims).to_string(),
            format!("drafts/{}/{}/by-type/CLAIMS", tenant, project)
        );
    }

    #[test]
    fn test_variants_are_distinct() {
        let tenant = TenantId::now_v7();
        let project = ProjectId::now_v7();

        let keys: HashSet<_> = DraftCacheKey::list_variants(tenant, project)
            .into_iter()
            .chain(DraftCacheKey::content_variants(tenant, project))
            .chain([DraftCacheKey::exists(tenant, project)])
            .collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_tenant_is_part_of_identity() {
        let project = ProjectId::now_v7();
        let a = DraftCacheKey::list(TenantId::now_v7(), project);
        let b = DraftCacheKey::list(TenantId::now_v7(), project);
        assert_ne!(a, b);
        assert!(!a.prefix().matches(&b));
    }

    #[test]
    fn test_prefix_matches_every_view_of_project() {
        let tenant = TenantId::now_v7();
        let project = ProjectId::now_v7();
        let prefix = ProjectPrefix::new(tenant, project);

        assert!(prefix.matches(&DraftCacheKey::list_skip_init(tenant, project)));
        assert!(prefix.matches(&DraftCacheKey::by_type(tenant, project, SectionType::Abstract)));
        assert!(prefix.matches(&DraftCacheKey::exists(tenant, project)));
        assert!(!prefix.matches(&DraftCacheKey::list(tenant, ProjectId::now_v7())));
    }
}
