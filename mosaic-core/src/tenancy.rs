//! Multi-tenancy scoping.
//!
//! Every type and entity either belongs to exactly one application or is
//! global. Storage keeps the nullable-column convention (`NULL` = global),
//! but in memory the two cases are an explicit sum type so each query path
//! has to decide what it does with both.

use crate::identity::ApplicationId;
use serde::{Deserialize, Serialize};

/// Scope of a type or entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<ApplicationId>", into = "Option<ApplicationId>")]
pub enum Tenancy {
    /// Visible to every application (system and shared records).
    #[default]
    Global,
    /// Owned by a single application.
    Scoped(ApplicationId),
}

impl Tenancy {
    /// Build from the nullable column representation.
    pub fn from_option(application_id: Option<ApplicationId>) -> Self {
        match application_id {
            Some(id) => Tenancy::Scoped(id),
            None => Tenancy::Global,
        }
    }

    /// The nullable column representation.
    pub fn application_id(&self) -> Option<ApplicationId> {
        match self {
            Tenancy::Global => None,
            Tenancy::Scoped(id) => Some(*id),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Tenancy::Global)
    }

    /// Whether a record with this tenancy is visible to `viewer`.
    ///
    /// Global records are visible to everyone; scoped records only to their
    /// own application. A viewer without an application sees global records
    /// only.
    pub fn visible_to(&self, viewer: Option<ApplicationId>) -> bool {
        match self {
            Tenancy::Global => true,
            Tenancy::Scoped(id) => viewer == Some(*id),
        }
    }
}

impl From<Option<ApplicationId>> for Tenancy {
    fn from(value: Option<ApplicationId>) -> Self {
        Tenancy::from_option(value)
    }
}

impl From<Tenancy> for Option<ApplicationId> {
    fn from(value: Tenancy) -> Self {
        value.application_id()
    }
}

/// Tenant predicate carried by queries and traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TenantScope {
    /// No tenant predicate. Internal callers only.
    #[default]
    Unrestricted,
    /// Global records plus the viewer's own. `None` sees global records only.
    VisibleTo(Option<ApplicationId>),
    /// Records with exactly this tenancy.
    Only(Tenancy),
}

impl TenantScope {
    pub fn matches(&self, tenancy: &Tenancy) -> bool {
        match self {
            TenantScope::Unrestricted => true,
            TenantScope::VisibleTo(viewer) => tenancy.visible_to(*viewer),
            TenantScope::Only(expected) => expected == tenancy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityIdType;

    #[test]
    fn test_tenancy_roundtrips_through_option() {
        let app = ApplicationId::now_v7();
        assert_eq!(Tenancy::from_option(Some(app)), Tenancy::Scoped(app));
        assert_eq!(Tenancy::from_option(None), Tenancy::Global);
        assert_eq!(Tenancy::Scoped(app).application_id(), Some(app));
        assert_eq!(Tenancy::Global.application_id(), None);
    }

    #[test]
    fn test_tenancy_serializes_as_nullable_id() {
        assert_eq!(serde_json::to_string(&Tenancy::Global).unwrap(), "null");

        let app = ApplicationId::now_v7();
        let json = serde_json::to_string(&Tenancy::Scoped(app)).unwrap();
        assert_eq!(json, format!("\"{}\"", app));

        let back: Tenancy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Tenancy::Scoped(app));
    }

    #[test]
    fn test_visibility() {
        let app = ApplicationId::now_v7();
        let other = ApplicationId::now_v7();

        assert!(Tenancy::Global.visible_to(None));
        assert!(Tenancy::Global.visible_to(Some(app)));
        assert!(Tenancy::Scoped(app).visible_to(Some(app)));
        assert!(!Tenancy::Scoped(app).visible_to(Some(other)));
        assert!(!Tenancy::Scoped(app).visible_to(None));
    }

    #[test]
    fn test_scope_matching() {
        let app = ApplicationId::now_v7();
        let other = ApplicationId::now_v7();
        let mine = Tenancy::Scoped(app);
        let theirs = Tenancy::Scoped(other);

        assert!(TenantScope::Unrestricted.matches(&theirs));

        let visible = TenantScope::VisibleTo(Some(app));
        assert!(visible.matches(&Tenancy::Global));
        assert!(visible.matches(&mine));
        assert!(!visible.matches(&theirs));
        assert!(!TenantScope::VisibleTo(None).matches(&mine));

        let only = TenantScope::Only(Tenancy::Global);
        assert!(only.matches(&Tenancy::Global));
        assert!(!only.matches(&mine));
        assert!(TenantScope::Only(mine).matches(&mine));
        assert!(!TenantScope::Only(mine).matches(&Tenancy::Global));
    }
}
