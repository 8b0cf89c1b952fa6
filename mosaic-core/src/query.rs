//! Query descriptions and query planning.
//!
//! An [`EntityQuery`] is what callers send. [`EntityQuery::plan`] validates
//! it against the entity type's schema and the store limits and produces a
//! [`QueryPlan`], which every backend executes. Field names never reach a
//! backend unless they passed the allow-list here.

use crate::config::StoreConfig;
use crate::entity::{Entity, Status};
use crate::entity_type::EntityType;
use crate::error::ValidationError;
use crate::identity::{ApplicationId, EntityId, PrincipalId};
use crate::tenancy::{Tenancy, TenantScope};
use crate::value::AttrValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

static FIELD_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid field name regex"));

/// Check that `name` is a plain identifier.
pub fn validate_field_name(name: &str) -> Result<(), ValidationError> {
    if FIELD_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::MalformedFilter {
            field: name.to_string(),
            reason: "not a plain identifier".to_string(),
        })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDir {
    Asc,
    #[default]
    Desc,
}

impl OrderDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        }
    }

    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            OrderDir::Asc => ordering,
            OrderDir::Desc => ordering.reverse(),
        }
    }
}

impl FromStr for OrderDir {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(OrderDir::Asc),
            "desc" => Ok(OrderDir::Desc),
            other => Err(ValidationError::InvalidValue {
                field: "orderDir".to_string(),
                reason: format!("expected 'asc' or 'desc', got '{}'", other),
            }),
        }
    }
}

/// Built-in entity columns that can be sorted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseColumn {
    CreatedAt,
    UpdatedAt,
    Status,
    OwnerId,
    Id,
}

impl BaseColumn {
    /// Resolve a caller-supplied name. Both snake and camel case are accepted.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "created_at" | "createdAt" => Some(BaseColumn::CreatedAt),
            "updated_at" | "updatedAt" => Some(BaseColumn::UpdatedAt),
            "status" => Some(BaseColumn::Status),
            "owner_id" | "ownerId" => Some(BaseColumn::OwnerId),
            "id" => Some(BaseColumn::Id),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            BaseColumn::CreatedAt => "created_at",
            BaseColumn::UpdatedAt => "updated_at",
            BaseColumn::Status => "status",
            BaseColumn::OwnerId => "owner_id",
            BaseColumn::Id => "id",
        }
    }
}

/// What a query is ordered by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SortField {
    Column(BaseColumn),
    /// A schema-declared attribute key.
    Attribute(String),
}

impl Default for SortField {
    fn default() -> Self {
        SortField::Column(BaseColumn::CreatedAt)
    }
}

/// Which way to follow a relation in a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationDirection {
    /// Results are targets of edges whose source is the anchor.
    #[default]
    Outgoing,
    /// Results are sources of edges whose target is the anchor.
    Incoming,
}

/// Restrict results to entities linked to `entity_id` by `relation_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationJoin {
    pub entity_id: EntityId,
    pub relation_type: String,
    #[serde(default)]
    pub direction: RelationDirection,
}

/// Status predicate of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    /// Everything except soft-deleted records.
    ExcludeDeleted,
    Exactly(Status),
}

impl StatusFilter {
    pub fn matches(&self, status: &Status) -> bool {
        match self {
            StatusFilter::ExcludeDeleted => !status.is_deleted(),
            StatusFilter::Exactly(wanted) => wanted == status,
        }
    }
}

/// A paginated query over one entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityQuery {
    pub scope: TenantScope,
    pub owner_id: Option<PrincipalId>,
    pub status: Option<Status>,
    pub filters: BTreeMap<String, AttrValue>,
    pub search: Option<String>,
    pub order_by: Option<String>,
    pub order_dir: Option<OrderDir>,
    /// 1-based. Zero is treated as the first page.
    pub page: u32,
    /// Zero means the configured default.
    pub limit: u32,
    pub related: Option<RelationJoin>,
}

impl EntityQuery {
    pub fn new() -> Self {
        Self {
            page: 1,
            ..Default::default()
        }
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, dir: OrderDir) -> Self {
        self.order_by = Some(field.into());
        self.order_dir = Some(dir);
        self
    }

    /// Match only records with exactly this tenancy.
    pub fn application(mut self, tenancy: Tenancy) -> Self {
        self.scope = TenantScope::Only(tenancy);
        self
    }

    /// Match global records plus those of `viewer`.
    pub fn visible_to(mut self, viewer: Option<ApplicationId>) -> Self {
        self.scope = TenantScope::VisibleTo(viewer);
        self
    }

    pub fn related(mut self, join: RelationJoin) -> Self {
        self.related = Some(join);
        self
    }

    /// Validate against `entity_type` and `config`, producing an executable plan.
    pub fn plan(&self, entity_type: &EntityType, config: &StoreConfig) -> Result<QueryPlan, ValidationError> {
        let mut filters = Vec::with_capacity(self.filters.len());
        for (key, value) in &self.filters {
            validate_field_name(key)?;
            if !entity_type.declares(key) {
                return Err(ValidationError::MalformedFilter {
                    field: key.clone(),
                    reason: format!("not declared in the schema of '{}'", entity_type.name),
                });
            }
            filters.push((key.clone(), value.clone()));
        }

        let order = match self.order_by.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => SortField::default(),
            Some(name) => match BaseColumn::parse(name) {
                Some(column) => SortField::Column(column),
                None => {
                    validate_field_name(name)?;
                    if !entity_type.declares(name) {
                        return Err(ValidationError::MalformedFilter {
                            field: name.to_string(),
                            reason: "orderBy must be a base column or a declared attribute".to_string(),
                        });
                    }
                    SortField::Attribute(name.to_string())
                }
            },
        };

        if let Some(join) = &self.related {
            if join.relation_type.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "relationType".to_string(),
                });
            }
        }

        let page = self.page.max(1);
        let limit = config.effective_limit(self.limit);

        Ok(QueryPlan {
            type_name: entity_type.name.clone(),
            scope: self.scope,
            owner_id: self.owner_id,
            status: match &self.status {
                Some(status) => StatusFilter::Exactly(status.clone()),
                None => StatusFilter::ExcludeDeleted,
            },
            filters,
            search: self.search.clone().filter(|s| !s.is_empty()),
            order,
            order_dir: self.order_dir.unwrap_or_default(),
            related: self.related.clone(),
            page,
            limit,
            offset: u64::from(page - 1) * u64::from(limit),
        })
    }
}

/// Options for typeahead search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub scope: TenantScope,
    pub limit: Option<u32>,
}

/// Build the plan for a typeahead search: newest first, first page only,
/// soft-deleted records excluded.
pub fn plan_search(
    entity_type: &EntityType,
    text: &str,
    options: &SearchOptions,
    config: &StoreConfig,
) -> QueryPlan {
    let limit = options
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(config.default_search_limit)
        .min(config.max_page_size);

    QueryPlan {
        type_name: entity_type.name.clone(),
        scope: options.scope,
        owner_id: None,
        status: StatusFilter::ExcludeDeleted,
        filters: Vec::new(),
        search: Some(text.to_string()).filter(|s| !s.is_empty()),
        order: SortField::default(),
        order_dir: OrderDir::Desc,
        related: None,
        page: 1,
        limit,
        offset: 0,
    }
}

/// A validated query, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub type_name: String,
    pub scope: TenantScope,
    pub owner_id: Option<PrincipalId>,
    pub status: StatusFilter,
    /// Exact-match attribute predicates; keys are allow-listed.
    pub filters: Vec<(String, AttrValue)>,
    pub search: Option<String>,
    pub order: SortField,
    pub order_dir: OrderDir,
    pub related: Option<RelationJoin>,
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
}

impl QueryPlan {
    /// Evaluate every predicate except the relation join against one record.
    pub fn matches(&self, entity: &Entity) -> bool {
        if entity.type_name != self.type_name {
            return false;
        }
        if !self.scope.matches(&entity.tenancy) {
            return false;
        }
        if let Some(owner_id) = self.owner_id {
            if entity.owner_id != Some(owner_id) {
                return false;
            }
        }
        if !self.status.matches(&entity.status) {
            return false;
        }
        let filters_match = self.filters.iter().all(|(key, expected)| {
            entity
                .attributes
                .get(key)
                .map(|actual| actual.json_eq(expected))
                .unwrap_or(false)
        });
        if !filters_match {
            return false;
        }
        match &self.search {
            Some(needle) => entity.attributes.contains_text(needle),
            None => true,
        }
    }

    /// Total order used for results. Ties fall back to the id, which is
    /// time-sortable, so pages never overlap.
    pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        let primary = match &self.order {
            SortField::Column(BaseColumn::CreatedAt) => a.created_at.cmp(&b.created_at),
            SortField::Column(BaseColumn::UpdatedAt) => a.updated_at.cmp(&b.updated_at),
            SortField::Column(BaseColumn::Status) => a.status.cmp(&b.status),
            SortField::Column(BaseColumn::OwnerId) => a.owner_id.cmp(&b.owner_id),
            SortField::Column(BaseColumn::Id) => a.id.cmp(&b.id),
            SortField::Attribute(key) => {
                let null = AttrValue::Null;
                let left = a.attributes.get(key).unwrap_or(&null);
                let right = b.attributes.get(key).unwrap_or(&null);
                left.sort_cmp(right)
            }
        };
        self.order_dir.apply(primary.then_with(|| a.id.cmp(&b.id)))
    }

    /// Window `[offset, offset + limit)` of an already-ordered result set.
    pub fn window<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        items
            .into_iter()
            .skip(offset)
            .take(self.limit as usize)
            .collect()
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub entities: Vec<T>,
    /// Number of matches across all pages.
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn empty(page: u32, limit: u32) -> Self {
        Self {
            entities: Vec::new(),
            total: 0,
            page,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::entity::NewEntity;
    use crate::entity_type::{AttributeDef, AttributeKind, NewEntityType};
    use crate::identity::{ApplicationId, EntityIdType};
    use chrono::{Duration, Utc};

    fn note_type() -> EntityType {
        NewEntityType {
            schema: vec![
                AttributeDef::new("body", AttributeKind::String),
                AttributeDef::new("likes", AttributeKind::Number),
            ],
            ..NewEntityType::new("note")
        }
        .into_entity_type(Utc::now())
        .unwrap()
    }

    fn note(body: &str, likes: i64) -> Entity {
        NewEntity::new(attrs! { "body" => body, "likes" => likes })
            .into_entity("note".to_string(), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_plan_defaults() {
        let plan = EntityQuery::new().plan(&note_type(), &StoreConfig::default()).unwrap();
        assert_eq!(plan.page, 1);
        assert_eq!(plan.limit, 20);
        assert_eq!(plan.offset, 0);
        assert_eq!(plan.order, SortField::Column(BaseColumn::CreatedAt));
        assert_eq!(plan.order_dir, OrderDir::Desc);
        assert_eq!(plan.status, StatusFilter::ExcludeDeleted);
    }

    #[test]
    fn test_plan_clamps_page_and_limit() {
        let config = StoreConfig::default();
        let plan = EntityQuery::new().page(0, 5000).plan(&note_type(), &config).unwrap();
        assert_eq!(plan.page, 1);
        assert_eq!(plan.limit, 100);

        let plan = EntityQuery::new().page(3, 10).plan(&note_type(), &config).unwrap();
        assert_eq!(plan.offset, 20);
    }

    #[test]
    fn test_plan_rejects_undeclared_filter_key() {
        let err = EntityQuery::new()
            .filter("title", "x")
            .plan(&note_type(), &StoreConfig::default())
            .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedFilter { ref field, .. } if field == "title"));
    }

    #[test]
    fn test_plan_rejects_injection_in_order_by() {
        let err = EntityQuery::new()
            .order_by("created_at; DROP TABLE entities", OrderDir::Asc)
            .plan(&note_type(), &StoreConfig::default())
            .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedFilter { .. }));
    }

    #[test]
    fn test_plan_accepts_declared_attribute_order() {
        let plan = EntityQuery::new()
            .order_by("likes", OrderDir::Asc)
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();
        assert_eq!(plan.order, SortField::Attribute("likes".to_string()));

        let plan = EntityQuery::new()
            .order_by("updatedAt", OrderDir::Asc)
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();
        assert_eq!(plan.order, SortField::Column(BaseColumn::UpdatedAt));
    }

    #[test]
    fn test_matches_filters_and_search() {
        let plan = EntityQuery::new()
            .filter("likes", 3.0)
            .search("HELLO")
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();

        assert!(plan.matches(&note("hello there", 3)));
        assert!(!plan.matches(&note("hello there", 4)));
        assert!(!plan.matches(&note("bye", 3)));
    }

    #[test]
    fn test_matches_excludes_deleted_unless_asked() {
        let mut e = note("x", 1);
        e.status = Status::deleted();

        let default_plan = EntityQuery::new().plan(&note_type(), &StoreConfig::default()).unwrap();
        assert!(!default_plan.matches(&e));

        let deleted_plan = EntityQuery::new()
            .status(Status::deleted())
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();
        assert!(deleted_plan.matches(&e));
    }

    #[test]
    fn test_matches_tenancy() {
        let app = ApplicationId::now_v7();
        let mut scoped = note("x", 1);
        scoped.tenancy = Tenancy::Scoped(app);
        let global = note("y", 1);

        let any = EntityQuery::new().plan(&note_type(), &StoreConfig::default()).unwrap();
        assert!(any.matches(&scoped) && any.matches(&global));

        let only_app = EntityQuery::new()
            .application(Tenancy::Scoped(app))
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();
        assert!(only_app.matches(&scoped));
        assert!(!only_app.matches(&global));

        let only_global = EntityQuery::new()
            .application(Tenancy::Global)
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();
        assert!(!only_global.matches(&scoped));
        assert!(only_global.matches(&global));

        let mut foreign = note("z", 1);
        foreign.tenancy = Tenancy::Scoped(ApplicationId::now_v7());
        let visible = EntityQuery::new()
            .visible_to(Some(app))
            .plan(&note_type(), &StoreConfig::default())
            .unwrap();
        assert!(visible.matches(&scoped));
        assert!(visible.matches(&global));
        assert!(!visible.matches(&foreign));
    }

    #[test]
    fn test_compare_newest_first_with_id_tiebreak() {
        let plan = EntityQuery::new().plan(&note_type(), &StoreConfig::default()).unwrap();
        let older = note("a", 1);
        let mut newer = note("b", 1);
        newer.created_at = older.created_at + Duration::seconds(1);

        let mut items = vec![older.clone(), newer.clone()];
        items.sort_by(|a, b| plan.compare(a, b));
        assert_eq!(items[0].id, newer.id);

        let mut same_time = note("c", 1);
        same_time.created_at = older.created_at;
        assert_ne!(plan.compare(&older, &same_time), Ordering::Equal);
    }

    #[test]
    fn test_search_plan_limit() {
        let config = StoreConfig::default();
        let plan = plan_search(&note_type(), "hi", &SearchOptions::default(), &config);
        assert_eq!(plan.limit, config.default_search_limit);
        assert_eq!(plan.order_dir, OrderDir::Desc);

        let plan = plan_search(
            &note_type(),
            "hi",
            &SearchOptions {
                limit: Some(1000),
                ..Default::default()
            },
            &config,
        );
        assert_eq!(plan.limit, config.max_page_size);
    }

    #[test]
    fn test_order_dir_parse() {
        assert_eq!("ASC".parse::<OrderDir>().unwrap(), OrderDir::Asc);
        assert_eq!("desc".parse::<OrderDir>().unwrap(), OrderDir::Desc);
        assert!("sideways".parse::<OrderDir>().is_err());
    }
}
