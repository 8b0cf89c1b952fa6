//! Parameter-bound SQL for entity queries.
//!
//! Every user-supplied value (filter keys included) travels as a bound
//! parameter. The only identifiers interpolated into statement text come
//! from fixed tables: the column list below and [`BaseColumn::column`].

use mosaic_core::{
    BaseColumn, EntityId, EntityIdType, OrderDir, QueryPlan, RelationDirection, SortField, Status,
    StatusFilter, Tenancy, TenantScope,
};
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

/// Columns of `entities`, in row-mapping order.
pub const ENTITY_COLUMNS: &str =
    "id, type_name, application_id, owner_id, status, attributes, metadata, created_at, updated_at";

/// The same columns qualified with the `e` alias, for joins.
pub const ENTITY_COLUMNS_E: &str = "e.id, e.type_name, e.application_id, e.owner_id, e.status, \
     e.attributes, e.metadata, e.created_at, e.updated_at";

pub const TYPE_COLUMNS: &str = "id, name, display_name, description, application_id, schema, \
     is_system, icon, category, created_at, updated_at";

pub const RELATION_COLUMNS: &str =
    "source_id, target_id, relation_type, metadata, created_at, updated_at";

// ============================================================================
// PARAMETERS
// ============================================================================

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Uuid(Uuid),
    OptUuid(Option<Uuid>),
    String(String),
    OptString(Option<String>),
    Long(i64),
    Json(JsonValue),
    OptJson(Option<JsonValue>),
    Timestamp(chrono::DateTime<chrono::Utc>),
}

impl SqlParam {
    /// Convert this SqlParam to a reference that can be used with tokio_postgres.
    pub fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Uuid(v) => v,
            SqlParam::OptUuid(v) => v,
            SqlParam::String(v) => v,
            SqlParam::OptString(v) => v,
            SqlParam::Long(v) => v,
            SqlParam::Json(v) => v,
            SqlParam::OptJson(v) => v,
            SqlParam::Timestamp(v) => v,
        }
    }
}

/// Borrow a parameter list in the shape `query` expects.
pub fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(SqlParam::as_to_sql).collect()
}

// ============================================================================
// PREDICATE BUILDER
// ============================================================================

/// Accumulates `AND`-joined conditions and their parameters.
#[derive(Debug, Default, Clone)]
pub struct PredicateBuilder {
    conditions: Vec<String>,
    params: Vec<SqlParam>,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter and return its placeholder.
    pub fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn push(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            "TRUE".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

/// Escape `%`, `_` and `\` so user text is matched literally by `ILIKE`.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ============================================================================
// QUERY PLANS
// ============================================================================

/// Statements for one planned query.
#[derive(Debug, Clone)]
pub struct EntityQuerySql {
    pub count_sql: String,
    pub count_params: Vec<SqlParam>,
    pub select_sql: String,
    pub select_params: Vec<SqlParam>,
}

/// Predicates shared by the count and the fetch.
pub fn entity_predicates(plan: &QueryPlan) -> PredicateBuilder {
    let mut b = PredicateBuilder::new();

    let p = b.bind(SqlParam::String(plan.type_name.clone()));
    b.push(format!("type_name = {}", p));

    push_tenant_scope(&mut b, "application_id", &plan.scope);

    if let Some(owner_id) = plan.owner_id {
        let p = b.bind(SqlParam::Uuid(owner_id.as_uuid()));
        b.push(format!("owner_id = {}", p));
    }

    match &plan.status {
        StatusFilter::ExcludeDeleted => {
            let p = b.bind(SqlParam::String(Status::DELETED.to_string()));
            b.push(format!("status <> {}", p));
        }
        StatusFilter::Exactly(status) => {
            let p = b.bind(SqlParam::String(status.as_str().to_string()));
            b.push(format!("status = {}", p));
        }
    }

    for (key, value) in &plan.filters {
        let k = b.bind(SqlParam::String(key.clone()));
        let v = b.bind(SqlParam::Json(value.to_json()));
        b.push(format!("attributes -> {}::text = {}::jsonb", k, v));
    }

    if let Some(search) = &plan.search {
        let p = b.bind(SqlParam::String(format!("%{}%", escape_like(search))));
        b.push(format!(
            "EXISTS (SELECT 1 FROM jsonb_path_query(attributes, 'strict $.**') AS v \
             WHERE jsonb_typeof(v) = 'string' AND v #>> '{{}}' ILIKE {})",
            p
        ));
    }

    if let Some(join) = &plan.related {
        let anchor = b.bind(SqlParam::Uuid(join.entity_id.as_uuid()));
        let relation_type = b.bind(SqlParam::String(join.relation_type.clone()));
        let (wanted, anchored) = match join.direction {
            RelationDirection::Outgoing => ("target_id", "source_id"),
            RelationDirection::Incoming => ("source_id", "target_id"),
        };
        b.push(format!(
            "id IN (SELECT {} FROM entity_relations WHERE {} = {} AND relation_type = {})",
            wanted, anchored, anchor, relation_type
        ));
    }

    b
}

/// Add the tenant predicate for `scope` against `column`.
pub fn push_tenant_scope(b: &mut PredicateBuilder, column: &str, scope: &TenantScope) {
    match scope {
        TenantScope::Unrestricted => {}
        TenantScope::VisibleTo(None) | TenantScope::Only(Tenancy::Global) => {
            b.push(format!("{} IS NULL", column));
        }
        TenantScope::VisibleTo(Some(app)) => {
            let p = b.bind(SqlParam::Uuid(app.as_uuid()));
            b.push(format!("({} IS NULL OR {} = {})", column, column, p));
        }
        TenantScope::Only(Tenancy::Scoped(app)) => {
            let p = b.bind(SqlParam::Uuid(app.as_uuid()));
            b.push(format!("{} = {}", column, p));
        }
    }
}

/// Build the count and page statements for a plan.
///
/// Nulls sort first ascending and last descending, matching the in-memory
/// ordering where a missing value is the smallest. Ties break on `id`.
pub fn entity_query_sql(plan: &QueryPlan) -> EntityQuerySql {
    let mut b = entity_predicates(plan);
    let where_clause = b.where_clause();
    let count_params = b.params().to_vec();

    let dir = plan.order_dir.as_sql();
    let nulls = match plan.order_dir {
        OrderDir::Asc => "NULLS FIRST",
        OrderDir::Desc => "NULLS LAST",
    };
    let order_expr = match &plan.order {
        SortField::Column(column) => column.column().to_string(),
        SortField::Attribute(key) => {
            let p = b.bind(SqlParam::String(key.clone()));
            format!("attributes -> {}::text", p)
        }
    };
    let tiebreak = if plan.order == SortField::Column(BaseColumn::Id) {
        String::new()
    } else {
        format!(", id {}", dir)
    };

    let limit = b.bind(SqlParam::Long(i64::from(plan.limit)));
    let offset = b.bind(SqlParam::Long(i64::try_from(plan.offset).unwrap_or(i64::MAX)));

    EntityQuerySql {
        count_sql: format!("SELECT COUNT(*) FROM entities WHERE {}", where_clause),
        count_params,
        select_sql: format!(
            "SELECT {} FROM entities WHERE {} ORDER BY {} {} {}{} LIMIT {} OFFSET {}",
            ENTITY_COLUMNS, where_clause, order_expr, dir, nulls, tiebreak, limit, offset
        ),
        select_params: b.params().to_vec(),
    }
}

// ============================================================================
// TRAVERSALS
// ============================================================================

/// Outgoing traversal: targets of `relation_type` edges leaving `source_id`,
/// newest edge first.
pub fn related_from_sql(
    source_id: EntityId,
    relation_type: &str,
    target_type: Option<&str>,
    scope: &TenantScope,
) -> (String, Vec<SqlParam>) {
    let mut b = PredicateBuilder::new();
    let p = b.bind(SqlParam::Uuid(source_id.as_uuid()));
    b.push(format!("r.source_id = {}", p));
    let p = b.bind(SqlParam::String(relation_type.to_string()));
    b.push(format!("r.relation_type = {}", p));
    let p = b.bind(SqlParam::String(Status::DELETED.to_string()));
    b.push(format!("e.status <> {}", p));
    if let Some(target_type) = target_type {
        let p = b.bind(SqlParam::String(target_type.to_string()));
        b.push(format!("e.type_name = {}", p));
    }
    push_tenant_scope(&mut b, "e.application_id", scope);

    let sql = format!(
        "SELECT {} FROM entity_relations r JOIN entities e ON e.id = r.target_id \
         WHERE {} ORDER BY r.created_at DESC, r.target_id DESC",
        ENTITY_COLUMNS_E,
        b.where_clause()
    );
    (sql, b.params().to_vec())
}

/// Incoming traversal: sources of `relation_type` edges entering
/// `target_id`, oldest edge first, with the edge's metadata and time.
pub fn related_to_sql(
    target_id: EntityId,
    relation_type: &str,
    scope: &TenantScope,
) -> (String, Vec<SqlParam>) {
    let mut b = PredicateBuilder::new();
    let p = b.bind(SqlParam::Uuid(target_id.as_uuid()));
    b.push(format!("r.target_id = {}", p));
    let p = b.bind(SqlParam::String(relation_type.to_string()));
    b.push(format!("r.relation_type = {}", p));
    let p = b.bind(SqlParam::String(Status::DELETED.to_string()));
    b.push(format!("e.status <> {}", p));
    push_tenant_scope(&mut b, "e.application_id", scope);

    let sql = format!(
        "SELECT {}, r.metadata AS relation_metadata, r.created_at AS joined_at \
         FROM entity_relations r JOIN entities e ON e.id = r.source_id \
         WHERE {} ORDER BY r.created_at ASC, r.source_id ASC",
        ENTITY_COLUMNS_E,
        b.where_clause()
    );
    (sql, b.params().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{
        ApplicationId, AttributeDef, AttributeKind, EntityQuery, NewEntityType, RelationJoin,
        StoreConfig,
    };

    fn plan(query: EntityQuery) -> QueryPlan {
        let ty = NewEntityType {
            schema: vec![
                AttributeDef::new("body", AttributeKind::String),
                AttributeDef::new("rank", AttributeKind::Number),
            ],
            ..NewEntityType::new("note")
        }
        .into_entity_type(chrono::Utc::now())
        .unwrap();
        query.plan(&ty, &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_default_plan_excludes_deleted() {
        let sql = entity_query_sql(&plan(EntityQuery::new()));
        assert_eq!(
            sql.count_sql,
            "SELECT COUNT(*) FROM entities WHERE type_name = $1 AND status <> $2"
        );
        assert_eq!(
            sql.count_params,
            vec![
                SqlParam::String("note".to_string()),
                SqlParam::String("deleted".to_string())
            ]
        );
        assert!(sql
            .select_sql
            .ends_with("ORDER BY created_at DESC NULLS LAST, id DESC LIMIT $3 OFFSET $4"));
        assert_eq!(sql.select_params[2], SqlParam::Long(20));
        assert_eq!(sql.select_params[3], SqlParam::Long(0));
    }

    #[test]
    fn test_filter_keys_are_bound_not_interpolated() {
        let sql = entity_query_sql(&plan(EntityQuery::new().filter("body", "hi")));
        assert!(sql.count_sql.contains("attributes -> $3::text = $4::jsonb"));
        assert!(!sql.count_sql.contains("body"));
        assert_eq!(sql.count_params[2], SqlParam::String("body".to_string()));
        assert_eq!(sql.count_params[3], SqlParam::Json(serde_json::json!("hi")));
    }

    #[test]
    fn test_search_escapes_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");

        let sql = entity_query_sql(&plan(EntityQuery::new().search("100%")));
        assert!(sql.count_sql.contains("jsonb_typeof(v) = 'string' AND v #>> '{}' ILIKE $3"));
        assert!(!sql.count_sql.contains("attributes::text"));
        assert_eq!(sql.count_params[2], SqlParam::String("%100\\%%".to_string()));
    }

    #[test]
    fn test_tenancy_predicates() {
        let global = entity_query_sql(&plan(EntityQuery::new().application(Tenancy::Global)));
        assert!(global.count_sql.contains("application_id IS NULL"));

        let app = mosaic_core::ApplicationId::now_v7();
        let scoped = entity_query_sql(&plan(EntityQuery::new().application(Tenancy::Scoped(app))));
        assert!(scoped.count_sql.contains("application_id = $2"));
        assert!(!scoped.count_sql.contains("IS NULL"));
        assert_eq!(scoped.count_params[1], SqlParam::Uuid(app.as_uuid()));

        let visible = entity_query_sql(&plan(EntityQuery::new().visible_to(Some(app))));
        assert!(visible
            .count_sql
            .contains("(application_id IS NULL OR application_id = $2)"));
        assert_eq!(visible.count_params[1], SqlParam::Uuid(app.as_uuid()));

        let anonymous = entity_query_sql(&plan(EntityQuery::new().visible_to(None)));
        assert!(anonymous.count_sql.contains("application_id IS NULL"));
    }

    #[test]
    fn test_explicit_status_replaces_exclusion() {
        let sql = entity_query_sql(&plan(EntityQuery::new().status(Status::deleted())));
        assert!(sql.count_sql.contains("status = $2"));
        assert!(!sql.count_sql.contains("<>"));
    }

    #[test]
    fn test_attribute_order_binds_key_after_predicates() {
        let sql = entity_query_sql(&plan(
            EntityQuery::new()
                .filter("rank", 3i64)
                .order_by("rank", OrderDir::Asc)
                .page(3, 10),
        ));
        assert!(sql
            .select_sql
            .contains("ORDER BY attributes -> $5::text ASC NULLS FIRST, id ASC LIMIT $6 OFFSET $7"));
        assert_eq!(sql.count_params.len(), 4);
        assert_eq!(sql.select_params[4], SqlParam::String("rank".to_string()));
        assert_eq!(sql.select_params[6], SqlParam::Long(20));
    }

    #[test]
    fn test_relation_join_directions() {
        let anchor = EntityId::now_v7();
        let outgoing = entity_query_sql(&plan(EntityQuery::new().related(RelationJoin {
            entity_id: anchor,
            relation_type: "member_of".to_string(),
            direction: RelationDirection::Outgoing,
        })));
        assert!(outgoing.count_sql.contains(
            "id IN (SELECT target_id FROM entity_relations WHERE source_id = $3 AND relation_type = $4)"
        ));

        let incoming = entity_query_sql(&plan(EntityQuery::new().related(RelationJoin {
            entity_id: anchor,
            relation_type: "member_of".to_string(),
            direction: RelationDirection::Incoming,
        })));
        assert!(incoming.count_sql.contains("SELECT source_id FROM entity_relations WHERE target_id = $3"));
    }

    #[test]
    fn test_order_by_id_has_no_tiebreak() {
        let sql = entity_query_sql(&plan(EntityQuery::new().order_by("id", OrderDir::Asc)));
        assert!(sql.select_sql.contains("ORDER BY id ASC NULLS FIRST LIMIT"));
    }

    #[test]
    fn test_filter_values_keep_json_type() {
        let sql = entity_query_sql(&plan(EntityQuery::new().filter("rank", 2i64)));
        assert_eq!(sql.count_params[3], SqlParam::Json(serde_json::json!(2)));
    }

    #[test]
    fn test_traversals_apply_tenant_scope() {
        let anchor = EntityId::now_v7();
        let app = ApplicationId::now_v7();

        let (sql, params) = related_from_sql(
            anchor,
            "pinned",
            Some("note"),
            &TenantScope::VisibleTo(Some(app)),
        );
        assert!(sql.contains(
            "WHERE r.source_id = $1 AND r.relation_type = $2 AND e.status <> $3 \
             AND e.type_name = $4 AND (e.application_id IS NULL OR e.application_id = $5)"
        ));
        assert_eq!(params[4], SqlParam::Uuid(app.as_uuid()));

        let (sql, params) = related_to_sql(anchor, "member", &TenantScope::VisibleTo(None));
        assert!(sql.contains("AND e.application_id IS NULL ORDER BY r.created_at ASC"));
        assert_eq!(params.len(), 3);

        let (sql, _) = related_to_sql(anchor, "member", &TenantScope::Unrestricted);
        assert!(!sql.contains("application_id IS NULL"));
    }
}
