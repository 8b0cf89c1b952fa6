//! Database Connection Pool Module
//!
//! PostgreSQL backend for the entity store. Implements every backend trait
//! from mosaic-storage over a deadpool-postgres pool. All statements are
//! parameter-bound; entity queries are built by [`crate::sql`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use mosaic_core::{
    ApplicationId, AttributeDef, Attributes, Entity, EntityId, EntityIdType, EntityPatch,
    EntityRelation, EntityType, EntityTypeId, EntityTypePatch, MosaicError, MosaicResult, Page,
    PrincipalId, QueryPlan, RelatedEntity, RelationKey, Status, StorageError, Tenancy,
    TenantScope, ValidationError,
};
use mosaic_storage::{
    ConsistencySweep, EntityStore, PrincipalDirectory, QueryEngine, RelationGraph, StoreHealth,
    SweepReport, TypeRegistry,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::sql::{
    entity_query_sql, param_refs, related_from_sql, related_to_sql, ENTITY_COLUMNS, RELATION_COLUMNS,
    TYPE_COLUMNS,
};

// ============================================================================
// DATABASE CONFIGURATION
// ============================================================================

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "mosaic".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("MOSAIC_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("MOSAIC_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("MOSAIC_DB_NAME").unwrap_or_else(|_| "mosaic".to_string()),
            user: std::env::var("MOSAIC_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("MOSAIC_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("MOSAIC_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("MOSAIC_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool, for the HTTP layer.
    pub(crate) async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Get a connection from the pool, for backend operations.
    async fn conn(&self) -> MosaicResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Register a principal so it can own entities.
    pub async fn register_principal(&self, id: PrincipalId) -> MosaicResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO principals (id, created_at) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            &[&id.as_uuid(), &Utc::now()],
        )
        .await
        .map_err(pg_error)?;
        Ok(())
    }
}

// ============================================================================
// ERROR AND ROW MAPPING
// ============================================================================

fn pg_error(err: tokio_postgres::Error) -> MosaicError {
    tracing::error!("Database error: {:?}", err);
    MosaicError::backend(err.to_string())
}

fn pool_error(err: PoolError) -> MosaicError {
    tracing::error!("Connection pool error: {:?}", err);
    match err {
        PoolError::Timeout(_) => StorageError::Unavailable {
            reason: "connection pool exhausted".to_string(),
        }
        .into(),
        PoolError::Closed => StorageError::Unavailable {
            reason: "connection pool closed".to_string(),
        }
        .into(),
        other => MosaicError::backend(other.to_string()),
    }
}

fn serialization_error(what: &str, reason: impl std::fmt::Display) -> MosaicError {
    StorageError::Serialization {
        what: what.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn attributes_column(row: &Row, column: &str) -> MosaicResult<Attributes> {
    let value: serde_json::Value = row.try_get(column).map_err(pg_error)?;
    Attributes::from_json(value).map_err(|e| serialization_error(column, e))
}

fn row_to_entity(row: &Row) -> MosaicResult<Entity> {
    let application_id: Option<Uuid> = row.try_get("application_id").map_err(pg_error)?;
    let owner_id: Option<Uuid> = row.try_get("owner_id").map_err(pg_error)?;
    let status: String = row.try_get("status").map_err(pg_error)?;

    Ok(Entity {
        id: EntityId::new(row.try_get("id").map_err(pg_error)?),
        type_name: row.try_get("type_name").map_err(pg_error)?,
        tenancy: Tenancy::from_option(application_id.map(ApplicationId::new)),
        owner_id: owner_id.map(PrincipalId::new),
        status: Status::new(status),
        attributes: attributes_column(row, "attributes")?,
        metadata: attributes_column(row, "metadata")?,
        created_at: row.try_get("created_at").map_err(pg_error)?,
        updated_at: row.try_get("updated_at").map_err(pg_error)?,
    })
}

fn row_to_type(row: &Row) -> MosaicResult<EntityType> {
    let application_id: Option<Uuid> = row.try_get("application_id").map_err(pg_error)?;
    let schema: serde_json::Value = row.try_get("schema").map_err(pg_error)?;
    let schema: Vec<AttributeDef> =
        serde_json::from_value(schema).map_err(|e| serialization_error("schema", e))?;

    Ok(EntityType {
        id: EntityTypeId::new(row.try_get("id").map_err(pg_error)?),
        name: row.try_get("name").map_err(pg_error)?,
        display_name: row.try_get("display_name").map_err(pg_error)?,
        description: row.try_get("description").map_err(pg_error)?,
        tenancy: Tenancy::from_option(application_id.map(ApplicationId::new)),
        schema,
        is_system: row.try_get("is_system").map_err(pg_error)?,
        icon: row.try_get("icon").map_err(pg_error)?,
        category: row.try_get("category").map_err(pg_error)?,
        created_at: row.try_get("created_at").map_err(pg_error)?,
        updated_at: row.try_get("updated_at").map_err(pg_error)?,
    })
}

fn row_to_relation(row: &Row) -> MosaicResult<EntityRelation> {
    Ok(EntityRelation {
        source_id: EntityId::new(row.try_get("source_id").map_err(pg_error)?),
        target_id: EntityId::new(row.try_get("target_id").map_err(pg_error)?),
        relation_type: row.try_get("relation_type").map_err(pg_error)?,
        metadata: attributes_column(row, "metadata")?,
        created_at: row.try_get("created_at").map_err(pg_error)?,
        updated_at: row.try_get("updated_at").map_err(pg_error)?,
    })
}

fn schema_json(schema: &[AttributeDef]) -> MosaicResult<serde_json::Value> {
    serde_json::to_value(schema).map_err(|e| serialization_error("schema", e))
}

// ============================================================================
// TYPE REGISTRY
// ============================================================================

#[async_trait]
impl TypeRegistry for DbClient {
    async fn list_types(&self, application_id: Option<ApplicationId>) -> MosaicResult<Vec<EntityType>> {
        let conn = self.conn().await?;
        let app = application_id.map(|a| a.as_uuid());
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM entity_types \
                     WHERE application_id IS NULL OR application_id = $1::uuid \
                     ORDER BY (category IS NULL), category, display_name, name",
                    TYPE_COLUMNS
                ),
                &[&app],
            )
            .await
            .map_err(pg_error)?;
        rows.iter().map(row_to_type).collect()
    }

    async fn get_type(&self, name: &str) -> MosaicResult<Option<EntityType>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM entity_types WHERE name = $1", TYPE_COLUMNS),
                &[&name],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(row_to_type).transpose()
    }

    async fn get_type_by_id(&self, id: EntityTypeId) -> MosaicResult<Option<EntityType>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM entity_types WHERE id = $1", TYPE_COLUMNS),
                &[&id.as_uuid()],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(row_to_type).transpose()
    }

    async fn insert_type(&self, entity_type: &EntityType) -> MosaicResult<()> {
        let conn = self.conn().await?;
        let schema = schema_json(&entity_type.schema)?;
        let app = entity_type.tenancy.application_id().map(|a| a.as_uuid());

        let result = conn
            .execute(
                "INSERT INTO entity_types \
                 (id, name, display_name, description, application_id, schema, is_system, icon, category, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &entity_type.id.as_uuid(),
                    &entity_type.name,
                    &entity_type.display_name,
                    &entity_type.description,
                    &app,
                    &schema,
                    &entity_type.is_system,
                    &entity_type.icon,
                    &entity_type.category,
                    &entity_type.created_at,
                    &entity_type.updated_at,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(ValidationError::DuplicateName {
                name: entity_type.name.clone(),
            }
            .into()),
            Err(e) => Err(pg_error(e)),
        }
    }

    async fn update_type(&self, id: EntityTypeId, patch: EntityTypePatch) -> MosaicResult<Option<EntityType>> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(pg_error)?;

        let row = tx
            .query_opt(
                &format!("SELECT {} FROM entity_types WHERE id = $1 FOR UPDATE", TYPE_COLUMNS),
                &[&id.as_uuid()],
            )
            .await
            .map_err(pg_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut entity_type = row_to_type(&row)?;
        patch.apply(&mut entity_type, Utc::now());
        let schema = schema_json(&entity_type.schema)?;

        tx.execute(
            "UPDATE entity_types SET display_name = $2, description = $3, schema = $4, \
             icon = $5, category = $6, updated_at = $7 WHERE id = $1",
            &[
                &id.as_uuid(),
                &entity_type.display_name,
                &entity_type.description,
                &schema,
                &entity_type.icon,
                &entity_type.category,
                &entity_type.updated_at,
            ],
        )
        .await
        .map_err(pg_error)?;
        tx.commit().await.map_err(pg_error)?;

        Ok(Some(entity_type))
    }

    async fn delete_type(&self, id: EntityTypeId) -> MosaicResult<bool> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM entity_types WHERE id = $1 AND NOT is_system",
                &[&id.as_uuid()],
            )
            .await
            .map_err(pg_error)?;
        Ok(deleted > 0)
    }
}

// ============================================================================
// ENTITY STORE
// ============================================================================

#[async_trait]
impl EntityStore for DbClient {
    async fn insert_entity(&self, entity: &Entity) -> MosaicResult<()> {
        let conn = self.conn().await?;
        let app = entity.tenancy.application_id().map(|a| a.as_uuid());
        let owner = entity.owner_id.map(|o| o.as_uuid());

        conn.execute(
            "INSERT INTO entities \
             (id, type_name, application_id, owner_id, status, attributes, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &entity.id.as_uuid(),
                &entity.type_name,
                &app,
                &owner,
                &entity.status.as_str(),
                &entity.attributes.to_json(),
                &entity.metadata.to_json(),
                &entity.created_at,
                &entity.updated_at,
            ],
        )
        .await
        .map_err(pg_error)?;
        Ok(())
    }

    async fn get_entity(&self, id: EntityId) -> MosaicResult<Option<Entity>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM entities WHERE id = $1", ENTITY_COLUMNS),
                &[&id.as_uuid()],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(row_to_entity).transpose()
    }

    /// One statement, so the row lock makes the top-level merge atomic and
    /// concurrent updates of disjoint keys both land.
    async fn update_entity(&self, id: EntityId, patch: EntityPatch) -> MosaicResult<Option<Entity>> {
        let conn = self.conn().await?;
        let attributes = patch.attributes.map(|a| a.to_json());
        let metadata = patch.metadata.map(|m| m.to_json());
        let status = patch.status.map(|s| s.as_str().to_string());

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE entities SET \
                     attributes = attributes || COALESCE($2::jsonb, '{{}}'::jsonb), \
                     metadata = metadata || COALESCE($3::jsonb, '{{}}'::jsonb), \
                     status = COALESCE($4::text, status), \
                     updated_at = $5 \
                     WHERE id = $1 RETURNING {}",
                    ENTITY_COLUMNS
                ),
                &[&id.as_uuid(), &attributes, &metadata, &status, &Utc::now()],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(row_to_entity).transpose()
    }

    async fn delete_entity(&self, id: EntityId, hard: bool) -> MosaicResult<bool> {
        let conn = self.conn().await?;
        let affected = if hard {
            conn.execute("DELETE FROM entities WHERE id = $1", &[&id.as_uuid()])
                .await
                .map_err(pg_error)?
        } else {
            conn.execute(
                "UPDATE entities SET status = $2, updated_at = $3 WHERE id = $1 AND status <> $2",
                &[&id.as_uuid(), &Status::DELETED, &Utc::now()],
            )
            .await
            .map_err(pg_error)?
        };
        Ok(affected > 0)
    }
}

// ============================================================================
// RELATION GRAPH
// ============================================================================

#[async_trait]
impl RelationGraph for DbClient {
    async fn upsert_relation(&self, key: &RelationKey, metadata: Attributes) -> MosaicResult<EntityRelation> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO entity_relations \
                     (source_id, target_id, relation_type, metadata, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $5) \
                     ON CONFLICT (source_id, target_id, relation_type) DO UPDATE SET \
                     metadata = entity_relations.metadata || EXCLUDED.metadata, \
                     updated_at = EXCLUDED.updated_at \
                     RETURNING {}",
                    RELATION_COLUMNS
                ),
                &[
                    &key.source_id.as_uuid(),
                    &key.target_id.as_uuid(),
                    &key.relation_type,
                    &metadata.to_json(),
                    &Utc::now(),
                ],
            )
            .await
            .map_err(pg_error)?;
        row_to_relation(&row)
    }

    async fn delete_relation(&self, key: &RelationKey) -> MosaicResult<bool> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM entity_relations \
                 WHERE source_id = $1 AND target_id = $2 AND relation_type = $3",
                &[&key.source_id.as_uuid(), &key.target_id.as_uuid(), &key.relation_type],
            )
            .await
            .map_err(pg_error)?;
        Ok(deleted > 0)
    }

    async fn get_relation(&self, key: &RelationKey) -> MosaicResult<Option<EntityRelation>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM entity_relations \
                     WHERE source_id = $1 AND target_id = $2 AND relation_type = $3",
                    RELATION_COLUMNS
                ),
                &[&key.source_id.as_uuid(), &key.target_id.as_uuid(), &key.relation_type],
            )
            .await
            .map_err(pg_error)?;
        row.as_ref().map(row_to_relation).transpose()
    }

    async fn related_from(
        &self,
        source_id: EntityId,
        relation_type: &str,
        target_type: Option<&str>,
        scope: TenantScope,
    ) -> MosaicResult<Vec<Entity>> {
        let (sql, params) = related_from_sql(source_id, relation_type, target_type, &scope);
        let conn = self.conn().await?;
        let rows = conn.query(&sql, &param_refs(&params)).await.map_err(pg_error)?;
        rows.iter().map(row_to_entity).collect()
    }

    async fn related_to(
        &self,
        target_id: EntityId,
        relation_type: &str,
        scope: TenantScope,
    ) -> MosaicResult<Vec<RelatedEntity>> {
        let (sql, params) = related_to_sql(target_id, relation_type, &scope);
        let conn = self.conn().await?;
        let rows = conn.query(&sql, &param_refs(&params)).await.map_err(pg_error)?;

        rows.iter()
            .map(|row| {
                Ok(RelatedEntity {
                    entity: row_to_entity(row)?,
                    relation_metadata: attributes_column(row, "relation_metadata")?,
                    joined_at: row.try_get("joined_at").map_err(pg_error)?,
                })
            })
            .collect()
    }
}

// ============================================================================
// QUERY ENGINE
// ============================================================================

#[async_trait]
impl QueryEngine for DbClient {
    async fn run_query(&self, plan: &QueryPlan) -> MosaicResult<Page<Entity>> {
        let sql = entity_query_sql(plan);
        tracing::debug!(count_sql = %sql.count_sql, select_sql = %sql.select_sql, "Entity query");

        let conn = self.conn().await?;
        let count_row = conn
            .query_one(&sql.count_sql, &param_refs(&sql.count_params))
            .await
            .map_err(pg_error)?;
        let total: i64 = count_row.try_get(0).map_err(pg_error)?;

        let rows = conn
            .query(&sql.select_sql, &param_refs(&sql.select_params))
            .await
            .map_err(pg_error)?;
        let entities = rows.iter().map(row_to_entity).collect::<MosaicResult<Vec<_>>>()?;

        Ok(Page {
            entities,
            total: u64::try_from(total).unwrap_or(0),
            page: plan.page,
            limit: plan.limit,
        })
    }

    async fn run_search(&self, plan: &QueryPlan) -> MosaicResult<Vec<Entity>> {
        let sql = entity_query_sql(plan);
        let conn = self.conn().await?;
        let rows = conn
            .query(&sql.select_sql, &param_refs(&sql.select_params))
            .await
            .map_err(pg_error)?;
        rows.iter().map(row_to_entity).collect()
    }
}

// ============================================================================
// PRINCIPALS, SWEEP, HEALTH
// ============================================================================

#[async_trait]
impl PrincipalDirectory for DbClient {
    async fn principal_exists(&self, id: PrincipalId) -> MosaicResult<bool> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM principals WHERE id = $1)",
                &[&id.as_uuid()],
            )
            .await
            .map_err(pg_error)?;
        row.try_get(0).map_err(pg_error)
    }
}

const ORPHANED_RELATION_PREDICATE: &str = "NOT EXISTS (SELECT 1 FROM entities e WHERE e.id = r.source_id) \
     OR NOT EXISTS (SELECT 1 FROM entities e WHERE e.id = r.target_id)";

#[async_trait]
impl ConsistencySweep for DbClient {
    async fn sweep(&self, dry_run: bool) -> MosaicResult<SweepReport> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(pg_error)?;

        let orphan_rows = tx
            .query(
                &format!(
                    "SELECT r.source_id, r.target_id, r.relation_type FROM entity_relations r \
                     WHERE {} ORDER BY r.source_id, r.target_id, r.relation_type",
                    ORPHANED_RELATION_PREDICATE
                ),
                &[],
            )
            .await
            .map_err(pg_error)?;
        let orphaned_relations = orphan_rows
            .iter()
            .map(|row| {
                Ok(RelationKey::new(
                    EntityId::new(row.try_get("source_id").map_err(pg_error)?),
                    EntityId::new(row.try_get("target_id").map_err(pg_error)?),
                    row.try_get::<_, String>("relation_type").map_err(pg_error)?,
                ))
            })
            .collect::<MosaicResult<Vec<_>>>()?;

        let untyped_rows = tx
            .query(
                "SELECT e.id FROM entities e \
                 WHERE NOT EXISTS (SELECT 1 FROM entity_types t WHERE t.name = e.type_name) \
                 ORDER BY e.id",
                &[],
            )
            .await
            .map_err(pg_error)?;
        let untyped_entities = untyped_rows
            .iter()
            .map(|row| row.try_get::<_, Uuid>(0).map(EntityId::new).map_err(pg_error))
            .collect::<MosaicResult<Vec<_>>>()?;

        let relations_removed = if dry_run || orphaned_relations.is_empty() {
            0
        } else {
            tx.execute(
                &format!("DELETE FROM entity_relations r WHERE {}", ORPHANED_RELATION_PREDICATE),
                &[],
            )
            .await
            .map_err(pg_error)?
        };
        tx.commit().await.map_err(pg_error)?;

        Ok(SweepReport {
            dry_run,
            orphaned_relations,
            untyped_entities,
            relations_removed,
        })
    }
}

#[async_trait]
impl StoreHealth for DbClient {
    async fn ping(&self) -> MosaicResult<()> {
        let conn = self.conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(pg_error)?;
        Ok(())
    }
}
