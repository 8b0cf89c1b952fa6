//! Path extractor for `/:type_name/:id` routes.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use mosaic_core::{EntityId, EntityIdType};

use crate::error::ApiError;

/// Type name and entity id taken from the request path.
///
/// The id is parsed eagerly so a malformed UUID is a 400 with the offending
/// value, not a generic path rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPath {
    pub type_name: String,
    pub id: EntityId,
}

impl EntityPath {
    pub fn parse(type_name: String, raw_id: &str) -> Result<Self, ApiError> {
        let id = raw_id.trim().parse::<EntityId>().map_err(|_| {
            ApiError::invalid_format("id", &format!("{} UUID", EntityId::ENTITY_NAME))
                .with_details(serde_json::json!({ "field": "id", "value": raw_id }))
        })?;
        Ok(Self { type_name, id })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for EntityPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((type_name, raw_id)) = Path::<(String, String)>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::invalid_input(format!("Invalid path: {}", e)))?;
        EntityPath::parse(type_name, &raw_id)
    }
}
