//! Tenant and principal context.
//!
//! The upstream auth layer authenticates the caller and forwards the
//! resolved tenant and principal as headers. This extractor only parses
//! them; it does no authorization of its own.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use mosaic_core::{ApplicationId, EntityIdType, PrincipalId};
use std::str::FromStr;

use crate::error::ApiError;

pub const APPLICATION_HEADER: &str = "x-application-id";
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Caller context for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant of the caller, before the configured default is applied.
    pub application_id: Option<ApplicationId>,
    pub principal_id: Option<PrincipalId>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts) -> Result<Self, ApiError> {
        Ok(Self {
            application_id: header_id(parts, APPLICATION_HEADER)?,
            principal_id: header_id(parts, PRINCIPAL_HEADER)?,
        })
    }
}

fn header_id<T>(parts: &Parts, name: &str) -> Result<Option<T>, ApiError>
where
    T: EntityIdType + FromStr,
{
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| ApiError::invalid_format(name, "ASCII header value"))?
        .trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ApiError::invalid_format(name, &format!("{} UUID", T::ENTITY_NAME)))
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        RequestContext::from_parts(parts)
    }
}
