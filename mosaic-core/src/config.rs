//! Store configuration.

use crate::error::ConfigError;
use crate::identity::ApplicationId;
use serde::{Deserialize, Serialize};

/// Limits and defaults applied by the store. Built once at start-up and
/// passed explicitly to whatever needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Page size used when a query asks for none.
    pub default_page_size: u32,
    /// Hard cap on any page or search result size.
    pub max_page_size: u32,
    pub default_search_limit: u32,
    /// Application assumed when a request carries no tenant.
    pub default_application: Option<ApplicationId>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            default_search_limit: 10,
            default_application: None,
        }
    }
}

impl StoreConfig {
    pub fn with_default_application(mut self, application_id: ApplicationId) -> Self {
        self.default_application = Some(application_id);
        self
    }

    /// Resolve a requested page size: zero means default, anything above the
    /// cap is capped.
    pub fn effective_limit(&self, requested: u32) -> u32 {
        let limit = if requested == 0 {
            self.default_page_size
        } else {
            requested
        };
        limit.clamp(1, self.max_page_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_page_size".to_string(),
                value: self.max_page_size.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_page_size".to_string(),
                value: self.default_page_size.to_string(),
                reason: format!("must be between 1 and {}", self.max_page_size),
            });
        }
        if self.default_search_limit == 0 || self.default_search_limit > self.max_page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_search_limit".to_string(),
                value: self.default_search_limit.to_string(),
                reason: format!("must be between 1 and {}", self.max_page_size),
            });
        }
        Ok(())
    }
}
