//! Error types for Mosaic operations
//!
//! "Not found" is deliberately absent: lookups return `Option` and deletes
//! return `bool`, so a missing record is a negative result, not a failure.

use crate::identity::PrincipalId;
use thiserror::Error;

/// Validation errors, detected before any write happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Owner {owner_id} does not exist")]
    InvalidOwner { owner_id: PrincipalId },

    #[error("Entity type name already registered: {name}")]
    DuplicateName { name: String },

    #[error("Malformed filter on field '{field}': {reason}")]
    MalformedFilter { field: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },
}

/// Storage layer errors. These are opaque to callers and never retried here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("Failed to (de)serialize {what}: {reason}")]
    Serialization { what: String, reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Mosaic errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MosaicError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MosaicError {
    /// Shorthand for an opaque backend failure.
    pub fn backend(reason: impl Into<String>) -> Self {
        MosaicError::Storage(StorageError::Backend {
            reason: reason.into(),
        })
    }

    /// Shorthand for a rejected filter or sort field.
    pub fn malformed_filter(field: impl Into<String>, reason: impl Into<String>) -> Self {
        MosaicError::Validation(ValidationError::MalformedFilter {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MosaicError::Validation(_))
    }
}

/// Result type alias for Mosaic operations.
pub type MosaicResult<T> = Result<T, MosaicError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EntityIdType;

    #[test]
    fn test_invalid_owner_display() {
        let owner_id = PrincipalId::now_v7();
        let err = ValidationError::InvalidOwner { owner_id };
        let msg = format!("{}", err);
        assert!(msg.contains("Owner"));
        assert!(msg.contains(&owner_id.to_string()));
    }

    #[test]
    fn test_duplicate_name_display() {
        let err = ValidationError::DuplicateName {
            name: "note".to_string(),
        };
        assert!(format!("{}", err).contains("note"));
    }

    #[test]
    fn test_malformed_filter_helper() {
        let err = MosaicError::malformed_filter("body; DROP", "not an identifier");
        assert!(err.is_validation());
        let msg = format!("{}", err);
        assert!(msg.contains("Malformed filter"));
        assert!(msg.contains("body; DROP"));
    }

    #[test]
    fn test_mosaic_error_from_variants() {
        let validation = MosaicError::from(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
        assert!(matches!(validation, MosaicError::Validation(_)));

        let storage = MosaicError::from(StorageError::Unavailable {
            reason: "pool closed".to_string(),
        });
        assert!(matches!(storage, MosaicError::Storage(_)));
        assert!(!storage.is_validation());

        let config = MosaicError::from(ConfigError::MissingRequired {
            field: "MOSAIC_DB_HOST".to_string(),
        });
        assert!(matches!(config, MosaicError::Config(_)));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_page_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_page_size"));
        assert!(msg.contains("must be positive"));
    }
}
