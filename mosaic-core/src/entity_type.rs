//! Entity type definitions (the type registry's records).

use crate::error::ValidationError;
use crate::identity::{EntityTypeId, Timestamp};
use crate::tenancy::Tenancy;
use crate::value::{AttrValue, Attributes};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TYPE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]{0,63}$").expect("valid type name regex"));

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Kind of an attribute declared in a type schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Number,
    Boolean,
    /// RFC 3339 timestamp stored as a string.
    DateTime,
    Array,
    Object,
    /// Identifier of another entity stored as a string.
    Reference,
}

impl AttributeKind {
    /// Whether `value` fits this kind. `null` never fits; callers decide
    /// whether a null is acceptable.
    pub fn accepts(&self, value: &AttrValue) -> bool {
        match (self, value) {
            (AttributeKind::String, AttrValue::String(_)) => true,
            (AttributeKind::Number, AttrValue::Integer(_) | AttrValue::UInt(_) | AttrValue::Float(_)) => true,
            (AttributeKind::Boolean, AttrValue::Bool(_)) => true,
            (AttributeKind::DateTime, AttrValue::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
            }
            (AttributeKind::Array, AttrValue::Array(_)) => true,
            (AttributeKind::Object, AttrValue::Object(_)) => true,
            (AttributeKind::Reference, AttrValue::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
            _ => false,
        }
    }
}

/// One attribute declared in a type schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<AttrValue>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<AttrValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A registered record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub id: EntityTypeId,
    /// Normalized unique name; this, not `id`, is what entities reference.
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    #[serde(rename = "applicationId")]
    pub tenancy: Tenancy,
    /// Advisory schema, ordered as declared.
    pub schema: Vec<AttributeDef>,
    pub is_system: bool,
    pub icon: Option<String>,
    pub category: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An advisory schema mismatch. Never blocks a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub attribute: String,
    pub message: String,
}

impl EntityType {
    /// Look up a declared attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.schema.iter().find(|def| def.name == name)
    }

    /// Whether `key` is declared in the schema (the filter/sort allow-list).
    pub fn declares(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    /// Compare a payload against the advisory schema.
    pub fn check_attributes(&self, attributes: &Attributes) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        for def in &self.schema {
            match attributes.get(&def.name) {
                None | Some(AttrValue::Null) if def.required && def.default.is_none() => {
                    violations.push(SchemaViolation {
                        attribute: def.name.clone(),
                        message: "required attribute is missing".to_string(),
                    });
                }
                Some(value) if !matches!(value, AttrValue::Null) && !def.kind.accepts(value) => {
                    violations.push(SchemaViolation {
                        attribute: def.name.clone(),
                        message: format!("expected {:?}, got {}", def.kind, value.kind_name()),
                    });
                }
                _ => {}
            }
        }
        violations
    }

    /// Sort key for registry listings: category (missing last), then display name.
    pub fn listing_key(&self) -> (bool, String, String) {
        (
            self.category.is_none(),
            self.category.clone().unwrap_or_default(),
            self.display_name.clone(),
        )
    }
}

/// Input for registering a new type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntityType {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "applicationId")]
    pub tenancy: Tenancy,
    #[serde(default)]
    pub schema: Vec<AttributeDef>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl NewEntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            tenancy: Tenancy::Global,
            schema: Vec::new(),
            is_system: false,
            icon: None,
            category: None,
        }
    }

    /// Build the stored record, normalizing the name.
    pub fn into_entity_type(self, now: Timestamp) -> Result<EntityType, ValidationError> {
        use crate::identity::EntityIdType;

        let name = normalize_type_name(&self.name)?;
        validate_schema(&self.schema)?;
        let display_name = self
            .display_name
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.name.trim().to_string());

        Ok(EntityType {
            id: EntityTypeId::now_v7(),
            name,
            display_name,
            description: self.description,
            tenancy: self.tenancy,
            schema: self.schema,
            is_system: self.is_system,
            icon: self.icon,
            category: self.category,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Patch for an existing type. Present fields overwrite; `schema` replaces
/// the whole list. Name, system flag and tenancy are immutable.
///
/// The optional text fields distinguish an absent key (`None`, keep) from
/// an explicit `null` (`Some(None)`, clear).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypePatch {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub schema: Option<Vec<AttributeDef>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub icon: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
}

/// A key that is present deserializes to `Some`, even when its value is null.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl EntityTypePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.description.is_none()
            && self.schema.is_none()
            && self.icon.is_none()
            && self.category.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(schema) = &self.schema {
            validate_schema(schema)?;
        }
        Ok(())
    }

    /// Apply to a stored type.
    pub fn apply(self, ty: &mut EntityType, now: Timestamp) {
        if self.is_empty() {
            return;
        }
        if let Some(display_name) = self.display_name {
            ty.display_name = display_name;
        }
        if let Some(description) = self.description {
            ty.description = description;
        }
        if let Some(schema) = self.schema {
            ty.schema = schema;
        }
        if let Some(icon) = self.icon {
            ty.icon = icon;
        }
        if let Some(category) = self.category {
            ty.category = category;
        }
        ty.updated_at = now;
    }
}

/// Normalize a type name: trim, lowercase, collapse whitespace into `_`.
pub fn normalize_type_name(raw: &str) -> Result<String, ValidationError> {
    let lowered = raw.trim().to_lowercase();
    let normalized = WHITESPACE_RUN.replace_all(&lowered, "_").into_owned();

    if normalized.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
    }
    if !TYPE_NAME_PATTERN.is_match(&normalized) {
        return Err(ValidationError::InvalidValue {
            field: "name".to_string(),
            reason: format!(
                "'{}' must contain only lowercase letters, digits, '_' or '-'",
                normalized
            ),
        });
    }
    Ok(normalized)
}

fn validate_schema(schema: &[AttributeDef]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for def in schema {
        crate::query::validate_field_name(&def.name).map_err(|_| ValidationError::InvalidValue {
            field: "schema".to_string(),
            reason: format!("attribute name '{}' is not a valid identifier", def.name),
        })?;
        if !seen.insert(def.name.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "schema".to_string(),
                reason: format!("attribute '{}' declared twice", def.name),
            });
        }
    }
    Ok(())
}
