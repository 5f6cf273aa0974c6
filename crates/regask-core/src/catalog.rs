//! Schema catalog: the curated description of queryable registry entities.
//!
//! The catalog is the single source of truth for what the pipeline may
//! reference. Every composed plan is validated against it before execution,
//! and classification/synthesis prompts are built from it, so free text can
//! never smuggle an unknown field into a query.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::errors::{RegaskError, RegaskResult};

// ============================================================================
// Entities and fields
// ============================================================================

/// Queryable registry entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// The canonical company record (one per registry identifier).
    Companies,
    /// Branch/unit records, each owned by exactly one company.
    Establishments,
}

impl EntityKind {
    /// Entity name as it appears in plans and the storage layer.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Establishments => "establishments",
        }
    }

    /// Storage-layer table reference for this entity.
    pub fn table_ref(&self) -> regask_db::TableRef {
        match self {
            Self::Companies => regask_db::TableRef::Companies,
            Self::Establishments => regask_db::TableRef::Establishments,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value type of a catalog field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free or coded text.
    Text,
    /// ISO 8601 date string.
    Date,
}

/// How a field participates in retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Searchable {
    /// Eligible for name-resolution retrieval (exact/lexical/semantic).
    Name,
    /// Filterable only; never used for fuzzy name resolution.
    Filter,
}

/// One queryable field of an entity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Field name, matching the storage-layer column.
    pub name: &'static str,
    /// Value type.
    pub field_type: FieldType,
    /// Retrieval role.
    pub searchable: Searchable,
    /// Human-readable description, used in prompts.
    pub description: &'static str,
}

const fn field(
    name: &'static str,
    field_type: FieldType,
    searchable: Searchable,
    description: &'static str,
) -> FieldDescriptor {
    FieldDescriptor {
        name,
        field_type,
        searchable,
        description,
    }
}

// ============================================================================
// SchemaCatalog
// ============================================================================

const COMPANY_FIELDS: &[FieldDescriptor] = &[
    field("cnpj_root", FieldType::Text, Searchable::Name, "registry identifier"),
    field("legal_name", FieldType::Text, Searchable::Name, "legal name"),
    field("trade_name", FieldType::Text, Searchable::Name, "trade name"),
    field("status", FieldType::Text, Searchable::Filter, "registration status"),
    field("activity_code", FieldType::Text, Searchable::Filter, "primary activity code"),
    field(
        "secondary_activity_codes",
        FieldType::Text,
        Searchable::Filter,
        "secondary activity codes",
    ),
    field("street", FieldType::Text, Searchable::Filter, "registered street address"),
    field("city", FieldType::Text, Searchable::Filter, "registered city"),
    field("state", FieldType::Text, Searchable::Filter, "registered state"),
    field("postal_code", FieldType::Text, Searchable::Filter, "postal code"),
    field("registered_on", FieldType::Date, Searchable::Filter, "registration date"),
];

const ESTABLISHMENT_FIELDS: &[FieldDescriptor] = &[
    field("company_id", FieldType::Text, Searchable::Filter, "owning company identifier"),
    field("unit_id", FieldType::Text, Searchable::Filter, "unit identifier"),
    field(
        "branch_flag",
        FieldType::Text,
        Searchable::Filter,
        "headquarters ('1') or branch ('2')",
    ),
    field("street", FieldType::Text, Searchable::Filter, "unit street address"),
    field("city", FieldType::Text, Searchable::Filter, "unit city"),
    field("state", FieldType::Text, Searchable::Filter, "unit state"),
    field("postal_code", FieldType::Text, Searchable::Filter, "unit postal code"),
    field("activity_code", FieldType::Text, Searchable::Filter, "unit activity code"),
    field("status", FieldType::Text, Searchable::Filter, "unit status"),
];

/// The curated schema catalog.
///
/// Fixed at startup and shared immutably across all requests.
#[derive(Debug)]
pub struct SchemaCatalog {
    entities: Vec<(EntityKind, &'static [FieldDescriptor])>,
}

impl SchemaCatalog {
    /// The built-in catalog for the company registry.
    pub fn builtin() -> Self {
        Self {
            entities: vec![
                (EntityKind::Companies, COMPANY_FIELDS),
                (EntityKind::Establishments, ESTABLISHMENT_FIELDS),
            ],
        }
    }

    /// Process-wide shared catalog instance.
    pub fn shared() -> &'static Self {
        static CATALOG: OnceLock<SchemaCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::builtin)
    }

    /// All entities in the catalog.
    pub fn entities(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.entities.iter().map(|(kind, _)| *kind)
    }

    /// Fields of an entity.
    pub fn fields_for(&self, entity: EntityKind) -> &'static [FieldDescriptor] {
        self.entities
            .iter()
            .find(|(kind, _)| *kind == entity)
            .map(|(_, fields)| *fields)
            .unwrap_or(&[])
    }

    /// Fields of an entity, resolved by name.
    pub fn fields_for_name(&self, name: &str) -> RegaskResult<&'static [FieldDescriptor]> {
        self.entities
            .iter()
            .find(|(kind, _)| kind.name() == name)
            .map(|(_, fields)| *fields)
            .ok_or_else(|| RegaskError::UnknownEntity(name.to_string()))
    }

    /// Look up a single field descriptor.
    pub fn field(&self, entity: EntityKind, name: &str) -> Option<&FieldDescriptor> {
        self.fields_for(entity).iter().find(|f| f.name == name)
    }

    /// Whether an entity has a field with the given name.
    pub fn has_field(&self, entity: EntityKind, name: &str) -> bool {
        self.field(entity, name).is_some()
    }

    /// Check the catalog against the storage layer's column allowlists.
    ///
    /// Every catalog field must exist as a storage column; a mismatch means
    /// validated plans could still be rejected at execution time, which must
    /// be impossible. Fatal at startup.
    pub fn validate(&self) -> RegaskResult<()> {
        for (entity, fields) in &self.entities {
            let columns = entity.table_ref().columns();
            for descriptor in *fields {
                if !columns.contains(&descriptor.name) {
                    return Err(RegaskError::schema(format!(
                        "catalog field `{}.{}` has no storage column",
                        entity.name(),
                        descriptor.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Render the catalog as a compact prompt fragment.
    pub fn prompt_summary(&self) -> String {
        let mut out = String::new();
        for (entity, fields) in &self.entities {
            out.push_str(entity.name());
            out.push_str(": ");
            let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
            out.push_str(&names.join(", "));
            out.push('\n');
        }
        out
    }
}
