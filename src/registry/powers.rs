//! Power catalog: declared schemas for the game-mechanic effects items can
//! reference. Each power is a registered list of (field name, type tag,
//! required flag, default) resolved at registration time, so document
//! validation needs no runtime introspection. The effect implementations
//! themselves live outside this crate; the registry only validates that a
//! record's power entries match a registered schema.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::registry::types::PowerEntry;

/// Type tag for a declared power field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    Text,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::Int => value.as_i64().is_some(),
            // An integer literal in a hand-edited document is fine for a
            // float field.
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Text => value.is_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Text => "text",
        }
    }
}

/// Declared schema for one field of a power.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, ty: FieldType, default: Value) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: Some(default),
        }
    }
}

/// Declared schema for a power.
#[derive(Debug, Clone)]
pub struct PowerSpec {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

/// Violations found while checking a power entry against the catalog.
#[derive(Debug, Error)]
pub enum PowerError {
    #[error("unknown power '{power}'")]
    Unknown { power: String },

    #[error("power '{power}' is missing required field '{field}'")]
    MissingField { power: String, field: &'static str },

    #[error("power '{power}' field '{field}' must be {expected}")]
    WrongType {
        power: String,
        field: String,
        expected: &'static str,
    },
}

/// Registry of power schemas. The built-in set covers the stock effects;
/// extensions register theirs before records are loaded.
pub struct PowerCatalog {
    specs: BTreeMap<&'static str, PowerSpec>,
}

impl PowerCatalog {
    /// Create an empty catalog with no powers registered.
    pub fn empty() -> Self {
        Self {
            specs: BTreeMap::new(),
        }
    }

    /// Catalog preloaded with the stock power set.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(PowerSpec {
            name: "dummy",
            fields: vec![],
        });
        catalog.register(PowerSpec {
            name: "hurt",
            fields: vec![FieldSpec::required("damage", FieldType::Int)],
        });
        catalog.register(PowerSpec {
            name: "projectile",
            fields: vec![
                FieldSpec::optional("speed", FieldType::Float, Value::from(1.0)),
                FieldSpec::optional("gravity", FieldType::Bool, Value::from(true)),
                FieldSpec::optional("range", FieldType::Int, Value::from(32)),
            ],
        });
        catalog.register(PowerSpec {
            name: "flame",
            fields: vec![FieldSpec::optional(
                "duration",
                FieldType::Int,
                Value::from(20),
            )],
        });
        catalog.register(PowerSpec {
            name: "rush",
            fields: vec![
                FieldSpec::required("speed", FieldType::Float),
                FieldSpec::optional("duration", FieldType::Int, Value::from(40)),
            ],
        });
        catalog.register(PowerSpec {
            name: "command",
            fields: vec![
                FieldSpec::required("command", FieldType::Text),
                FieldSpec::optional("permission", FieldType::Text, Value::from("")),
            ],
        });
        catalog
    }

    /// Register (or replace) a power schema.
    pub fn register(&mut self, spec: PowerSpec) {
        self.specs.insert(spec.name, spec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.keys().copied()
    }

    /// Check one entry against its registered schema. Unknown field names
    /// are tolerated (forward compatibility with newer extensions); missing
    /// required fields and type mismatches are not.
    pub fn validate(&self, entry: &PowerEntry) -> Result<(), PowerError> {
        let spec = self.specs.get(entry.power.as_str()).ok_or_else(|| {
            PowerError::Unknown {
                power: entry.power.clone(),
            }
        })?;
        for field in &spec.fields {
            match entry.fields.get(field.name) {
                Some(value) => {
                    if !field.ty.matches(value) {
                        return Err(PowerError::WrongType {
                            power: entry.power.clone(),
                            field: field.name.to_string(),
                            expected: field.ty.as_str(),
                        });
                    }
                }
                None if field.required => {
                    return Err(PowerError::MissingField {
                        power: entry.power.clone(),
                        field: field.name,
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Fill in declared defaults for fields the document omitted.
    pub fn apply_defaults(&self, entry: &mut PowerEntry) {
        if let Some(spec) = self.specs.get(entry.power.as_str()) {
            for field in &spec.fields {
                if let Some(default) = &field.default {
                    entry
                        .fields
                        .entry(field.name.to_string())
                        .or_insert_with(|| default.clone());
                }
            }
        }
    }
}

impl Default for PowerCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
