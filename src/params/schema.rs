//! Static parameter schema, embedded at compile time.
//!
//! The schema pins the type of every field the engine understands. Section
//! writers are dispatched on it instead of inspecting runtime values, so an
//! unknown key or a wrongly typed value is rejected before any XML is built.

use std::sync::LazyLock;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{MqError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
}

impl SchemaType {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaNode {
    #[serde(rename = "type")]
    pub ty: SchemaType,
    /// Stable identifier, used to selectively skip fields during generic
    /// traversal (e.g. `#msmsParamsArray` gets a dedicated writer).
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Option<IndexMap<String, SchemaNode>>,
    #[serde(default)]
    pub items: Option<Box<SchemaNode>>,
}

impl SchemaNode {
    /// Property table of an object node.
    pub fn props(&self) -> Result<&IndexMap<String, SchemaNode>> {
        self.properties.as_ref().ok_or_else(|| {
            MqError::SchemaMismatch(format!("schema node of type {} has no properties", self.ty.name()))
        })
    }

    /// Schema of a single named property.
    pub fn prop(&self, name: &str) -> Result<&SchemaNode> {
        self.props()?
            .get(name)
            .ok_or_else(|| MqError::SchemaMismatch(format!("unknown key '{name}'")))
    }

    /// Item schema of an array node.
    pub fn item(&self) -> Result<&SchemaNode> {
        self.items.as_deref().ok_or_else(|| {
            MqError::SchemaMismatch(format!("schema node of type {} has no items", self.ty.name()))
        })
    }
}

pub static SCHEMA: LazyLock<SchemaNode> = LazyLock::new(|| {
    serde_json::from_str(include_str!("data/mqschema.json")).expect("embedded schema is valid JSON")
});

/// Schema of one top-level section.
pub fn section(name: &str) -> Result<&'static SchemaNode> {
    SCHEMA.prop(name)
}
