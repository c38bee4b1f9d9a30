//! Attribute values captured from, and applied to, live entities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance used when deciding whether a captured value already matches
/// the live one.
pub const VALUE_EPSILON: f64 = 1e-9;

/// A typed attribute value. Serialized as `{"type": ..., "value": ...}` so
/// the archive keeps the attribute type next to the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Double3([f64; 3]),
    String(String),
    DoubleArray(Vec<f64>),
}

impl AttrValue {
    /// Type name as written to the archive.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Double(_) => "double",
            AttrValue::Double3(_) => "double3",
            AttrValue::String(_) => "string",
            AttrValue::DoubleArray(_) => "double_array",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Double(v) => Some(*v),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            AttrValue::DoubleArray(values) => Some(values),
            _ => None,
        }
    }

    /// Equality with floating tolerance on every double component.
    pub fn approx_eq(&self, other: &AttrValue) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= VALUE_EPSILON;
        match (self, other) {
            (AttrValue::Double(a), AttrValue::Double(b)) => close(*a, *b),
            (AttrValue::Double3(a), AttrValue::Double3(b)) => {
                a.iter().zip(b.iter()).all(|(x, y)| close(*x, *y))
            }
            (AttrValue::DoubleArray(a), AttrValue::DoubleArray(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| close(*x, *y))
            }
            _ => self == other,
        }
    }
}

/// One captured attribute: value plus the flags the host reports for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: AttrValue,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Attribute {
    pub fn new(value: AttrValue) -> Self {
        Self {
            value,
            locked: false,
            alias: None,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }
}

/// Attribute name → attribute, ordered for deterministic archives.
pub type AttributeTable = BTreeMap<String, Attribute>;
