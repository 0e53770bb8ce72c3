use std::fmt;

use facet::Facet;

/// A JSON number kept as its decimal source text.
///
/// Produced for dynamic targets when `use_number` is on, and usable as a
/// record field type for lossless pass-through of numeric literals.
#[derive(Facet, Debug, Clone, PartialEq, Eq, Default)]
pub struct Number(String);

impl Number {
    pub fn from_literal(text: String) -> Self {
        Number(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.parse().ok()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The dynamic "unknown shape" target: what a JSON document decodes into
/// when the destination doesn't say.
///
/// Objects keep insertion order so that re-encoding a decoded document is
/// stable.
#[derive(Facet, Debug, Clone, PartialEq)]
#[repr(u8)]
pub enum Value {
    Null,
    Bool(bool),
    /// Numbers land here by default.
    Num(f64),
    /// Numbers land here instead when `use_number` is on.
    NumberLit(Number),
    Str(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Object member lookup by key; `None` for non-objects too.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::NumberLit(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}
