//! Tagged status values.
//!
//! Header-definition defaults, live status values and command arguments all share one
//! variant type so the type of a field is resolved once, when the definition table is
//! loaded, instead of during header assembly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Mapping from status alias (or parameter name) to its current value.
pub type StatusMap = HashMap<String, StatusValue>;

/// Declared type of a header field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Float,
    Int,
}

impl ValueType {
    /// Parse a type name as written in a definition file.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "float" => Some(Self::Float),
            "int" => Some(Self::Int),
            _ => None,
        }
    }

    /// Coerce raw text into a value of this type.
    pub fn coerce(self, raw: &str) -> Result<StatusValue, String> {
        match self {
            Self::String => Ok(StatusValue::Str(raw.to_string())),
            Self::Float => raw
                .parse::<f64>()
                .map(StatusValue::Float)
                .map_err(|e| format!("'{}' is not a float: {}", raw, e)),
            Self::Int => raw
                .parse::<i64>()
                .map(StatusValue::Int)
                .map_err(|e| format!("'{}' is not an int: {}", raw, e)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Float => write!(f, "float"),
            Self::Int => write!(f, "int"),
        }
    }
}

/// A status or header value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl StatusValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Str(_) => ValueType::String,
            Self::Float(_) => ValueType::Float,
            Self::Int(_) => ValueType::Int,
        }
    }

    /// Numeric view of the value; strings are parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Integer view of the value. Floats are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Self::Float(_) => None,
            Self::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(|f| Self::Float(f).as_i64()))
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view accepting the spellings used on the query socket.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Int(v) => Some(*v != 0),
            Self::Float(v) => Some(*v != 0.0),
            Self::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
                "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
                _ => None,
            },
        }
    }

    /// Classify a token received as text: integers, then floats, else a string.
    pub fn infer(token: &str) -> Self {
        if let Ok(v) = token.parse::<i64>() {
            Self::Int(v)
        } else if let Ok(v) = token.parse::<f64>() {
            Self::Float(v)
        } else {
            Self::Str(token.to_string())
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Float(v) => write!(f, "{:?}", v),
            Self::Int(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for StatusValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for StatusValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}
