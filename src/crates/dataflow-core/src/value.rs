//! The runtime payload type carried across every port.
//!
//! A [`Value`] is whatever a task argument or return value actually is once
//! the pipeline is running: a scalar, a structured document, or a path to a
//! file on disk (the representation used for every [`crate::typesys::MetaType::File`]
//! typed port, matching the on-disk transfer contract used by the
//! multiprocess and batch backends).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed value flowing along an edge.
///
/// Files are represented as a path rather than inline bytes: every backend
/// (in-process, multiprocess, batch) moves file-typed values by reference,
/// since the whole point of the file-port family is to avoid copying
/// potentially large artifacts through a serialized channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Dict(serde_json::Value),
    /// Path to a file on disk, tagged with the file format it was produced
    /// or expected as (`csv`, `xls`, `png`, ...).
    File { path: String, format: String },
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            Value::File { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn file_format(&self) -> Option<&str> {
        match self {
            Value::File { format, .. } => Some(format),
            _ => None,
        }
    }

    /// A path- or URL-like string this value carries, whether it arrived as
    /// a plain literal (`Str`, the shape a bound call-site argument always
    /// takes) or as an already-tagged `File`. Used by
    /// [`crate::pass::stage::Stage`] to spot remote-scheme literals, which
    /// are indistinguishable from any other string until a scheme is
    /// checked.
    pub fn as_path_like(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Reads a named field out of a `Dict` value. Backs dependent return
    /// annotations of the form `@argsN.field`.
    pub fn get_field(&self, field: &str) -> Option<Value> {
        match self {
            Value::Dict(json) => json.get(field).map(|v| Value::from_json(v.clone())),
            _ => None,
        }
    }

    fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) if n.is_i64() => Value::Int(n.as_i64().unwrap()),
            serde_json::Value::Number(n) => Value::Float(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::Str(s),
            other => Value::Dict(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Dict(v) => write!(f, "{v}"),
            Value::File { path, format } => write!(f, "{path} ({format})"),
        }
    }
}
