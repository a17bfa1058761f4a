//! Normalized event representation.
//!
//! Readers (external) decode their own formats into [`Event`]s; everything
//! downstream of this module only ever sees this shape.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Enter,
    Leave,
    Instant,
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enter" | "begin" | "b" => Ok(Self::Enter),
            "leave" | "exit" | "end" | "e" => Ok(Self::Leave),
            "instant" | "i" => Ok(Self::Instant),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enter => "Enter",
            Self::Leave => "Leave",
            Self::Instant => "Instant",
        };
        f.write_str(s)
    }
}

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Non-negative integral value, used for byte counts and peer ids
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) if *v >= 0 => Some(*v as u64),
            Self::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Text(_))
    }

    /// Numbers compare numerically, text lexicographically; mixed pairs do not compare
    pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stream-local sequence number, assigned by the owning stream
    #[serde(default)]
    pub index: usize,

    /// Nanoseconds in the dataset's clock domain
    pub timestamp: i64,

    pub kind: EventKind,

    /// Function or region name (required for Enter/Leave)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub process_id: u32,

    #[serde(default)]
    pub thread_id: u32,

    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Event {
    pub fn new(kind: EventKind, timestamp: i64, name: Option<&str>) -> Self {
        Self {
            index: 0,
            timestamp,
            kind,
            name: name.map(str::to_string),
            process_id: 0,
            thread_id: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn enter(timestamp: i64, name: &str) -> Self {
        Self::new(EventKind::Enter, timestamp, Some(name))
    }

    pub fn leave(timestamp: i64, name: &str) -> Self {
        Self::new(EventKind::Leave, timestamp, Some(name))
    }

    pub fn instant(timestamp: i64, name: &str) -> Self {
        Self::new(EventKind::Instant, timestamp, Some(name))
    }

    pub fn on(mut self, process_id: u32, thread_id: u32) -> Self {
        self.process_id = process_id;
        self.thread_id = thread_id;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// First attribute present under any of the given names
    pub fn attr_any(&self, names: &[&str]) -> Option<&AttrValue> {
        names.iter().find_map(|n| self.attributes.get(*n))
    }

    /// Key used to keep one call stack per execution location
    pub fn location(&self) -> (u32, u32) {
        (self.process_id, self.thread_id)
    }

    pub fn is_enter(&self) -> bool {
        self.kind == EventKind::Enter
    }

    pub fn is_leave(&self) -> bool {
        self.kind == EventKind::Leave
    }
}
