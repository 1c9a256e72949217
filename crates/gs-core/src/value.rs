//! The self-describing dynamic value carried through streams and storage.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A structurally self-describing value.
///
/// Every variant except [`StateValue::Bytes`] carries its own shape, which is
/// what lets the codec (see [`crate::codec`]) choose the compact
/// self-described envelope for it. `Bytes` is treated as opaque and falls
/// back to the dense columnar envelope once it crosses the size threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<StateValue>),
    /// Insertion-ordered, so a map decoded off the wire preserves the order
    /// its entries were set in — dispatch's alias-conflict resolution and
    /// `pick_one` adaptor rely on that order. Equality still compares as an
    /// unordered set of entries, so two maps built from the same entries in
    /// a different order still compare equal.
    Map(IndexMap<String, StateValue>),
}

impl StateValue {
    /// True for values that carry their own structural shape, i.e. every
    /// variant but an opaque [`StateValue::Bytes`] blob. Mirrors the
    /// pickle-vs-arrow split in the framework this runtime is modeled on.
    pub fn is_self_describing(&self) -> bool {
        !matches!(self, StateValue::Bytes(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            StateValue::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn is_default(&self) -> bool {
        match self {
            StateValue::Null => true,
            StateValue::Bool(b) => !*b,
            StateValue::Int(i) => *i == 0,
            StateValue::UInt(u) => *u == 0,
            StateValue::Float(f) => *f == 0.0,
            StateValue::Str(s) => s.is_empty(),
            StateValue::Bytes(b) => b.is_empty(),
            StateValue::List(l) => l.is_empty(),
            StateValue::Map(m) => m.is_empty(),
        }
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Str(s.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Str(s)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

/// A change set: fully-qualified variable name -> new value, in the order
/// entries were set so that dispatch's `pick_one` adaptor and alias-conflict
/// resolution can rely on iteration order.
pub type ChangeMap = IndexMap<String, StateValue>;
