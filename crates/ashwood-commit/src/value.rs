//! SQL parameter values and object identities.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A column value as bound to or read from SQL.
///
/// Serialized untagged, so a JSON change set writes plain literals:
/// `null`, `42`, `1.5`, `"text"`, `[0, 255]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

// Reals compare by bit pattern so values can key maps.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(v) => v.hash(state),
            Value::Real(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Blob(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "'{v}'"),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Primary key values by column name.
pub type KeyMap = BTreeMap<String, Value>;

/// Identity of a persistent object within one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKey {
    /// Caller-chosen tag for an object not yet inserted.
    Temporary(String),
    /// Primary key of a stored row.
    Permanent(KeyMap),
}

/// Table plus key: identifies one object across a change set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub table: String,
    pub key: ObjectKey,
}

impl ObjectId {
    pub fn temporary(table: impl Into<String>, tag: impl Into<String>) -> Self {
        ObjectId {
            table: table.into(),
            key: ObjectKey::Temporary(tag.into()),
        }
    }

    pub fn permanent<K, V>(table: impl Into<String>, key: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        ObjectId {
            table: table.into(),
            key: ObjectKey::Permanent(
                key.into_iter()
                    .map(|(column, value)| (column.into(), value.into()))
                    .collect(),
            ),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.key, ObjectKey::Temporary(_))
    }

    /// The primary key, if this id is permanent.
    pub fn key_map(&self) -> Option<&KeyMap> {
        match &self.key {
            ObjectKey::Permanent(map) => Some(map),
            ObjectKey::Temporary(_) => None,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            ObjectKey::Temporary(tag) => write!(f, "{}<{tag}>", self.table),
            ObjectKey::Permanent(map) => {
                write!(f, "{}{{", self.table)?;
                for (i, (column, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{column}={value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn values_parse_from_plain_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, 7, 2.5, "x", [1, 2]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Integer(7),
                Value::Real(2.5),
                Value::Text("x".into()),
                Value::Blob(vec![1, 2]),
            ]
        );
    }

    #[test]
    fn permanent_ids_hash_by_key_content() {
        let a = ObjectId::permanent("NODE", [("ID", 1)]);
        let b = ObjectId::permanent("NODE", [("ID", 1)]);
        let c = ObjectId::permanent("NODE", [("ID", 2)]);
        let set: HashSet<ObjectId> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ids_display_readably() {
        assert_eq!(ObjectId::temporary("ARTIST", "a1").to_string(), "ARTIST<a1>");
        assert_eq!(
            ObjectId::permanent("ARTIST", [("ID", 5)]).to_string(),
            "ARTIST{ID=5}"
        );
    }

    #[test]
    fn id_json_shape() {
        let id: ObjectId =
            serde_json::from_str(r#"{"table": "A", "key": {"permanent": {"ID": 3}}}"#).unwrap();
        assert_eq!(id, ObjectId::permanent("A", [("ID", 3)]));
        let tmp: ObjectId = serde_json::from_str(r#"{"table": "A", "key": {"temporary": "t"}}"#).unwrap();
        assert!(tmp.is_temporary());
    }
}
