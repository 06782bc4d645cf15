// ABOUTME: Row and Value types shared by every engine and by the differ
// ABOUTME: Full-row equality plus a SHA-256 content fingerprint for hashed diffing

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// A single scalar column value.
///
/// The MySQL and PostgreSQL engines read tables through their text protocols,
/// so live rows only ever contain `Null`, `Text` and `Bytes`. The remaining
/// variants exist for callers that build rows by hand.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Feed a type-tagged encoding of the value into a hasher.
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            Value::Null => hasher.update([0u8]),
            Value::Bool(b) => {
                hasher.update([1u8]);
                hasher.update([*b as u8]);
            }
            Value::Int(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_le_bytes());
            }
            Value::Float(f) => {
                hasher.update([3u8]);
                hasher.update(f.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                hasher.update([4u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Bytes(b) => {
                hasher.update([5u8]);
                hasher.update((b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
        }
    }
}

// Floats compare by bit pattern so that equality agrees with the fingerprint.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => {
                    write!(f, "0x")?;
                    for byte in b {
                        write!(f, "{:02x}", byte)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// One tuple of a table: column names in table order, with their values.
///
/// Rows read from the same result set share one column list.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

/// The full contents of a table read at one point in time.
pub type RowSet = Vec<Row>;

impl Row {
    /// Build a row from a shared column list and matching values.
    ///
    /// Extra values are dropped and missing values become `Null` so that a
    /// row always has exactly one value per column.
    pub fn new(columns: Arc<[String]>, mut values: Vec<Value>) -> Self {
        values.resize(columns.len(), Value::Null);
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Iterate over `(column, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// SHA-256 over the row's columns in name-sorted order.
    ///
    /// Two rows that are equal under full-row equality always share a
    /// fingerprint regardless of column order. The converse is not assumed:
    /// callers confirm a fingerprint hit with `==`.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut order: Vec<usize> = (0..self.columns.len()).collect();
        order.sort_by(|a, b| self.columns[*a].cmp(&self.columns[*b]));

        let mut hasher = Sha256::new();
        for idx in order {
            let name = &self.columns[idx];
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            self.values[idx].hash_into(&mut hasher);
        }
        hasher.finalize().into()
    }
}

/// Full-row equality: same column set, every value equal.
impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        if self.values.len() != other.values.len() {
            return false;
        }
        if Arc::ptr_eq(&self.columns, &other.columns) || self.columns == other.columns {
            return self.values == other.values;
        }
        self.iter()
            .all(|(column, value)| other.get(column) == Some(value))
    }
}

impl Eq for Row {}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let (columns, values): (Vec<String>, Vec<Value>) = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(columns.into(), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_row_equality_requires_every_column() {
        let a = row(&[("id", 1.into()), ("name", "a".into())]);
        let b = row(&[("id", 1.into()), ("name", "a".into())]);
        let c = row(&[("id", 1.into()), ("name", "b".into())]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_row_equality_ignores_column_order() {
        let a = row(&[("id", 1.into()), ("name", "a".into())]);
        let b = row(&[("name", "a".into()), ("id", 1.into())]);

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_row_equality_different_column_sets() {
        let a = row(&[("id", 1.into()), ("name", "a".into())]);
        let b = row(&[("id", 1.into()), ("title", "a".into())]);
        let c = row(&[("id", 1.into())]);

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_null_and_empty_text_differ() {
        let a = row(&[("id", 1.into()), ("name", Value::Null)]);
        let b = row(&[("id", 1.into()), ("name", "".into())]);

        assert_ne!(a, b);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_value_type_is_part_of_identity() {
        assert_ne!(Value::Int(1), Value::Text("1".to_string()));
        assert_ne!(Value::Text("ab".to_string()), Value::Bytes(b"ab".to_vec()));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_fingerprint_separates_adjacent_columns() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = row(&[("x", "ab".into()), ("y", "c".into())]);
        let b = row(&[("x", "a".into()), ("y", "bc".into())]);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_row_new_pads_missing_values() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let r = Row::new(columns, vec![Value::Int(7)]);

        assert_eq!(r.len(), 2);
        assert_eq!(r.get("name"), Some(&Value::Null));
        assert_eq!(r.get("missing"), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![0xff, 0x01]).to_string(), "0xff01");
        assert_eq!(Value::Bytes(b"abc".to_vec()).to_string(), "abc");
    }
}
