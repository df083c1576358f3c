//! In-memory result rows.

use crate::value::Value;
use serde::Serialize;
use serde::ser::SerializeMap;
use std::collections::BTreeMap;

/// Related rows attached to a parent row by eager loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Related {
    /// Single related row (has-one / belongs-to).
    One(Row),
    /// Ordered sequence of related rows (has-many / through).
    Many(Vec<Row>),
}

impl Related {
    /// The rows as a slice, regardless of arity.
    pub fn rows(&self) -> &[Row] {
        match self {
            Related::One(row) => std::slice::from_ref(row),
            Related::Many(rows) => rows,
        }
    }
}

/// An ordered mapping of column name to value, as returned by the driver.
///
/// After eager loading a row may additionally carry related rows keyed by
/// relation name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
    related: BTreeMap<String, Related>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from (column, value) pairs, preserving order.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            related: BTreeMap::new(),
        }
    }

    /// Value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Set a column value, replacing any existing value for that name.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// The (column, value) pairs in order.
    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    /// The pairs minus one column, for primary-key diffing in `save`.
    pub fn without(&self, column: &str) -> Vec<(String, Value)> {
        self.columns
            .iter()
            .filter(|(name, _)| name != column)
            .cloned()
            .collect()
    }

    /// Value of the first column. Used for scalar queries like `count(*)`.
    pub fn first_value(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    /// Related rows attached under a relation name, if any.
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    /// Attach a single related row.
    pub fn attach_one(&mut self, name: impl Into<String>, row: Row) {
        self.related.insert(name.into(), Related::One(row));
    }

    /// Attach an ordered sequence of related rows.
    pub fn attach_many(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.related.insert(name.into(), Related::Many(rows));
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// Rows serialize as one flat JSON object: columns first, then related rows
// under their relation names.
impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + self.related.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        for (name, related) in &self.related {
            map.serialize_entry(name, related)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set() {
        let mut row = Row::from_pairs(vec![("id", 1i64), ("age", 30i64)]);
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("missing"), None);

        row.set("age", 31i64);
        assert_eq!(row.get("age"), Some(&Value::Int(31)));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn without_drops_one_column() {
        let row = Row::from_pairs(vec![("id", Value::from(1i64)), ("title", Value::from("a"))]);
        let rest = row.without("id");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, "title");
    }

    #[test]
    fn serializes_to_flat_json() {
        let mut row = Row::from_pairs(vec![("id", 1i64)]);
        row.set("title", "a");
        row.attach_many("comments", vec![Row::from_pairs(vec![("id", 2i64)])]);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 1, "title": "a", "comments": [{"id": 2}]})
        );
    }

    #[test]
    fn related_attachment() {
        let mut row = Row::from_pairs(vec![("id", 1i64)]);
        row.attach_many("comments", vec![Row::from_pairs(vec![("id", 10i64)])]);
        let rel = row.related("comments").unwrap();
        assert_eq!(rel.rows().len(), 1);
        assert!(row.related("tags").is_none());
    }
}
