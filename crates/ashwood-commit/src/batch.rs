//! Per-table batches of parameterized SQL.
//!
//! A [`BatchQuery`] holds one statement shape (operation, table, written
//! columns, qualifier columns) and any number of rows. SQL is rendered per
//! row because a NULL qualifier value turns `col = ?` into `col IS NULL`.

use std::fmt::Write as _;

use crate::value::Value;

/// SQL operation of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    Insert,
    Update,
    Delete,
}

/// Values for one row of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    /// Values for `columns`, in order.
    pub values: Vec<Value>,
    /// Values for `qualifier_columns`, in order.
    pub qualifier: Vec<Value>,
}

/// A batch of same-shaped statements against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    pub kind: BatchKind,
    pub table: String,
    /// Columns written by INSERT or UPDATE.
    pub columns: Vec<String>,
    /// Columns matched in the WHERE clause of UPDATE or DELETE.
    pub qualifier_columns: Vec<String>,
    /// Whether the qualifier includes snapshot columns, so that a row
    /// count other than one is a conflict.
    pub uses_optimistic_lock: bool,
    pub rows: Vec<BatchRow>,
}

/// Outcome of executing a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Rows affected by each statement, in row order.
    pub counts: Vec<usize>,
    /// Database-generated row key of each inserted row, if any.
    pub generated_keys: Vec<Option<i64>>,
}

impl BatchQuery {
    pub fn insert(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self::with_shape(BatchKind::Insert, table.into(), columns, Vec::new(), false)
    }

    pub fn update(
        table: impl Into<String>,
        columns: Vec<String>,
        qualifier_columns: Vec<String>,
        uses_optimistic_lock: bool,
    ) -> Self {
        Self::with_shape(
            BatchKind::Update,
            table.into(),
            columns,
            qualifier_columns,
            uses_optimistic_lock,
        )
    }

    pub fn delete(
        table: impl Into<String>,
        qualifier_columns: Vec<String>,
        uses_optimistic_lock: bool,
    ) -> Self {
        Self::with_shape(
            BatchKind::Delete,
            table.into(),
            Vec::new(),
            qualifier_columns,
            uses_optimistic_lock,
        )
    }

    fn with_shape(
        kind: BatchKind,
        table: String,
        columns: Vec<String>,
        qualifier_columns: Vec<String>,
        uses_optimistic_lock: bool,
    ) -> Self {
        BatchQuery {
            kind,
            table,
            columns,
            qualifier_columns,
            uses_optimistic_lock,
            rows: Vec::new(),
        }
    }

    /// True if a row with this shape can join the batch.
    pub fn accepts(&self, columns: &[String], qualifier_columns: &[String], uses_optimistic_lock: bool) -> bool {
        self.columns == columns
            && self.qualifier_columns == qualifier_columns
            && self.uses_optimistic_lock == uses_optimistic_lock
    }

    /// True if both batches render the same statement shape.
    pub fn same_shape(&self, other: &BatchQuery) -> bool {
        self.kind == other.kind
            && self.table == other.table
            && self.accepts(&other.columns, &other.qualifier_columns, other.uses_optimistic_lock)
    }

    pub fn push(&mut self, row: BatchRow) {
        debug_assert_eq!(row.values.len(), self.columns.len());
        debug_assert_eq!(row.qualifier.len(), self.qualifier_columns.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// SQL for a row whose qualifier values are all non-null.
    pub fn sql(&self) -> String {
        self.render(|_| false)
    }

    /// SQL for one row of this batch.
    pub fn sql_for(&self, row: &BatchRow) -> String {
        self.render(|i| row.qualifier.get(i).is_some_and(Value::is_null))
    }

    /// Bound parameters for one row, matching the placeholders of
    /// [`sql_for`](Self::sql_for).
    pub fn parameters<'r>(&self, row: &'r BatchRow) -> Vec<&'r Value> {
        let mut params: Vec<&Value> = row.values.iter().collect();
        params.extend(row.qualifier.iter().filter(|value| !value.is_null()));
        params
    }

    fn render(&self, qualifier_is_null: impl Fn(usize) -> bool) -> String {
        let mut sql = String::new();
        let mut placeholder = 0;
        let mut next = || {
            placeholder += 1;
            format!("?{placeholder}")
        };

        match self.kind {
            BatchKind::Insert => {
                if self.columns.is_empty() {
                    let _ = write!(sql, "INSERT INTO {} DEFAULT VALUES", self.table);
                } else {
                    let placeholders: Vec<String> = self.columns.iter().map(|_| next()).collect();
                    let _ = write!(
                        sql,
                        "INSERT INTO {} ({}) VALUES ({})",
                        self.table,
                        self.columns.join(", "),
                        placeholders.join(", ")
                    );
                }
                return sql;
            }
            BatchKind::Update => {
                let assignments: Vec<String> = self
                    .columns
                    .iter()
                    .map(|column| format!("{column} = {}", next()))
                    .collect();
                let _ = write!(sql, "UPDATE {} SET {}", self.table, assignments.join(", "));
            }
            BatchKind::Delete => {
                let _ = write!(sql, "DELETE FROM {}", self.table);
            }
        }

        if !self.qualifier_columns.is_empty() {
            let conditions: Vec<String> = self
                .qualifier_columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    if qualifier_is_null(i) {
                        format!("{column} IS NULL")
                    } else {
                        format!("{column} = {}", next())
                    }
                })
                .collect();
            let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn insert_sql() {
        let batch = BatchQuery::insert("ARTIST", cols(&["ID", "NAME"]));
        assert_eq!(batch.sql(), "INSERT INTO ARTIST (ID, NAME) VALUES (?1, ?2)");

        let empty = BatchQuery::insert("COUNTER", Vec::new());
        assert_eq!(empty.sql(), "INSERT INTO COUNTER DEFAULT VALUES");
    }

    #[test]
    fn update_numbers_qualifier_after_assignments() {
        let batch = BatchQuery::update("ARTIST", cols(&["NAME"]), cols(&["ID", "VERSION"]), true);
        assert_eq!(
            batch.sql(),
            "UPDATE ARTIST SET NAME = ?1 WHERE ID = ?2 AND VERSION = ?3"
        );
    }

    #[test]
    fn null_qualifier_renders_is_null_and_skips_parameter() {
        let mut batch = BatchQuery::delete("PAINTING", cols(&["ID", "GALLERY_ID", "TITLE"]), true);
        batch.push(BatchRow {
            values: Vec::new(),
            qualifier: vec![Value::Integer(4), Value::Null, Value::from("Water Lilies")],
        });
        let row = &batch.rows[0];
        assert_eq!(
            batch.sql_for(row),
            "DELETE FROM PAINTING WHERE ID = ?1 AND GALLERY_ID IS NULL AND TITLE = ?2"
        );
        assert_eq!(
            batch.parameters(row),
            vec![&Value::Integer(4), &Value::from("Water Lilies")]
        );
    }

    #[test]
    fn shape_check() {
        let batch = BatchQuery::update("T", cols(&["A"]), cols(&["ID"]), false);
        assert!(batch.accepts(&cols(&["A"]), &cols(&["ID"]), false));
        assert!(!batch.accepts(&cols(&["A", "B"]), &cols(&["ID"]), false));
        assert!(!batch.accepts(&cols(&["A"]), &cols(&["ID"]), true));

        let other_table = BatchQuery::update("U", cols(&["A"]), cols(&["ID"]), false);
        assert!(!batch.same_shape(&other_table));
        assert!(batch.same_shape(&BatchQuery::update("T", cols(&["A"]), cols(&["ID"]), false)));
    }
}
