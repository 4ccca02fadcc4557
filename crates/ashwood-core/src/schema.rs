//! Database schema metadata: tables, columns, primary and foreign keys.
//!
//! These are plain data holders filled in by a catalog reader or loaded from
//! a JSON document. A [`Table`] exclusively owns its columns and keys; each
//! owned item remembers the full name of the table it was added to, and
//! forgets it when removed.
//!
//! [`Schema`] collects tables by full name and derives the referential
//! digraph the sorter consumes: one vertex per table, one arc from each
//! referencing table to each table it references.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::digraph::{Digraph, MapDigraph};
use crate::error::SchemaError;

/// Joins `catalog.schema.name`, skipping missing segments.
///
/// Every present qualifier is followed by a dot, so a qualified name with
/// no table name keeps a trailing dot (`"cat.sch."`).
pub fn full_name(catalog: Option<&str>, schema: Option<&str>, name: Option<&str>) -> String {
    let mut buf = String::new();
    if let Some(catalog) = catalog {
        buf.push_str(catalog);
        buf.push('.');
    }
    if let Some(schema) = schema {
        buf.push_str(schema);
        buf.push('.');
    }
    if let Some(name) = name {
        buf.push_str(name);
    }
    buf
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub sql_type: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(skip)]
    table: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            sql_type: None,
            nullable: true,
            size: None,
            table: None,
        }
    }

    pub fn with_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Full name of the owning table, if attached.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

/// One column of a (possibly composite) primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub column_name: String,
    #[serde(default = "default_sequence")]
    pub key_sequence: u16,
    #[serde(default)]
    pub pk_name: Option<String>,
    #[serde(skip)]
    table: Option<String>,
}

fn default_sequence() -> u16 {
    1
}

impl PrimaryKey {
    pub fn new(column_name: impl Into<String>) -> Self {
        PrimaryKey {
            column_name: column_name.into(),
            key_sequence: 1,
            pk_name: None,
            table: None,
        }
    }

    pub fn key_sequence(mut self, sequence: u16) -> Self {
        self.key_sequence = sequence;
        self
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

/// One column of a (possibly composite) foreign key.
///
/// `column_name` lives in the owning table and references `pk_column_name`
/// in the table named by the `pk_table_*` fields. Columns of a composite key
/// share `fk_name` and are ordered by `key_sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column_name: String,
    #[serde(default)]
    pub pk_table_catalog: Option<String>,
    #[serde(default)]
    pub pk_table_schema: Option<String>,
    pub pk_table_name: String,
    pub pk_column_name: String,
    #[serde(default = "default_sequence")]
    pub key_sequence: u16,
    #[serde(default)]
    pub fk_name: Option<String>,
    #[serde(default)]
    pub pk_name: Option<String>,
    /// Whether the referencing column accepts NULL. Left unset, it follows
    /// the owning column once the table joins a schema; a key with neither
    /// is NOT NULL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip)]
    table: Option<String>,
}

impl ForeignKey {
    pub fn new(
        column_name: impl Into<String>,
        pk_table_name: impl Into<String>,
        pk_column_name: impl Into<String>,
    ) -> Self {
        ForeignKey {
            column_name: column_name.into(),
            pk_table_catalog: None,
            pk_table_schema: None,
            pk_table_name: pk_table_name.into(),
            pk_column_name: pk_column_name.into(),
            key_sequence: 1,
            fk_name: None,
            pk_name: None,
            nullable: None,
            table: None,
        }
    }

    pub fn named(mut self, fk_name: impl Into<String>) -> Self {
        self.fk_name = Some(fk_name.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = Some(true);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(false)
    }

    pub fn key_sequence(mut self, sequence: u16) -> Self {
        self.key_sequence = sequence;
        self
    }

    pub fn pk_schema(mut self, schema: impl Into<String>) -> Self {
        self.pk_table_schema = Some(schema.into());
        self
    }

    pub fn pk_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.pk_table_catalog = Some(catalog.into());
        self
    }

    /// Full name of the referenced table.
    pub fn pk_table_full_name(&self) -> String {
        full_name(
            self.pk_table_catalog.as_deref(),
            self.pk_table_schema.as_deref(),
            Some(&self.pk_table_name),
        )
    }

    /// Full name of the owning (referencing) table, if attached.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

/// A foreign-key column pair inside a [`Relationship`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub source_column: String,
    pub target_column: String,
}

/// A to-one link from one table to another, built from the foreign-key
/// columns sharing one constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    pub joins: Vec<Join>,
    /// True when every referencing column is NOT NULL.
    pub mandatory: bool,
}

impl Relationship {
    pub fn is_reflexive(&self) -> bool {
        self.source_table == self.target_table
    }
}

/// A table and the metadata it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    catalog: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    primary_keys: Vec<PrimaryKey>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self::qualified(None, None, Some(name.into()))
    }

    pub fn qualified(catalog: Option<String>, schema: Option<String>, name: Option<String>) -> Self {
        Table {
            catalog,
            schema,
            name,
            columns: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn full_name(&self) -> String {
        full_name(self.catalog(), self.schema(), self.name())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_keys(&self) -> &[PrimaryKey] {
        &self.primary_keys
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Primary-key column names in key-sequence order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        let mut keys: Vec<&PrimaryKey> = self.primary_keys.iter().collect();
        keys.sort_by_key(|key| key.key_sequence);
        keys.into_iter().map(|key| key.column_name.as_str()).collect()
    }

    pub fn add_column(&mut self, mut column: Column) {
        column.table = Some(self.full_name());
        self.columns.push(column);
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|column| column.name == name)?;
        let mut column = self.columns.remove(idx);
        column.table = None;
        Some(column)
    }

    pub fn add_primary_key(&mut self, mut key: PrimaryKey) {
        key.table = Some(self.full_name());
        self.primary_keys.push(key);
    }

    pub fn remove_primary_key(&mut self, column_name: &str) -> Option<PrimaryKey> {
        let idx = self
            .primary_keys
            .iter()
            .position(|key| key.column_name == column_name)?;
        let mut key = self.primary_keys.remove(idx);
        key.table = None;
        Some(key)
    }

    pub fn add_foreign_key(&mut self, mut key: ForeignKey) {
        key.table = Some(self.full_name());
        self.foreign_keys.push(key);
    }

    pub fn remove_foreign_key(&mut self, column_name: &str) -> Option<ForeignKey> {
        let idx = self
            .foreign_keys
            .iter()
            .position(|key| key.column_name == column_name)?;
        let mut key = self.foreign_keys.remove(idx);
        key.table = None;
        Some(key)
    }

    /// Builder-style helpers used heavily in tests and fixtures.
    pub fn with_column(mut self, column: Column) -> Self {
        self.add_column(column);
        self
    }

    pub fn with_primary_key(mut self, column_name: &str) -> Self {
        let sequence = self.primary_keys.len() as u16 + 1;
        self.add_primary_key(PrimaryKey::new(column_name).key_sequence(sequence));
        self
    }

    pub fn with_foreign_key(mut self, key: ForeignKey) -> Self {
        self.add_foreign_key(key);
        self
    }

    /// Groups foreign keys into relationships.
    ///
    /// Columns sharing an `fk_name` form one relationship; unnamed keys are
    /// grouped by referenced table and named after it. Relationships keep the
    /// order in which their first column was declared.
    pub fn relationships(&self) -> Vec<Relationship> {
        let source_table = self.full_name();
        let mut groups: IndexMap<String, Vec<&ForeignKey>> = IndexMap::new();
        for key in &self.foreign_keys {
            let name = key
                .fk_name
                .clone()
                .unwrap_or_else(|| key.pk_table_full_name());
            groups.entry(name).or_default().push(key);
        }

        groups
            .into_iter()
            .map(|(name, mut keys)| {
                keys.sort_by_key(|key| key.key_sequence);
                Relationship {
                    name,
                    source_table: source_table.clone(),
                    target_table: keys[0].pk_table_full_name(),
                    mandatory: keys.iter().all(|key| !key.is_nullable()),
                    joins: keys
                        .iter()
                        .map(|key| Join {
                            source_column: key.column_name.clone(),
                            target_column: key.pk_column_name.clone(),
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// Relationships pointing back at this same table.
    pub fn reflexive_relationships(&self) -> Vec<Relationship> {
        self.relationships()
            .into_iter()
            .filter(Relationship::is_reflexive)
            .collect()
    }

    /// Re-attaches owner back-references, e.g. after deserialization, and
    /// fills unset foreign key nullability from the referencing column.
    fn relink(&mut self) {
        let owner = self.full_name();
        for column in &mut self.columns {
            column.table = Some(owner.clone());
        }
        for key in &mut self.primary_keys {
            key.table = Some(owner.clone());
        }
        for key in &mut self.foreign_keys {
            key.table = Some(owner.clone());
            if key.nullable.is_none() {
                key.nullable = self
                    .columns
                    .iter()
                    .find(|column| column.name == key.column_name)
                    .map(|column| column.nullable);
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SchemaDocument {
    tables: Vec<Table>,
}

/// Tables indexed by full name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: IndexMap<String, Table>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from tables, rejecting duplicate names.
    pub fn from_tables(tables: impl IntoIterator<Item = Table>) -> Result<Self, SchemaError> {
        let mut schema = Schema::new();
        for table in tables {
            schema.add_table(table)?;
        }
        Ok(schema)
    }

    /// Parses a `{"tables": [...]}` JSON document.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let document: SchemaDocument = serde_json::from_str(json)?;
        Self::from_tables(document.tables)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        let document = SchemaDocument {
            tables: self.tables.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn add_table(&mut self, mut table: Table) -> Result<(), SchemaError> {
        let name = table.full_name();
        if self.tables.contains_key(&name) {
            return Err(SchemaError::DuplicateTable { name });
        }
        table.relink();
        self.tables.insert(name, table);
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> Result<Table, SchemaError> {
        self.tables
            .shift_remove(name)
            .ok_or_else(|| SchemaError::TableNotFound {
                name: name.to_string(),
            })
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Like [`table`](Self::table) but fails with `TableNotFound`.
    pub fn require_table(&self, name: &str) -> Result<&Table, SchemaError> {
        self.table(name).ok_or_else(|| SchemaError::TableNotFound {
            name: name.to_string(),
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Builds the table dependency digraph.
    ///
    /// Every table becomes a vertex in registration order. Each
    /// referencing -> referenced pair gets one arc carrying all foreign-key
    /// columns between the two tables. Self references produce no arc. Keys
    /// pointing at tables outside this schema are skipped.
    pub fn referential_digraph(&self) -> MapDigraph<String, Vec<ForeignKey>> {
        let mut graph: MapDigraph<String, Vec<ForeignKey>> =
            MapDigraph::with_capacity(self.tables.len());
        for name in self.tables.keys() {
            graph.add_vertex(name.clone());
        }

        for (name, table) in &self.tables {
            for key in &table.foreign_keys {
                let target = key.pk_table_full_name();
                if &target == name {
                    continue;
                }
                if !self.tables.contains_key(&target) {
                    tracing::warn!(
                        table = %name,
                        column = %key.column_name,
                        target = %target,
                        "foreign key references a table outside the schema; ignored"
                    );
                    continue;
                }
                match graph.arc_mut(name, &target) {
                    Some(keys) => keys.push(key.clone()),
                    None => {
                        graph.put_arc(name.clone(), target, vec![key.clone()]);
                    }
                }
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist_painting_schema() -> Schema {
        let artist = Table::new("ARTIST")
            .with_column(Column::new("ARTIST_ID").not_null())
            .with_primary_key("ARTIST_ID");
        let gallery = Table::new("GALLERY").with_primary_key("GALLERY_ID");
        let painting = Table::new("PAINTING")
            .with_primary_key("PAINTING_ID")
            .with_foreign_key(ForeignKey::new("ARTIST_ID", "ARTIST", "ARTIST_ID"))
            .with_foreign_key(ForeignKey::new("GALLERY_ID", "GALLERY", "GALLERY_ID").nullable());
        Schema::from_tables([artist, gallery, painting]).unwrap()
    }

    #[test]
    fn full_name_joins_present_segments() {
        assert_eq!(full_name(Some("c"), Some("s"), Some("t")), "c.s.t");
        assert_eq!(full_name(None, Some("s"), Some("t")), "s.t");
        assert_eq!(full_name(Some("c"), None, Some("t")), "c.t");
        assert_eq!(full_name(None, None, Some("t")), "t");
        assert_eq!(full_name(None, None, None), "");
    }

    #[test]
    fn full_name_keeps_trailing_dot_without_name() {
        let table = Table::qualified(Some("cat".into()), Some("sch".into()), None);
        assert_eq!(table.full_name(), "cat.sch.");
    }

    #[test]
    fn owner_reference_set_on_add_and_cleared_on_remove() {
        let mut table = Table::qualified(None, Some("app".into()), Some("ORDERS".into()));
        table.add_column(Column::new("ID"));
        table.add_foreign_key(ForeignKey::new("CUSTOMER_ID", "CUSTOMER", "ID"));
        assert_eq!(table.columns()[0].table(), Some("app.ORDERS"));
        assert_eq!(table.foreign_keys()[0].table(), Some("app.ORDERS"));

        let column = table.remove_column("ID").unwrap();
        assert_eq!(column.table(), None);
        assert!(table.columns().is_empty());

        let key = table.remove_foreign_key("CUSTOMER_ID").unwrap();
        assert_eq!(key.table(), None);
        assert!(table.remove_foreign_key("CUSTOMER_ID").is_none());
    }

    #[test]
    fn composite_key_groups_into_one_relationship() {
        let table = Table::new("LINE")
            .with_foreign_key(
                ForeignKey::new("ORDER_NO", "ORDERS", "NO")
                    .named("fk_line_order")
                    .key_sequence(2),
            )
            .with_foreign_key(
                ForeignKey::new("ORDER_YEAR", "ORDERS", "YEAR")
                    .named("fk_line_order")
                    .key_sequence(1)
                    .nullable(),
            );
        let relationships = table.relationships();
        assert_eq!(relationships.len(), 1);
        let rel = &relationships[0];
        assert_eq!(rel.name, "fk_line_order");
        assert_eq!(rel.target_table, "ORDERS");
        assert_eq!(rel.joins[0].source_column, "ORDER_YEAR");
        assert!(!rel.mandatory);
    }

    #[test]
    fn referential_digraph_points_at_referenced_tables() {
        let schema = artist_painting_schema();
        let graph = schema.referential_digraph();
        assert_eq!(graph.order(), 3);
        assert_eq!(graph.size(), 2);
        assert!(graph.has_arc(&"PAINTING".to_string(), &"ARTIST".to_string()));
        assert!(graph.has_arc(&"PAINTING".to_string(), &"GALLERY".to_string()));
    }

    #[test]
    fn referential_digraph_skips_self_and_foreign_targets() {
        let tree = Table::new("NODE")
            .with_primary_key("ID")
            .with_foreign_key(ForeignKey::new("PARENT_ID", "NODE", "ID").nullable())
            .with_foreign_key(ForeignKey::new("OWNER_ID", "ELSEWHERE", "ID"));
        let schema = Schema::from_tables([tree]).unwrap();
        let graph = schema.referential_digraph();
        assert_eq!(graph.size(), 0);
        assert_eq!(schema.table("NODE").unwrap().reflexive_relationships().len(), 1);
    }

    #[test]
    fn duplicate_table_rejected() {
        let err = Schema::from_tables([Table::new("A"), Table::new("A")]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTable { name } if name == "A"));
    }

    #[test]
    fn json_roundtrip_relinks_owners() {
        let schema = artist_painting_schema();
        let json = schema.to_json().unwrap();
        let back = Schema::from_json(&json).unwrap();
        assert_eq!(back.len(), 3);
        let painting = back.table("PAINTING").unwrap();
        assert_eq!(painting.foreign_keys()[0].table(), Some("PAINTING"));
        assert!(painting.foreign_keys()[1].is_nullable());
    }

    #[test]
    fn json_defaults_apply() {
        let json = r#"{"tables": [
            {"name": "A", "primary_keys": [{"column_name": "ID"}]},
            {"name": "B", "foreign_keys": [
                {"column_name": "A_ID", "pk_table_name": "A", "pk_column_name": "ID"}
            ]}
        ]}"#;
        let schema = Schema::from_json(json).unwrap();
        let b = schema.require_table("B").unwrap();
        assert!(!b.foreign_keys()[0].is_nullable());
        assert_eq!(b.foreign_keys()[0].key_sequence, 1);
        assert!(schema.require_table("C").is_err());
    }

    #[test]
    fn unset_key_nullability_follows_column() {
        let json = r#"{"tables": [
            {"name": "NODE",
             "columns": [
                {"name": "ID", "nullable": false},
                {"name": "PARENT_ID"},
                {"name": "OWNER_ID", "nullable": false},
                {"name": "EDITOR_ID"}
             ],
             "primary_keys": [{"column_name": "ID"}],
             "foreign_keys": [
                {"column_name": "PARENT_ID", "pk_table_name": "NODE", "pk_column_name": "ID", "fk_name": "parent"},
                {"column_name": "OWNER_ID", "pk_table_name": "NODE", "pk_column_name": "ID", "fk_name": "owner"},
                {"column_name": "EDITOR_ID", "pk_table_name": "NODE", "pk_column_name": "ID", "fk_name": "editor", "nullable": false}
             ]}
        ]}"#;
        let schema = Schema::from_json(json).unwrap();
        let node = schema.require_table("NODE").unwrap();
        let keys = node.foreign_keys();
        assert_eq!(keys[0].nullable, Some(true));
        assert_eq!(keys[1].nullable, Some(false));
        assert_eq!(keys[2].nullable, Some(false));

        let mandatory: Vec<bool> = node.relationships().iter().map(|rel| rel.mandatory).collect();
        assert_eq!(mandatory, vec![false, true, true]);
    }
}
