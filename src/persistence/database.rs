//! In-memory table store handed to modules as an opaque persistence handle.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Boolean,
    /// RFC 3339 string
    Timestamp,
    /// Any JSON value
    Json,
}

impl ColumnKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnKind::Integer => value.is_i64() || value.is_u64(),
            ColumnKind::Float => value.is_number(),
            ColumnKind::Text | ColumnKind::Timestamp => value.is_string(),
            ColumnKind::Boolean => value.is_boolean(),
            ColumnKind::Json => true,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Text => "text",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Json => "json",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Outcome of synchronizing one table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Created,
    Altered { added: Vec<String> },
    Unchanged,
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Table '{0}' does not exist")]
    UnknownTable(String),
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("Column '{table}.{column}' is {existing}, cannot change to {requested}")]
    ColumnConflict {
        table: String,
        column: String,
        existing: ColumnKind,
        requested: ColumnKind,
    },
    #[error("Cannot add non-nullable column '{table}.{column}' to a table with rows")]
    NonNullableColumn { table: String, column: String },
    #[error("Row for '{table}' is invalid: {reason}")]
    InvalidRow { table: String, reason: String },
    #[error("Failed to encode or decode row: {0}")]
    Codec(#[from] serde_json::Error),
}

struct Table {
    schema: TableSchema,
    rows: BTreeMap<u64, Value>,
    next_id: u64,
}

impl Table {
    fn validate(&self, row: &Map<String, Value>) -> Result<(), DatabaseError> {
        let invalid = |reason: String| DatabaseError::InvalidRow {
            table: self.schema.table.clone(),
            reason,
        };

        for (field, value) in row {
            let column = self
                .schema
                .get(field)
                .ok_or_else(|| invalid(format!("unknown column '{}'", field)))?;
            if value.is_null() {
                if !column.nullable {
                    return Err(invalid(format!("column '{}' is not nullable", field)));
                }
            } else if !column.kind.accepts(value) {
                return Err(invalid(format!(
                    "column '{}' expects {}, got {}",
                    field, column.kind, value
                )));
            }
        }

        if let Some(missing) = self
            .schema
            .columns
            .iter()
            .find(|column| !column.nullable && !row.contains_key(&column.name))
        {
            return Err(invalid(format!("missing column '{}'", missing.name)));
        }
        Ok(())
    }
}

/// Opaque persistence handle.
///
/// Rows are JSON objects; ids are assigned per table starting at 1 and are
/// never reused.
pub struct Database {
    name: String,
    tables: RwLock<HashMap<String, Table>>,
}

impl Database {
    pub fn in_memory(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(database = %name, "opened in-memory database");
        Self {
            name,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create or extend a table so it matches `schema`.
    pub fn sync_schema(&self, schema: &TableSchema) -> Result<SchemaChange, DatabaseError> {
        check_identifier(&schema.table)?;
        for column in &schema.columns {
            check_identifier(&column.name)?;
        }

        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&schema.table) else {
            tables.insert(
                schema.table.clone(),
                Table {
                    schema: schema.clone(),
                    rows: BTreeMap::new(),
                    next_id: 1,
                },
            );
            debug!(table = %schema.table, "table created");
            return Ok(SchemaChange::Created);
        };

        let mut additions = Vec::new();
        for column in &schema.columns {
            match table.schema.get(&column.name) {
                Some(existing) if existing.kind != column.kind => {
                    return Err(DatabaseError::ColumnConflict {
                        table: schema.table.clone(),
                        column: column.name.clone(),
                        existing: existing.kind,
                        requested: column.kind,
                    });
                }
                Some(_) => {}
                None if !column.nullable && !table.rows.is_empty() => {
                    return Err(DatabaseError::NonNullableColumn {
                        table: schema.table.clone(),
                        column: column.name.clone(),
                    });
                }
                None => additions.push(column.clone()),
            }
        }

        if additions.is_empty() {
            return Ok(SchemaChange::Unchanged);
        }
        let added = additions.iter().map(|column| column.name.clone()).collect();
        table.schema.columns.extend(additions);
        debug!(table = %schema.table, ?added, "table altered");
        Ok(SchemaChange::Altered { added })
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    pub fn schema(&self, table: &str) -> Option<TableSchema> {
        self.tables.read().get(table).map(|t| t.schema.clone())
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert a row, assigning and writing its `id`.
    pub fn insert(&self, table: &str, row: Value) -> Result<u64, DatabaseError> {
        let mut tables = self.tables.write();
        let target = tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;
        let mut row = into_object(table, row)?;

        let id = target.next_id;
        row.insert("id".to_string(), Value::from(id));
        target.validate(&row)?;

        target.rows.insert(id, Value::Object(row));
        target.next_id += 1;
        Ok(id)
    }

    pub fn get(&self, table: &str, id: u64) -> Result<Option<Value>, DatabaseError> {
        let tables = self.tables.read();
        let target = tables
            .get(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;
        Ok(target.rows.get(&id).cloned())
    }

    /// Rows in id order, skipping `offset` and returning at most `limit`,
    /// together with the table's total row count.
    pub fn scan(
        &self,
        table: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<(Vec<Value>, usize), DatabaseError> {
        let tables = self.tables.read();
        let target = tables
            .get(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;
        let rows = target
            .rows
            .values()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((rows, target.rows.len()))
    }

    /// Replace an existing row. Returns `false` when `id` is absent.
    pub fn replace(&self, table: &str, id: u64, row: Value) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write();
        let target = tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;
        if !target.rows.contains_key(&id) {
            return Ok(false);
        }
        let mut row = into_object(table, row)?;
        row.insert("id".to_string(), Value::from(id));
        target.validate(&row)?;
        target.rows.insert(id, Value::Object(row));
        Ok(true)
    }

    pub fn remove(&self, table: &str, id: u64) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write();
        let target = tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))?;
        Ok(target.rows.remove(&id).is_some())
    }

    pub fn count(&self, table: &str) -> Result<usize, DatabaseError> {
        let tables = self.tables.read();
        tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| DatabaseError::UnknownTable(table.to_string()))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("tables", &self.tables())
            .finish()
    }
}

fn into_object(table: &str, row: Value) -> Result<Map<String, Value>, DatabaseError> {
    match row {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::InvalidRow {
            table: table.to_string(),
            reason: format!("expected an object, got {}", other),
        }),
    }
}

fn check_identifier(name: &str) -> Result<(), DatabaseError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notes_schema() -> TableSchema {
        TableSchema::new("notes")
            .column(Column::new("id", ColumnKind::Integer))
            .column(Column::new("body", ColumnKind::Text))
            .column(Column::new("pinned", ColumnKind::Boolean).nullable())
    }

    #[test]
    fn sync_creates_then_reports_unchanged() {
        let db = Database::in_memory("test");
        assert_eq!(db.sync_schema(&notes_schema()).unwrap(), SchemaChange::Created);
        assert_eq!(db.sync_schema(&notes_schema()).unwrap(), SchemaChange::Unchanged);
        assert_eq!(db.tables(), vec!["notes"]);
    }

    #[test]
    fn sync_adds_columns_and_rejects_conflicts() {
        let db = Database::in_memory("test");
        db.sync_schema(&notes_schema()).unwrap();

        let extended = notes_schema().column(Column::new("tags", ColumnKind::Json).nullable());
        assert_eq!(
            db.sync_schema(&extended).unwrap(),
            SchemaChange::Altered {
                added: vec!["tags".to_string()]
            }
        );

        let conflicting = TableSchema::new("notes").column(Column::new("body", ColumnKind::Integer));
        assert!(matches!(
            db.sync_schema(&conflicting),
            Err(DatabaseError::ColumnConflict { .. })
        ));
    }

    #[test]
    fn non_nullable_column_needs_empty_table() {
        let db = Database::in_memory("test");
        db.sync_schema(&notes_schema()).unwrap();
        db.insert("notes", json!({ "body": "hi" })).unwrap();

        let strict = notes_schema().column(Column::new("author", ColumnKind::Text));
        assert!(matches!(
            db.sync_schema(&strict),
            Err(DatabaseError::NonNullableColumn { .. })
        ));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let db = Database::in_memory("test");
        for name in ["", "Notes", "9lives", "drop table"] {
            assert!(matches!(
                db.sync_schema(&TableSchema::new(name)),
                Err(DatabaseError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn rows_are_validated_against_schema() {
        let db = Database::in_memory("test");
        db.sync_schema(&notes_schema()).unwrap();

        assert_eq!(db.insert("notes", json!({ "body": "first" })).unwrap(), 1);
        assert!(db.insert("notes", json!({ "body": 5 })).is_err());
        assert!(db.insert("notes", json!({ "pinned": true })).is_err());
        assert!(db.insert("notes", json!({ "body": "x", "color": "red" })).is_err());
        assert!(db.insert("notes", json!("bare string")).is_err());
        assert!(matches!(
            db.insert("missing", json!({})),
            Err(DatabaseError::UnknownTable(_))
        ));

        let stored = db.get("notes", 1).unwrap().unwrap();
        assert_eq!(stored["id"], 1);
    }

    #[test]
    fn ids_are_not_reused() {
        let db = Database::in_memory("test");
        db.sync_schema(&notes_schema()).unwrap();
        let first = db.insert("notes", json!({ "body": "a" })).unwrap();
        assert!(db.remove("notes", first).unwrap());
        let second = db.insert("notes", json!({ "body": "b" })).unwrap();
        assert_eq!(second, first + 1);
        assert!(!db.remove("notes", first).unwrap());
    }

    #[test]
    fn scan_pages_in_id_order() {
        let db = Database::in_memory("test");
        db.sync_schema(&notes_schema()).unwrap();
        for i in 0..5 {
            db.insert("notes", json!({ "body": format!("note {i}") })).unwrap();
        }

        let (rows, total) = db.scan("notes", 2, Some(2)).unwrap();
        assert_eq!(total, 5);
        let ids: Vec<u64> = rows.iter().map(|row| row["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
