use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::database::{Column, ColumnKind, TableSchema};

/// A persisted data model owned by one module.
///
/// Implementors describe their own columns; the `id`, `created_at` and
/// `updated_at` columns are added for every entity.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn columns() -> Vec<Column>;

    fn schema() -> TableSchema {
        TableSchema::new(Self::TABLE)
            .columns(base_columns())
            .columns(Self::columns())
    }
}

fn base_columns() -> [Column; 3] {
    [
        Column::new("id", ColumnKind::Integer),
        Column::new("created_at", ColumnKind::Timestamp),
        Column::new("updated_at", ColumnKind::Timestamp),
    ]
}

/// A stored entity together with its bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model<T> {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

/// Schema contribution a module hands to the migrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub module: String,
    pub entity: &'static str,
    pub schema: TableSchema,
}

impl EntityDescriptor {
    pub fn of<E: Entity>(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            entity: std::any::type_name::<E>(),
            schema: E::schema(),
        }
    }
}
