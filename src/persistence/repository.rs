//! Generic data-access contract shared by every module's service layer.

use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use super::database::{Database, DatabaseError};
use super::entity::{Entity, Model};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Persistence failure, with the operation and table it happened in.
///
/// A missing row is never an error; lookups return `Option` instead.
#[derive(Debug, Error)]
#[error("{operation} on '{table}' failed: {source}")]
pub struct RepositoryError {
    pub operation: &'static str,
    pub table: &'static str,
    #[source]
    pub source: DatabaseError,
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub page: usize,
    pub page_size: usize,
}

impl PageQuery {
    /// Clamp raw input: page 0 means 1, size 0 means the default, sizes cap at 100.
    pub fn new(page: usize, page_size: usize) -> Self {
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        };
        Self {
            page: page.max(1),
            page_size,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size)
    }
}

pub trait Repository<T: Entity>: Send + Sync {
    fn create(&self, entity: T) -> Result<Model<T>, RepositoryError>;

    fn find_by_id(&self, id: u64) -> Result<Option<Model<T>>, RepositoryError>;

    fn find_all(&self) -> Result<Vec<Model<T>>, RepositoryError>;

    /// Replace the entity stored under `id`, keeping `created_at`.
    fn update(&self, id: u64, entity: T) -> Result<Option<Model<T>>, RepositoryError>;

    /// Returns `false` when nothing was stored under `id`.
    fn delete(&self, id: u64) -> Result<bool, RepositoryError>;

    fn paginate(&self, query: PageQuery) -> Result<Page<Model<T>>, RepositoryError>;

    fn count(&self) -> Result<usize, RepositoryError>;
}

/// [`Repository`] over one table of the shared [`Database`].
pub struct TableRepository<T> {
    db: Arc<Database>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> TableRepository<T> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }

    fn wrap(operation: &'static str) -> impl FnOnce(DatabaseError) -> RepositoryError {
        move |source| RepositoryError {
            operation,
            table: T::TABLE,
            source,
        }
    }

    fn decode(operation: &'static str, row: serde_json::Value) -> Result<Model<T>, RepositoryError> {
        serde_json::from_value(row).map_err(|e| Self::wrap(operation)(DatabaseError::Codec(e)))
    }

    fn encode(operation: &'static str, model: &Model<T>) -> Result<serde_json::Value, RepositoryError> {
        serde_json::to_value(model).map_err(|e| Self::wrap(operation)(DatabaseError::Codec(e)))
    }
}

impl<T: Entity> Repository<T> for TableRepository<T> {
    fn create(&self, entity: T) -> Result<Model<T>, RepositoryError> {
        let now = Utc::now();
        let mut model = Model {
            id: 0,
            created_at: now,
            updated_at: now,
            data: entity,
        };
        let row = Self::encode("create", &model)?;
        model.id = self
            .db
            .insert(T::TABLE, row)
            .map_err(Self::wrap("create"))?;
        Ok(model)
    }

    fn find_by_id(&self, id: u64) -> Result<Option<Model<T>>, RepositoryError> {
        self.db
            .get(T::TABLE, id)
            .map_err(Self::wrap("find_by_id"))?
            .map(|row| Self::decode("find_by_id", row))
            .transpose()
    }

    fn find_all(&self) -> Result<Vec<Model<T>>, RepositoryError> {
        let (rows, _) = self
            .db
            .scan(T::TABLE, 0, None)
            .map_err(Self::wrap("find_all"))?;
        rows.into_iter()
            .map(|row| Self::decode("find_all", row))
            .collect()
    }

    fn update(&self, id: u64, entity: T) -> Result<Option<Model<T>>, RepositoryError> {
        let Some(existing) = self.find_by_id(id)? else {
            return Ok(None);
        };
        let model = Model {
            id,
            created_at: existing.created_at,
            updated_at: Utc::now(),
            data: entity,
        };
        let row = Self::encode("update", &model)?;
        let replaced = self
            .db
            .replace(T::TABLE, id, row)
            .map_err(Self::wrap("update"))?;
        // Deleted between the read and the write.
        Ok(replaced.then_some(model))
    }

    fn delete(&self, id: u64) -> Result<bool, RepositoryError> {
        self.db.remove(T::TABLE, id).map_err(Self::wrap("delete"))
    }

    fn paginate(&self, query: PageQuery) -> Result<Page<Model<T>>, RepositoryError> {
        let (rows, total) = self
            .db
            .scan(T::TABLE, query.offset(), Some(query.page_size))
            .map_err(Self::wrap("paginate"))?;
        let items = rows
            .into_iter()
            .map(|row| Self::decode("paginate", row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    fn count(&self) -> Result<usize, RepositoryError> {
        self.db.count(T::TABLE).map_err(Self::wrap("count"))
    }
}
