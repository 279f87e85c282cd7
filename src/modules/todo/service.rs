use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::model::{NewTodo, Todo, TodoPatch};
use crate::persistence::{Model, Page, PageQuery, Repository, RepositoryError};

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum TodoError {
    #[error("Invalid todo: {0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Business rules over the todo repository.
pub struct TodoService {
    repo: Arc<dyn Repository<Todo>>,
}

impl TodoService {
    pub fn new(repo: Arc<dyn Repository<Todo>>) -> Self {
        Self { repo }
    }

    pub fn create(&self, input: NewTodo) -> Result<Model<Todo>, TodoError> {
        let title = validate_title(&input.title)?;
        let todo = Todo {
            title,
            completed: false,
            notes: input.notes,
        };
        let model = self.repo.create(todo)?;
        debug!(id = model.id, "todo created");
        Ok(model)
    }

    pub fn get(&self, id: u64) -> Result<Option<Model<Todo>>, TodoError> {
        Ok(self.repo.find_by_id(id)?)
    }

    pub fn list(&self, query: PageQuery) -> Result<Page<Model<Todo>>, TodoError> {
        Ok(self.repo.paginate(query)?)
    }

    pub fn update(&self, id: u64, patch: TodoPatch) -> Result<Option<Model<Todo>>, TodoError> {
        let Some(current) = self.repo.find_by_id(id)? else {
            return Ok(None);
        };

        let mut todo = current.data;
        if let Some(title) = patch.title {
            todo.title = validate_title(&title)?;
        }
        if let Some(completed) = patch.completed {
            todo.completed = completed;
        }
        if patch.notes.is_some() {
            todo.notes = patch.notes;
        }
        Ok(self.repo.update(id, todo)?)
    }

    pub fn complete(&self, id: u64) -> Result<Option<Model<Todo>>, TodoError> {
        self.update(
            id,
            TodoPatch {
                completed: Some(true),
                ..TodoPatch::default()
            },
        )
    }

    pub fn delete(&self, id: u64) -> Result<bool, TodoError> {
        Ok(self.repo.delete(id)?)
    }

    pub fn count(&self) -> Result<usize, TodoError> {
        Ok(self.repo.count()?)
    }
}

fn validate_title(title: &str) -> Result<String, TodoError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TodoError::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TodoError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}
