use serde::{Deserialize, Serialize};

use crate::persistence::{Column, ColumnKind, Entity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Todo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            completed: false,
            notes: None,
        }
    }
}

impl Entity for Todo {
    const TABLE: &'static str = "todos";

    fn columns() -> Vec<Column> {
        vec![
            Column::new("title", ColumnKind::Text),
            Column::new("completed", ColumnKind::Boolean),
            Column::new("notes", ColumnKind::Text).nullable(),
        ]
    }
}

/// Body of `POST /api/todos`
#[derive(Debug, Clone, Deserialize)]
pub struct NewTodo {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `PUT /api/todos/:id`; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub notes: Option<String>,
}
