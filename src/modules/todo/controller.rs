use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::model::{NewTodo, TodoPatch};
use super::service::{TodoError, TodoService};
use crate::persistence::PageQuery;
use crate::web::{Request, Response};

/// HTTP adapter over [`TodoService`]
pub struct TodoController {
    service: Arc<TodoService>,
}

impl TodoController {
    pub fn new(service: Arc<TodoService>) -> Self {
        Self { service }
    }

    pub fn list(&self, request: &Request) -> Response {
        let page = query_number(request, "page").unwrap_or(1);
        let page_size = query_number(request, "page_size").unwrap_or(0);

        match self.service.list(PageQuery::new(page, page_size)) {
            Ok(page) => Response::ok(json!({
                "total_pages": page.total_pages(),
                "page": page.page,
                "page_size": page.page_size,
                "total": page.total,
                "items": page.items,
            })),
            Err(err) => failure(err),
        }
    }

    pub fn show(&self, request: &Request) -> Response {
        let Some(id) = path_id(request) else {
            return invalid_id(request);
        };
        match self.service.get(id) {
            Ok(Some(todo)) => to_json(200, &todo),
            Ok(None) => missing(id),
            Err(err) => failure(err),
        }
    }

    pub fn create(&self, request: &Request) -> Response {
        let input: NewTodo = match request.json() {
            Ok(input) => input,
            Err(err) => return Response::bad_request(format!("invalid body: {}", err)),
        };
        match self.service.create(input) {
            Ok(todo) => to_json(201, &todo),
            Err(err) => failure(err),
        }
    }

    pub fn update(&self, request: &Request) -> Response {
        let Some(id) = path_id(request) else {
            return invalid_id(request);
        };
        let patch: TodoPatch = match request.json() {
            Ok(patch) => patch,
            Err(err) => return Response::bad_request(format!("invalid body: {}", err)),
        };
        match self.service.update(id, patch) {
            Ok(Some(todo)) => to_json(200, &todo),
            Ok(None) => missing(id),
            Err(err) => failure(err),
        }
    }

    pub fn complete(&self, request: &Request) -> Response {
        let Some(id) = path_id(request) else {
            return invalid_id(request);
        };
        match self.service.complete(id) {
            Ok(Some(todo)) => to_json(200, &todo),
            Ok(None) => missing(id),
            Err(err) => failure(err),
        }
    }

    pub fn destroy(&self, request: &Request) -> Response {
        let Some(id) = path_id(request) else {
            return invalid_id(request);
        };
        match self.service.delete(id) {
            Ok(true) => Response::no_content(),
            Ok(false) => missing(id),
            Err(err) => failure(err),
        }
    }
}

fn path_id(request: &Request) -> Option<u64> {
    request.param("id")?.parse().ok()
}

fn query_number(request: &Request, name: &str) -> Option<usize> {
    request.query(name)?.parse().ok()
}

fn invalid_id(request: &Request) -> Response {
    Response::bad_request(format!(
        "invalid todo id '{}'",
        request.param("id").unwrap_or_default()
    ))
}

fn missing(id: u64) -> Response {
    Response::not_found(format!("todo {} not found", id))
}

fn to_json<T: Serialize>(status: u16, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(body) => Response::new(status, body),
        Err(err) => Response::internal(err),
    }
}

fn failure(err: TodoError) -> Response {
    match err {
        TodoError::Validation(_) => Response::bad_request(err),
        TodoError::Repository(_) => {
            error!(error = %err, "todo request failed");
            Response::internal("storage failure")
        }
    }
}
