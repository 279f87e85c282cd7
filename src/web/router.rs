use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use warp::http::Method;

/// Request handler bound to a (method, path) pair.
pub type Handler = Arc<dyn Fn(Request) -> Response + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Values captured by `:name` path segments
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: HashMap::new(),
            query: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Attach already decoded query parameters.
    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &Value) -> Self {
        self.with_body(value.to_string())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn created(body: Value) -> Self {
        Self::new(201, body)
    }

    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    pub fn error(status: u16, message: impl fmt::Display) -> Self {
        Self::new(status, json!({ "error": message.to_string() }))
    }

    pub fn bad_request(message: impl fmt::Display) -> Self {
        Self::error(400, message)
    }

    pub fn not_found(message: impl fmt::Display) -> Self {
        Self::error(404, message)
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::error(500, message)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route {method} {path} is already bound")]
    Conflict { method: String, path: String },
    #[error("Invalid route path '{0}': paths must start with '/'")]
    InvalidPath(String),
}

/// Handle modules attach handlers to. The core never interprets `path`.
pub trait Router {
    fn add(&mut self, method: Method, path: &str, handler: Handler) -> Result<(), RouteError>;
}

/// Convenience methods for any [`Router`], including `dyn Router`.
pub trait RouterExt: Router {
    fn route<F>(&mut self, method: Method, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.add(method, path, Arc::new(handler))
    }

    fn get<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    fn post<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    fn put<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::PUT, path, handler)
    }

    fn delete<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::DELETE, path, handler)
    }

    /// Router that prefixes every path it binds.
    fn nest(&mut self, prefix: &str) -> Nested<'_, Self> {
        Nested {
            inner: self,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }
}

impl<R: Router + ?Sized> RouterExt for R {}

pub struct Nested<'a, R: Router + ?Sized> {
    inner: &'a mut R,
    prefix: String,
}

impl<R: Router + ?Sized> Router for Nested<'_, R> {
    fn add(&mut self, method: Method, path: &str, handler: Handler) -> Result<(), RouteError> {
        let full = if path == "/" || path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{}", self.prefix, path)
        };
        self.inner.add(method, &full, handler)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Route {
    method: Method,
    path: String,
    segments: Vec<Segment>,
    handler: Handler,
}

impl Route {
    fn shape(&self) -> Vec<Option<&str>> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => Some(literal.as_str()),
                Segment::Param(_) => None,
            })
            .collect()
    }

    fn capture(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }
}

/// Ordered (method, path) to handler table.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Bound (method, path) pairs in registration order.
    pub fn bindings(&self) -> Vec<(Method, String)> {
        self.routes
            .iter()
            .map(|route| (route.method.clone(), route.path.clone()))
            .collect()
    }

    pub fn dispatch(&self, mut request: Request) -> Response {
        let parts = split(&request.path);
        let mut path_matched = false;

        for route in &self.routes {
            if let Some(params) = route.capture(&parts) {
                if route.method == request.method {
                    request.params = params;
                    return (route.handler)(request);
                }
                path_matched = true;
            }
        }

        if path_matched {
            Response::error(405, format!("method {} not allowed", request.method))
        } else {
            Response::not_found(format!("no route for {}", request.path))
        }
    }
}

impl Router for RouteTable {
    fn add(&mut self, method: Method, path: &str, handler: Handler) -> Result<(), RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path.to_string()));
        }

        let segments: Vec<Segment> = split(path)
            .into_iter()
            .map(|part| match part.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(part.to_string()),
            })
            .collect();
        let route = Route {
            method,
            path: normalize(path),
            segments,
            handler,
        };

        if self
            .routes
            .iter()
            .any(|existing| existing.method == route.method && existing.shape() == route.shape())
        {
            return Err(RouteError::Conflict {
                method: route.method.to_string(),
                path: route.path,
            });
        }

        debug!(method = %route.method, path = %route.path, "route bound");
        self.routes.push(route);
        Ok(())
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn normalize(path: &str) -> String {
    let parts = split(path);
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}
