use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::path::FullPath;
use warp::Filter;

use super::router::{Method, Request, Response, RouteTable};

/// warp filter forwarding every request to the route table.
pub fn filter(
    table: Arc<RouteTable>,
) -> impl Filter<Extract = (warp::reply::WithStatus<warp::reply::Json>,), Error = warp::Rejection> + Clone
{
    warp::method()
        .and(warp::path::full())
        .and(
            warp::query::<HashMap<String, String>>()
                .or(warp::any().map(HashMap::new))
                .unify(),
        )
        .and(warp::body::bytes())
        .map(move |method: Method, path: FullPath, query: HashMap<String, String>, body: Bytes| {
            let request = Request::new(method, path.as_str())
                .with_query(query)
                .with_body(body.to_vec());
            into_reply(table.dispatch(request))
        })
}

fn into_reply(response: Response) -> warp::reply::WithStatus<warp::reply::Json> {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warp::reply::with_status(warp::reply::json(&response.body), status)
}

/// Serve the table until Ctrl-C.
pub async fn serve(table: Arc<RouteTable>, addr: SocketAddr) -> Result<(), warp::Error> {
    let routes = table.len();
    let (bound, server) = warp::serve(filter(table)).try_bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })?;
    info!(%bound, routes, "listening");
    server.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::RouterExt;
    use serde_json::{json, Value};

    fn table() -> Arc<RouteTable> {
        let mut table = RouteTable::new();
        table
            .get("/items/:id", |request| {
                Response::ok(json!({
                    "id": request.param("id"),
                    "verbose": request.query("verbose"),
                }))
            })
            .unwrap();
        table
            .post("/items", |request| match request.json::<Value>() {
                Ok(body) => Response::created(body),
                Err(err) => Response::bad_request(err),
            })
            .unwrap();
        Arc::new(table)
    }

    #[tokio::test]
    async fn forwards_path_query_and_status() {
        let response = warp::test::request()
            .method("GET")
            .path("/items/7?verbose=yes")
            .reply(&filter(table()))
            .await;

        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({ "id": "7", "verbose": "yes" }));
    }

    #[tokio::test]
    async fn query_values_are_percent_decoded() {
        let response = warp::test::request()
            .method("GET")
            .path("/items/3?verbose=buy%20milk%26eggs")
            .reply(&filter(table()))
            .await;

        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["verbose"], "buy milk&eggs");
    }

    #[tokio::test]
    async fn forwards_body_and_errors() {
        let filter = filter(table());

        let created = warp::test::request()
            .method("POST")
            .path("/items")
            .body(r#"{"name":"lamp"}"#)
            .reply(&filter)
            .await;
        assert_eq!(created.status(), 201);

        let invalid = warp::test::request()
            .method("POST")
            .path("/items")
            .body("not json")
            .reply(&filter)
            .await;
        assert_eq!(invalid.status(), 400);

        let missing = warp::test::request()
            .method("GET")
            .path("/elsewhere")
            .reply(&filter)
            .await;
        assert_eq!(missing.status(), 404);
    }
}
