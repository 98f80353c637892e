//! Local HTTP fixtures for provider tests.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;

/// What a fixture handler gets to see of a request.
pub struct Request {
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Serve `handler` for every route on an ephemeral local port and return
/// the base URL.
pub async fn serve<F>(handler: F) -> String
where
    F: Fn(&Request) -> (u16, String) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let app = Router::new().fallback(
        move |uri: Uri, Query(query): Query<HashMap<String, String>>, headers: HeaderMap| {
            let handler = handler.clone();
            async move {
                let request = Request {
                    path: uri.path().to_string(),
                    query,
                    headers,
                };
                let (status, body) = handler(&request);
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, body)
            }
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}
