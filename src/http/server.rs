//! HTTP Server - axum front end for the blob store
//!
//! Routes:
//! - `PUT /` stores the request body under a fresh UUID and returns the name
//! - `GET /?name=N` returns the blob and refreshes its lifetime
//! - `DELETE /?name=N` removes the blob
//! - `GET /health` reports store status

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::http::ApiError;
use crate::store::{BlobStore, StoreStats};

/// State shared by all request handlers
pub struct AppState {
    pub store: Arc<BlobStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            started_at: Instant::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Query string carrying a blob name
#[derive(Debug, Deserialize)]
pub struct NameQuery {
    name: Option<String>,
}

impl NameQuery {
    fn require(self) -> Result<String, ApiError> {
        self.name
            .filter(|n| !n.is_empty())
            .ok_or(ApiError::MissingName)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    #[serde(flatten)]
    store: StoreStats,
}

/// Build the router
///
/// The body limit sits one byte above the store limit so oversized uploads
/// reach the store and are rejected there.
pub fn create_router(state: SharedState) -> Router {
    let body_limit = state.store.max_entry_size().saturating_add(1);

    Router::new()
        .route("/", get(download).put(upload).delete(remove))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server bound to a TCP port
pub struct HttpServer {
    state: SharedState,
    listener: Option<TcpListener>,
}

impl HttpServer {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    /// Bind the listening socket
    pub async fn start(&mut self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;

        info!(addr = %addr, "HTTP server started");
        self.listener = Some(listener);
        Ok(())
    }

    /// Serve requests until `shutdown` resolves
    ///
    /// In-flight requests are drained before this returns.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.listener.context("Server not started")?;
        let router = create_router(self.state);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server error")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Run a store operation off the async executor
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, crate::store::StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// Store the request body under a freshly generated name
async fn upload(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, String), ApiError> {
    let name = Uuid::new_v4().to_string();
    let size = body.len();

    let store = Arc::clone(&state.store);
    let key = name.clone();
    run_blocking(move || store.create(&key, &body)).await?;

    info!(name = %name, size = size, "Blob uploaded");
    Ok((StatusCode::CREATED, name))
}

/// Return a blob's payload
async fn download(
    State(state): State<SharedState>,
    Query(query): Query<NameQuery>,
) -> Result<Response, ApiError> {
    let name = query.require()?;

    let store = Arc::clone(&state.store);
    let key = name.clone();
    let data = run_blocking(move || store.fetch(&key)).await?;

    debug!(name = %name, size = data.len(), "Blob served");
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// Delete a blob
async fn remove(
    State(state): State<SharedState>,
    Query(query): Query<NameQuery>,
) -> Result<StatusCode, ApiError> {
    let name = query.require()?;

    let store = Arc::clone(&state.store);
    let key = name.clone();
    run_blocking(move || store.delete(&key)).await?;

    info!(name = %name, "Blob deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        store: state.store.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn create_test_state(dir: &TempDir) -> SharedState {
        let config = StoreConfig::new(dir.path()).with_max_entry_size(8);
        let store = BlobStore::with_config(config).unwrap();
        Arc::new(AppState::new(Arc::new(store)))
    }

    fn request(method: Method, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn upload_blob(state: &SharedState, data: &'static [u8]) -> String {
        let response = create_router(Arc::clone(state))
            .oneshot(request(Method::PUT, "/", Body::from(data)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        String::from_utf8(body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);

        let name = upload_blob(&state, &[1, 2, 3]).await;
        assert!(Uuid::parse_str(&name).is_ok());
        assert!(state.store.contains(&name));

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::GET, &format!("/?name={}", name), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(body_bytes(response).await, vec![1, 2, 3]);

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::DELETE, &format!("/?name={}", name), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::GET, &format!("/?name={}", name), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_uploads_get_distinct_names() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);

        let first = upload_blob(&state, b"a").await;
        let second = upload_blob(&state, b"a").await;

        assert_ne!(first, second);
        assert_eq!(state.store.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::PUT, "/", Body::from(vec![0u8; 9])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_upload_far_over_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::PUT, "/", Body::from(vec![0u8; 1024])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_name_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);

        for method in [Method::GET, Method::DELETE] {
            let response = create_router(Arc::clone(&state))
                .oneshot(request(method, "/", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::DELETE, "/?name=missing", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let state = create_test_state(&dir);
        upload_blob(&state, b"x").await;

        let response = create_router(Arc::clone(&state))
            .oneshot(request(Method::GET, "/health", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["entries"], 1);
        assert_eq!(json["max_entry_size"], 8);
    }
}
