//! Master HTTP surface: worker listing and download forwarding.

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::{Directory, WorkerRecord};
use crate::error::ProxyError;
use crate::proxy::ReverseProxy;

#[derive(Clone)]
pub struct GatewayState {
    pub directory: Directory,
    pub proxy: ReverseProxy,
}

#[derive(Debug, Deserialize)]
pub struct HostQuery {
    pub host: Option<String>,
}

/// JSON envelope returned by the list endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: "OK".to_string(),
            data,
        }
    }
}

pub fn router(directory: Directory) -> Router {
    router_with_proxy(directory, ReverseProxy::default())
}

pub fn router_with_proxy(directory: Directory, proxy: ReverseProxy) -> Router {
    Router::new()
        .route("/file/list", get(list_workers))
        .route("/file/download", get(download))
        .with_state(GatewayState { directory, proxy })
}

async fn list_workers(
    State(state): State<GatewayState>,
    Query(query): Query<HostQuery>,
) -> Json<ApiResponse<Vec<WorkerRecord>>> {
    let data = match query.host.filter(|h| !h.is_empty()) {
        Some(host) => state.directory.get(&host).await.into_iter().collect(),
        None => state.directory.list().await,
    };
    Json(ApiResponse::ok(data))
}

async fn download(
    State(state): State<GatewayState>,
    Query(query): Query<HostQuery>,
    req: Request,
) -> Result<Response, ProxyError> {
    let host = query.host.unwrap_or_default();
    let worker = state
        .directory
        .get(&host)
        .await
        .ok_or(ProxyError::UnknownHost { host })?;

    Ok(state.proxy.forward(&worker.http_base_address, req).await)
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::UnknownHost { .. } => StatusCode::NOT_FOUND,
            ProxyError::Transport { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Protocol { .. } | ProxyError::Framing { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Config { .. } | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!("Responding {}: {}", status, self);
        status.into_response()
    }
}
