//! Minimal HTTP reverse proxy used by the gateway to reach workers.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{self, header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};

/// Largest request body forwarded upstream.
const MAX_FORWARD_BODY: usize = 64 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

#[derive(Debug, Clone, Default)]
pub struct ReverseProxy {
    client: Client,
}

impl ReverseProxy {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Forward `req` to `base` and stream the upstream response back.
    ///
    /// Upstream failures become `502 Bad Gateway`; nothing is retried.
    pub async fn forward(&self, base: &str, req: Request) -> Response {
        match self.try_forward(base, req).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Forwarding to {} failed: {}", base, e);
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }

    async fn try_forward(&self, base: &str, req: Request) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let target = target_url(base, parts.uri.path(), parts.uri.query())?;
        let body = to_bytes(body, MAX_FORWARD_BODY)
            .await
            .map_err(|e| ProxyError::transport(target.as_str(), e))?;

        debug!("Forwarding {} {} to {}", parts.method, parts.uri, target);
        let upstream = self
            .client
            .request(parts.method, target.clone())
            .headers(strip_hop_by_hop(parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::transport(target.as_str(), e))?;

        let mut response = http::Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            *headers = strip_hop_by_hop(upstream.headers().clone());
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ProxyError::transport(target.as_str(), e))
    }
}

/// Join the incoming path and query onto the worker's base URL.
pub fn target_url(base: &str, path: &str, query: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ProxyError::protocol(format!("invalid upstream {:?}: {}", base, e)))?;
    let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    Ok(url)
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_keeps_path_and_query() {
        let url = target_url(
            "http://192.168.1.9:9641/",
            "/file/download",
            Some("host=node-1&filePath=/a/1.txt"),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://192.168.1.9:9641/file/download?host=node-1&filePath=/a/1.txt"
        );
    }

    #[test]
    fn target_respects_base_prefix() {
        let url = target_url("http://10.0.0.1:80/files/", "/file/download", None).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1/files/file/download");
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close".parse().unwrap());
        headers.insert(header::HOST, "master:9631".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert(header::RANGE, "bytes=0-9".parse().unwrap());

        let headers = strip_hop_by_hop(headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::RANGE], "bytes=0-9");
    }
}
