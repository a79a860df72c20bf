use axum::body::Body;
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(rename = "filePath")]
    pub file_path: String,
}

/// Worker HTTP surface: streams local files by absolute path.
pub fn router() -> Router {
    Router::new().route("/file/download", get(download))
}

async fn download(Query(query): Query<DownloadQuery>) -> Response {
    let path = Path::new(&query.file_path);
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot open {}: {}", path.display(), e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let metadata = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    (
        [
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
