//! JSON payloads carried inside control frames.

use serde::{Deserialize, Serialize};

use crate::codec::Frame;
use crate::error::{ProxyError, Result};

pub const CODE_OK: &str = "200";
pub const CODE_BAD_REQUEST: &str = "400";

/// Worker to master: who I am, where I serve, what I serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub host: String,
    #[serde(rename = "httpAddress")]
    pub http_address: String,
    #[serde(rename = "filePaths", default)]
    pub file_paths: Vec<String>,
}

impl Announcement {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        serde_json::from_slice(&frame.body).map_err(|e| ProxyError::protocol(e.to_string()))
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let body = serde_json::to_vec(self).map_err(|e| ProxyError::protocol(e.to_string()))?;
        Ok(Frame::data(body))
    }
}

/// Master to worker status reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub code: String,
    pub msg: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            code: CODE_OK.to_string(),
            msg: "OK".to_string(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            code: CODE_BAD_REQUEST.to_string(),
            msg: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        serde_json::from_slice(&frame.body)
            .map_err(|e| ProxyError::protocol(format!("unreadable reply: {}", e)))
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let body = serde_json::to_vec(self).map_err(|e| ProxyError::protocol(e.to_string()))?;
        Ok(Frame::data(body))
    }
}
