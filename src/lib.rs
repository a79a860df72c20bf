// Re-export main modules for use by the binary and integration tests
pub mod codec;
pub mod config;
pub mod control;
pub mod daemon;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod proxy;
pub mod worker;

pub use codec::{Frame, FrameCodec};
pub use config::{MasterConfig, WorkerConfig};
pub use control::{ControlOptions, ControlServer};
pub use directory::{Directory, WorkerRecord};
pub use error::{ProxyError, Result};
pub use worker::{AnnounceConfig, Announcer, LinkState};
