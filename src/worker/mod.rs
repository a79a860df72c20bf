pub mod announce;
pub mod files;
pub mod reload;

pub use announce::{AnnounceConfig, Announcer, LinkState};
pub use reload::{merge_file_paths, ReloadSource};
