//! UiProof Common Library
//!
//! Shared types, error taxonomy and persistent stores for the UiProof
//! platform.

pub mod artifact;
pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use artifact::{ArtifactMeta, ArtifactStore};
pub use db::{Database, RunStore};
pub use error::{Error, Result};
pub use types::*;

/// UiProof version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".uiproof")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
