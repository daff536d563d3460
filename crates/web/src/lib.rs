//! UiProof Web
//!
//! HTTP surface over the orchestration engine: run admission, run and
//! artifact lookups, retention sweeps and the live WebSocket event feed.

pub mod server;

pub use server::WebServer;
