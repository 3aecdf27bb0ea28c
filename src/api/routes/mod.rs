//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`jobs`] — Submission, status, admin listing, cleanup
//! - [`files`] — Archive delivery with byte-range support
//! - [`logs`] — WebSocket log stream
//! - [`system`] — Health and OpenAPI

mod files;
mod jobs;
mod logs;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use files::*;
pub use jobs::*;
pub use logs::*;
pub use system::*;
