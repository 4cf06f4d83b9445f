//! Flat artifact directories.
//!
//! Uploaded statistics databases and the corrected copies produced from them
//! live in plain directories with no nesting: every artifact is addressed by
//! its file name alone. The [`StorageBackend`] trait hides whether that
//! directory is on disk ([`LocalBackend`](backend::LocalBackend)) or in
//! memory (`MockBackend`, behind the `mock` feature).

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_name;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
