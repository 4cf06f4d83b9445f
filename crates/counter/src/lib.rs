//! Persisted download counter.
//!
//! A single number, kept in its own small SQLite database so that concurrent
//! downloads can bump it without losing updates: every increment is one
//! atomic `UPDATE`, never a read followed by a write.

mod counter;
mod db;
pub mod error;

pub use crate::counter::DownloadCounter;
pub use crate::db::Database;
