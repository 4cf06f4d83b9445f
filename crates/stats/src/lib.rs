//! KOReader reading-statistics databases.
//!
//! Everything here works on a single statistics file at a time: recognising
//! it ([`validate`]), listing its books ([`StatsDatabase::books`]) and folding
//! duplicate book records together ([`StatsDatabase::merge`]).

mod catalog;
mod db;
pub mod error;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
mod merge;
mod schema;

pub use crate::catalog::{Book, UNKNOWN_AUTHOR};
pub use crate::db::{StatsDatabase, validate};
pub use crate::merge::MergeOutcome;
pub use crate::schema::Capabilities;
