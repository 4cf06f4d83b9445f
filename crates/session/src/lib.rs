//! Upload sessions and the lifecycle of their files.
//!
//! A session starts with an uploaded statistics database, collects merge
//! groups in a staging list, commits them to a working copy, hands that copy
//! out for download and finally disappears, either explicitly or because it
//! expired. The [`Service`] is the entry point for all of that.
//!
//! Files are reclaimed independently by the [`Sweeper`], which deletes any
//! artifact older than the retention window unless its session is in the
//! [`ProtectionSet`] at that moment.

mod artifacts;
pub mod error;
mod id;
mod protection;
mod service;
mod session;
mod staging;
mod store;
mod sweeper;

pub use crate::artifacts::{Artifacts, DOWNLOAD_NAME, EXTENSION, fixed_name, session_of, upload_name};
pub use crate::id::SessionId;
pub use crate::protection::{ProtectionGuard, ProtectionSet};
pub use crate::service::{Commit, Download, Service};
pub use crate::session::{Session, SessionInfo, SessionState, Validation};
pub use crate::staging::{MergeGroup, Staging};
pub use crate::store::{SessionHandle, SessionStore};
pub use crate::sweeper::{SweepReport, Sweeper, SweeperHandle};
