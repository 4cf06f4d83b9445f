//! Background deletion of old artifacts.
//!
//! Every cycle lists each artifact directory and deletes files older than the
//! retention window, measured from their modification time. Files belonging
//! to a protected session are skipped whatever their age; the session is
//! claimed for the duration of the check and the delete, so it cannot become
//! protected halfway through. With a
//! [`Service`] attached, expired sessions are dropped first and their files
//! deleted with them.

use crate::artifacts::session_of;
use crate::protection::ProtectionSet;
use crate::Service;
use futures::StreamExt;
use komerge_storage::BackendHandle;
use time::{Duration, UtcDateTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// What one cleanup cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files deleted for being older than the retention window.
    pub removed: usize,
    /// Old files skipped because their session is in use.
    pub protected: usize,
    /// Files that could not be inspected or deleted.
    pub failed: usize,
    /// Expired sessions dropped, files included.
    pub reaped: usize,
}

pub struct Sweeper {
    directories: Vec<BackendHandle>,
    protection: ProtectionSet,
    retention: Duration,
    interval: std::time::Duration,
    sessions: Option<Service>,
}

impl Sweeper {
    pub fn new(
        directories: Vec<BackendHandle>,
        protection: ProtectionSet,
        retention: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self { directories, protection, retention, interval, sessions: None }
    }

    /// Sweep the directories of `service`, and reap its expired sessions on
    /// every cycle.
    pub fn for_service(service: &Service, retention: Duration, interval: std::time::Duration) -> Self {
        let mut sweeper = Self::new(
            service.artifacts().directories(),
            service.store().protection().clone(),
            retention,
            interval,
        );
        sweeper.sessions = Some(service.clone());
        sweeper
    }

    /// Run a single cleanup cycle as of `now`.
    ///
    /// Never fails: problems with individual files are logged, counted in
    /// [`SweepReport::failed`] and skipped.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, now: UtcDateTime) -> SweepReport {
        let mut report = SweepReport::default();
        if let Some(service) = &self.sessions {
            report.reaped = service.cleanup_expired_at(now).await;
        }

        for directory in &self.directories {
            let mut files = directory.list_stream();
            while let Some(entry) = files.next().await {
                let file = match entry {
                    Ok(file) => file,
                    Err(e) => {
                        tracing::warn!(directory = directory.name(), error = ?e, "could not inspect file");
                        report.failed += 1;
                        continue;
                    },
                };
                if file.age(now) <= self.retention {
                    continue;
                }
                // Claim the session before deciding, so that no operation can
                // start using its files until the delete is done.
                let _claim = match session_of(&file.path) {
                    Some(id) => match self.protection.claim(id) {
                        Some(claim) => Some(claim),
                        None => {
                            tracing::debug!(directory = directory.name(), path = %file.path.display(), "file in use, skipped");
                            report.protected += 1;
                            continue;
                        },
                    },
                    None => None,
                };
                // The listing may predate an operation that rewrote the file.
                let file = match directory.stat(&file.path).await {
                    Ok(file) => file,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => {
                        tracing::warn!(directory = directory.name(), path = %file.path.display(), error = ?e, "could not inspect file");
                        report.failed += 1;
                        continue;
                    },
                };
                if file.age(now) <= self.retention {
                    continue;
                }
                match directory.delete(&file.path).await {
                    Ok(()) => {
                        tracing::info!(directory = directory.name(), path = %file.path.display(), "removed old file");
                        report.removed += 1;
                    },
                    // Gone between listing and deleting: someone else did the job.
                    Err(e) if e.is_not_found() => {},
                    Err(e) => {
                        tracing::warn!(
                            directory = directory.name(),
                            path = %file.path.display(),
                            error = ?e,
                            "could not remove old file"
                        );
                        report.failed += 1;
                    },
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(?report, "cleanup cycle finished");
        }
        report
    }

    /// Run a cycle now and then once per interval, until the returned
    /// handle is shut down.
    pub fn spawn(self) -> SweeperHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let join = tokio::spawn(async move {
            tracing::info!(interval = ?self.interval, retention = %self.retention, "cleanup sweeper started");
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    // A cycle that has started is allowed to finish.
                    _ = timer.tick() => {
                        self.run_cycle(UtcDateTime::now()).await;
                    },
                }
            }
            tracing::info!("cleanup sweeper stopped");
        });
        SweeperHandle { token, join }
    }
}

/// Controls a running [`Sweeper`].
pub struct SweeperHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper, waiting for a cycle in progress to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "cleanup sweeper task failed");
        }
    }
}
