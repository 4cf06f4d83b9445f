use crate::Database;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use time::UtcDateTime;
use tracing::instrument;

/// Number of completed downloads, shared by every session.
#[derive(Debug, Clone)]
pub struct DownloadCounter {
    db: Database,
}

impl DownloadCounter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current count.
    pub async fn get(&self) -> Result<u64> {
        let count: Option<i64> = sqlx::query_scalar("SELECT count FROM download_counter WHERE id = 1")
            .fetch_optional(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        to_count(count)
    }

    /// Add one and return the new count.
    ///
    /// A single `UPDATE ... RETURNING` statement, so concurrent callers can
    /// never overwrite each other's increments.
    #[instrument(skip(self))]
    pub async fn increment(&self) -> Result<u64> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE download_counter SET count = count + 1, last_updated = ? WHERE id = 1 RETURNING count",
        )
        .bind(UtcDateTime::now().unix_timestamp())
        .fetch_optional(self.db.pool())
        .await
        .or_raise(|| ErrorKind::Database)?;
        let count = to_count(count)?;
        tracing::debug!(count, "download counted");
        Ok(count)
    }
}

fn to_count(value: Option<i64>) -> Result<u64> {
    let value = value.ok_or_raise(|| ErrorKind::InvalidData)?;
    u64::try_from(value).or_raise(|| ErrorKind::InvalidData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::try_join_all;

    #[tokio::test]
    async fn test_starts_at_zero() {
        let counter = DownloadCounter::new(Database::connect_in_memory().await.unwrap());
        assert_eq!(counter.get().await.unwrap(), 0);
        assert_eq!(counter.increment().await.unwrap(), 1);
        assert_eq!(counter.increment().await.unwrap(), 2);
        assert_eq!(counter.get().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.sqlite3");

        let db = Database::connect(&path).await.unwrap();
        DownloadCounter::new(db.clone()).increment().await.unwrap();
        db.close().await;

        let db = Database::connect(&path).await.unwrap();
        assert_eq!(DownloadCounter::new(db.clone()).get().await.unwrap(), 1);
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("counter.sqlite3")).await.unwrap();
        let counter = DownloadCounter::new(db.clone());

        let tasks = (0..32).map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move { counter.increment().await.unwrap() })
        });
        let mut results = try_join_all(tasks).await.unwrap();
        results.sort_unstable();

        assert_eq!(results, (1..=32).collect::<Vec<u64>>());
        assert_eq!(counter.get().await.unwrap(), 32);
        db.close().await;
    }

    #[test]
    fn test_negative_count_is_invalid() {
        let err = to_count(Some(-1)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData));
        assert!(to_count(None).is_err());
    }
}
