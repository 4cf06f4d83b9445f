//! Folding duplicate book records into one.
//!
//! A merge re-owns every page event of the absorbed books under the kept
//! book, drops the absorbed `book` rows and recomputes the kept book's totals
//! from its events. One call is one transaction: either every absorbed id is
//! folded in, or the file is left exactly as it was.

use crate::db::StatsDatabase;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use sqlx::{Connection, SqliteConnection};
use tracing::instrument;

/// Copy the absorbed book's events onto the kept book. Events that already
/// exist under the same `(id_book, page, start_time)` keep the larger
/// duration and page count; adding them up would count the same reading
/// twice.
const REOWN_EVENTS: &str = "\
    INSERT INTO page_stat_data (id_book, page, start_time, duration, total_pages) \
    SELECT ?, page, start_time, duration, total_pages FROM page_stat_data WHERE id_book = ? \
    ON CONFLICT (id_book, page, start_time) DO UPDATE SET \
        duration = MAX(duration, excluded.duration), \
        total_pages = MAX(total_pages, excluded.total_pages)";

const AGGREGATE_EVENTS: &str =
    "SELECT COALESCE(SUM(duration), 0), COUNT(DISTINCT page) FROM page_stat_data WHERE id_book = ?";

/// What a successful merge did to the kept book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub keep: i64,
    /// Ids of the books that no longer exist, in the order they were folded in.
    pub absorbed: Vec<i64>,
    /// Event rows copied or folded onto the kept book.
    pub events: u64,
    pub total_read_time: i64,
    pub total_read_pages: i64,
}

/// The ids to absorb: `merge` in order, without duplicates and without
/// `keep` itself.
fn absorbed_ids(keep: i64, merge: &[i64]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(merge.len());
    for &id in merge {
        if id != keep && !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        exn::bail!(ErrorKind::InvalidGroup(keep));
    }
    Ok(ids)
}

async fn ensure_book(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM book WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    found.ok_or_raise(|| ErrorKind::MissingBook(id))?;
    Ok(())
}

impl StatsDatabase {
    /// Fold the books in `merge` into `keep`.
    ///
    /// Fails with [`ErrorKind::MissingBook`] if `keep` or any of the absorbed
    /// ids does not exist, which is also what re-applying an already applied
    /// merge runs into. On any error the transaction is rolled back.
    #[instrument(skip(self))]
    pub async fn merge(&mut self, keep: i64, merge: &[i64]) -> Result<MergeOutcome> {
        let absorbed = absorbed_ids(keep, merge)?;
        let capabilities = *self.capabilities();

        // Dropping the transaction without committing rolls it back.
        let mut tx = self.conn.begin().await.or_raise(|| ErrorKind::Database)?;
        ensure_book(&mut tx, keep).await?;

        let mut events = 0;
        for &id in &absorbed {
            ensure_book(&mut tx, id).await?;
            events += sqlx::query(REOWN_EVENTS)
                .bind(keep)
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
            sqlx::query("DELETE FROM page_stat_data WHERE id_book = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query("DELETE FROM book WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            tracing::debug!(keep, absorbed = id, "absorbed book");
        }

        let (total_read_time, total_read_pages): (i64, i64) = sqlx::query_as(AGGREGATE_EVENTS)
            .bind(keep)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let update = match capabilities.total_read_pages {
            true => sqlx::query("UPDATE book SET total_read_time = ?, total_read_pages = ? WHERE id = ?")
                .bind(total_read_time)
                .bind(total_read_pages)
                .bind(keep),
            false => sqlx::query("UPDATE book SET total_read_time = ? WHERE id = ?").bind(total_read_time).bind(keep),
        };
        update.execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;

        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(keep, absorbed = absorbed.len(), events, total_read_time, total_read_pages, "merged books");
        Ok(MergeOutcome { keep, absorbed, events, total_read_time, total_read_pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use rstest::rstest;
    use std::path::Path;

    type Event = (i64, i64, i64, i64);

    async fn events_of(db: &mut StatsDatabase, book: i64) -> Vec<Event> {
        sqlx::query_as(
            "SELECT page, start_time, duration, total_pages FROM page_stat_data WHERE id_book = ? \
             ORDER BY page, start_time",
        )
        .bind(book)
        .fetch_all(&mut db.conn)
        .await
        .unwrap()
    }

    async fn totals_of(db: &mut StatsDatabase, book: i64) -> (i64, Option<i64>) {
        sqlx::query_as("SELECT total_read_time, total_read_pages FROM book WHERE id = ?")
            .bind(book)
            .fetch_one(&mut db.conn)
            .await
            .unwrap()
    }

    async fn book_ids(db: &mut StatsDatabase) -> Vec<i64> {
        db.books().await.unwrap().into_iter().map(|b| b.id).collect()
    }

    async fn duplicates(path: &Path) {
        Fixture::new()
            .book(1, "Dune")
            .book(2, "Dune (1)")
            .book(3, "Dune (copy)")
            .book(4, "Children of Dune")
            .event(1, 10, 1_000, 60, 400)
            .event(1, 11, 1_100, 40, 400)
            .event(2, 10, 1_000, 90, 380)
            .event(2, 12, 2_000, 30, 420)
            .event(3, 11, 1_100, 20, 410)
            .event(4, 1, 5_000, 15, 300)
            .write(path)
            .await
            .unwrap();
    }

    #[rstest]
    #[case::keep_only(5, vec![5])]
    #[case::keep_repeated(5, vec![5, 5])]
    #[case::empty(5, vec![])]
    fn test_absorbed_ids_rejects_degenerate_groups(#[case] keep: i64, #[case] merge: Vec<i64>) {
        let err = absorbed_ids(keep, &merge).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidGroup(k) if *k == keep));
    }

    #[test]
    fn test_absorbed_ids_filters_and_keeps_order() {
        assert_eq!(absorbed_ids(5, &[9, 5, 7, 9]).unwrap(), vec![9, 7]);
    }

    #[tokio::test]
    async fn test_collisions_take_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sqlite3");
        duplicates(&path).await;

        let mut db = StatsDatabase::open(&path).await.unwrap();
        db.merge(1, &[2, 3]).await.unwrap();
        let events = events_of(&mut db, 1).await;
        db.close().await.unwrap();

        assert_eq!(events, vec![
            // (1, 10, 1000): max(60, 90) and max(400, 380), not 150.
            (10, 1_000, 90, 400),
            (11, 1_100, 40, 410),
            (12, 2_000, 30, 420),
        ]);
    }

    #[tokio::test]
    async fn test_totals_recomputed_from_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sqlite3");
        Fixture::new()
            .book(1, "Dune")
            .book(2, "Dune (1)")
            .event(1, 1, 100, 50, 300)
            .event(2, 1, 100, 70, 300)
            .event(2, 2, 200, 10, 300)
            // Totals that have drifted away from the events must not survive.
            .stale_totals(1, 99_999, 42)
            .stale_totals(2, 12_345, 7)
            .write(&path)
            .await
            .unwrap();

        let mut db = StatsDatabase::open(&path).await.unwrap();
        let outcome = db.merge(1, &[2]).await.unwrap();
        assert_eq!(outcome.absorbed, vec![2]);
        assert_eq!((outcome.total_read_time, outcome.total_read_pages), (80, 2));
        assert_eq!(totals_of(&mut db, 1).await, (80, Some(2)));
        assert_eq!(book_ids(&mut db).await, vec![1]);
        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM page_stat_data WHERE id_book = 2")
            .fetch_one(&mut db.conn)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reapplying_merge_reports_missing_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sqlite3");
        duplicates(&path).await;

        let mut db = StatsDatabase::open(&path).await.unwrap();
        db.merge(1, &[2]).await.unwrap();
        let err = db.merge(1, &[2]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingBook(2)));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_keep_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sqlite3");
        duplicates(&path).await;

        let mut db = StatsDatabase::open(&path).await.unwrap();
        let err = db.merge(42, &[2]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingBook(42)));
        assert_eq!(book_ids(&mut db).await, vec![1, 2, 3, 4]);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_rolls_back_whole_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sqlite3");
        duplicates(&path).await;

        let mut db = StatsDatabase::open(&path).await.unwrap();
        let before = events_of(&mut db, 1).await;
        // Book 2 is folded in before 99 turns out not to exist.
        let err = db.merge(1, &[2, 99]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingBook(99)));
        db.close().await.unwrap();

        let mut db = StatsDatabase::open_read_only(&path).await.unwrap();
        assert_eq!(book_ids(&mut db).await, vec![1, 2, 3, 4]);
        assert_eq!(events_of(&mut db, 1).await, before);
        assert_eq!(events_of(&mut db, 2).await.len(), 2);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_on_legacy_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite3");
        Fixture::new()
            .legacy()
            .book(1, "Dune")
            .book(2, "Dune (1)")
            .event(1, 1, 100, 50, 300)
            .event(2, 2, 200, 25, 300)
            .write(&path)
            .await
            .unwrap();

        let mut db = StatsDatabase::open(&path).await.unwrap();
        let outcome = db.merge(1, &[2]).await.unwrap();
        assert_eq!(outcome.total_read_time, 75);
        let books = db.books().await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].total_read_time, 75);
        assert_eq!(books[0].total_read_pages, None);
        db.close().await.unwrap();
    }
}
