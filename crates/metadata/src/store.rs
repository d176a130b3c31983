//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::EntryRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: EntryRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Short backend name for logs ("sqlite", "memory").
    fn backend_name(&self) -> &'static str;
}

/// Fixed-width UTC timestamp layout, so text order matches time order.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
);

/// Render a timestamp the way `entries.created_at` stores it.
pub(crate) fn sql_timestamp(ts: OffsetDateTime) -> MetadataResult<String> {
    ts.to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| MetadataError::Internal(format!("failed to format timestamp: {e}")))
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout_secs: u64,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection also
            // serializes the reference count statements.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout_secs,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "opened sqlite catalog"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Bound a potentially long read (listing, aggregation) by the query timeout.
    ///
    /// SQLite cannot cancel a running statement, so the caller stops waiting
    /// but the statement still finishes on its connection.
    async fn with_timeout<T, F>(&self, fut: F) -> MetadataResult<T>
    where
        F: Future<Output = MetadataResult<T>> + Send,
    {
        tokio::time::timeout(Duration::from_secs(self.query_timeout_secs), fut)
            .await
            .map_err(|_| MetadataError::Timeout(self.query_timeout_secs))?
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{CatalogStats, DecrementOutcome, EntryFilter, Pagination};
    use sqlx::QueryBuilder;
    use uuid::Uuid;

    /// Append the WHERE clause for `filter`.
    fn push_filter(
        builder: &mut QueryBuilder<'_, Sqlite>,
        filter: &EntryFilter,
    ) -> MetadataResult<()> {
        builder.push(" WHERE 1 = 1");
        for needle in filter.name_needles() {
            builder.push(" AND instr(lower(original_name), lower(");
            builder.push_bind(needle.to_string());
            builder.push(")) > 0");
        }
        if let Some(content_type) = &filter.content_type {
            builder.push(" AND content_type = ");
            builder.push_bind(content_type.clone());
        }
        if let Some(min) = filter.size_min {
            builder.push(" AND size_bytes >= ");
            builder.push_bind(i64::try_from(min).unwrap_or(i64::MAX));
        }
        if let Some(max) = filter.size_max {
            builder.push(" AND size_bytes <= ");
            builder.push_bind(i64::try_from(max).unwrap_or(i64::MAX));
        }
        if let Some(after) = filter.created_after {
            builder.push(" AND created_at >= ");
            builder.push_bind(sql_timestamp(after)?);
        }
        if let Some(before) = filter.created_before {
            builder.push(" AND created_at <= ");
            builder.push_bind(sql_timestamp(before)?);
        }
        Ok(())
    }

    #[async_trait]
    impl EntryRepo for SqliteStore {
        async fn find_by_digest(&self, digest: &str) -> MetadataResult<Option<EntryRow>> {
            let row = sqlx::query_as::<_, EntryRow>("SELECT * FROM entries WHERE digest = ?")
                .bind(digest)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>> {
            let row = sqlx::query_as::<_, EntryRow>("SELECT * FROM entries WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn create_or_increment(
            &self,
            entry: &NewEntry,
        ) -> MetadataResult<(EntryRow, bool)> {
            let row = sqlx::query_as::<_, EntryRow>(
                r#"
                INSERT INTO entries (id, digest, object_key, original_name, content_type, size_bytes, created_at, reference_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, 1)
                ON CONFLICT(digest) DO UPDATE SET reference_count = entries.reference_count + 1
                RETURNING *
                "#,
            )
            .bind(entry.id)
            .bind(&entry.digest)
            .bind(&entry.object_key)
            .bind(&entry.original_name)
            .bind(&entry.content_type)
            .bind(entry.size_bytes)
            .bind(sql_timestamp(entry.created_at)?)
            .fetch_one(&self.pool)
            .await?;

            let created = row.id == entry.id;
            Ok((row, created))
        }

        async fn decrement_or_delete(
            &self,
            digest: &str,
            id: Uuid,
        ) -> MetadataResult<DecrementOutcome> {
            loop {
                let decremented = sqlx::query_as::<_, EntryRow>(
                    r#"
                    UPDATE entries SET reference_count = reference_count - 1
                    WHERE digest = ? AND id = ? AND reference_count > 1
                    RETURNING *
                    "#,
                )
                .bind(digest)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
                if let Some(row) = decremented {
                    return Ok(DecrementOutcome::Decremented(row));
                }

                let deleted = sqlx::query_as::<_, EntryRow>(
                    "DELETE FROM entries WHERE digest = ? AND id = ? AND reference_count <= 1 RETURNING *",
                )
                .bind(digest)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
                if let Some(row) = deleted {
                    return Ok(DecrementOutcome::Deleted(row));
                }

                // Neither matched: either the row is gone (or now belongs to
                // another id), or an increment landed between the two
                // statements and the decrement must be retried.
                match self.find_by_digest(digest).await? {
                    Some(current) if current.id == id => {}
                    _ => return Ok(DecrementOutcome::NotFound),
                }
                tracing::debug!(digest, "reference count changed concurrently, retrying");
            }
        }

        async fn delete_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>> {
            let row =
                sqlx::query_as::<_, EntryRow>("DELETE FROM entries WHERE id = ? RETURNING *")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_entries(
            &self,
            filter: &EntryFilter,
            page: Pagination,
        ) -> MetadataResult<Vec<EntryRow>> {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM entries");
            push_filter(&mut builder, filter)?;
            builder.push(" ORDER BY created_at DESC, id LIMIT ");
            builder.push_bind(i64::try_from(page.limit).unwrap_or(i64::MAX));
            builder.push(" OFFSET ");
            builder.push_bind(i64::try_from(page.offset).unwrap_or(i64::MAX));

            self.with_timeout(async {
                let rows = builder
                    .build_query_as::<EntryRow>()
                    .fetch_all(&self.pool)
                    .await?;
                Ok::<_, MetadataError>(rows)
            })
            .await
        }

        async fn count_entries(&self, filter: &EntryFilter) -> MetadataResult<u64> {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM entries");
            push_filter(&mut builder, filter)?;

            self.with_timeout(async {
                let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
                Ok::<_, MetadataError>(count as u64)
            })
            .await
        }

        async fn aggregate_stats(&self) -> MetadataResult<CatalogStats> {
            self.with_timeout(async {
                let (count, total, logical, saved): (i64, i64, i64, f64) = sqlx::query_as(
                    r#"
                    SELECT
                        COUNT(*),
                        COALESCE(SUM(size_bytes), 0),
                        COALESCE(SUM(size_bytes * reference_count), 0),
                        COALESCE(SUM(size_bytes - CAST(size_bytes AS REAL) / reference_count), 0.0)
                    FROM entries
                    "#,
                )
                .fetch_one(&self.pool)
                .await?;

                Ok::<_, MetadataError>(CatalogStats {
                    total_bytes: total as u64,
                    logical_bytes: logical as u64,
                    unique_blobs: count as u64,
                    saved_bytes: saved,
                })
            })
            .await
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- One row per distinct content digest
CREATE TABLE IF NOT EXISTS entries (
    id BLOB PRIMARY KEY,
    digest TEXT NOT NULL,
    object_key TEXT NOT NULL,
    original_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    created_at TEXT NOT NULL,
    reference_count INTEGER NOT NULL DEFAULT 1 CHECK (reference_count >= 1)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_digest ON entries(digest);
CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at);
"#;
