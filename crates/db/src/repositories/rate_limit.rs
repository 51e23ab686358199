use chrono::{DateTime, Utc};
use sqlx::Row;

use dialsync_core::domain::rate_limit::WindowHit;

use super::{millis_to_timestamp, parse_u32, RateLimitRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRateLimitRepository {
    pool: DbPool,
}

impl SqlRateLimitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RateLimitRepository for SqlRateLimitRepository {
    async fn hit(
        &self,
        bucket: &str,
        now: DateTime<Utc>,
        window_ms: i64,
    ) -> Result<WindowHit, RepositoryError> {
        // SQLite evaluates every SET expression against the pre-update row.
        let row = sqlx::query(
            "INSERT INTO rate_limit_window (bucket, window_start_ms, request_count)
             VALUES (?, ?, 1)
             ON CONFLICT(bucket) DO UPDATE SET
                request_count = CASE
                    WHEN excluded.window_start_ms - rate_limit_window.window_start_ms >= ? THEN 1
                    ELSE rate_limit_window.request_count + 1
                END,
                window_start_ms = CASE
                    WHEN excluded.window_start_ms - rate_limit_window.window_start_ms >= ?
                        THEN excluded.window_start_ms
                    ELSE rate_limit_window.window_start_ms
                END
             RETURNING request_count, window_start_ms",
        )
        .bind(bucket)
        .bind(now.timestamp_millis())
        .bind(window_ms)
        .bind(window_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(WindowHit {
            count: parse_u32("request_count", row.try_get("request_count")?)?,
            window_start: millis_to_timestamp("window_start_ms", row.try_get("window_start_ms")?)?,
        })
    }

    async fn purge_stale(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM rate_limit_window WHERE window_start_ms < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::SqlRateLimitRepository;
    use crate::repositories::test_support::{parse_ts, setup_pool};
    use crate::repositories::RateLimitRepository;

    const WINDOW_MS: i64 = 60_000;

    #[tokio::test]
    async fn sql_rate_limit_repo_counts_within_window_and_resets_after() {
        let pool = setup_pool().await;
        let repo = SqlRateLimitRepository::new(pool.clone());
        let start = parse_ts("2026-03-01T10:00:00Z");

        let first = repo.hit("tenant:a|GET /x", start, WINDOW_MS).await.expect("first");
        assert_eq!(first.count, 1);
        assert_eq!(first.window_start, start);

        let second = repo
            .hit("tenant:a|GET /x", start + Duration::seconds(59), WINDOW_MS)
            .await
            .expect("second");
        assert_eq!(second.count, 2);
        assert_eq!(second.window_start, start);

        let other_bucket = repo
            .hit("tenant:b|GET /x", start + Duration::seconds(1), WINDOW_MS)
            .await
            .expect("other bucket");
        assert_eq!(other_bucket.count, 1);
        assert_eq!(other_bucket.window_start, start + Duration::seconds(1), "window opens at first hit");

        let next_window = start + Duration::seconds(60);
        let reset = repo.hit("tenant:a|GET /x", next_window, WINDOW_MS).await.expect("reset");
        assert_eq!(reset.count, 1);
        assert_eq!(reset.window_start, next_window);

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_rate_limit_repo_purges_stale_windows() {
        let pool = setup_pool().await;
        let repo = SqlRateLimitRepository::new(pool.clone());
        let start = parse_ts("2026-03-01T10:00:00Z");

        repo.hit("old", start, WINDOW_MS).await.expect("old");
        repo.hit("fresh", start + Duration::minutes(5), WINDOW_MS).await.expect("fresh");

        let purged = repo.purge_stale(start + Duration::minutes(1)).await.expect("purge");
        assert_eq!(purged, 1);

        pool.close().await;
    }
}
