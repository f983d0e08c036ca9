//! PostgresTaskStore - PostgreSQL 実装
//!
//! claim ごとに `sqlx::Transaction` を 1 つ持つ。claim クエリは
//! `FOR UPDATE SKIP LOCKED` で 1 行だけロックするので、consumer 同士は待たず、
//! 同じ行を見ることもない。processor が書くもの（更新したレコードと
//! ステージした子タスク）はすべて同じトランザクションを通る。
//! claim を drop するとトランザクションも drop され、rollback される。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use crate::domain::{NewTask, StatusCounts, TaskId, TaskRecord, TaskStatus};
use crate::ports::{Claim, ListFilter, StoreError, TaskStore};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tasklet_tasks (
    id                BIGSERIAL PRIMARY KEY,
    function_id       TEXT        NOT NULL,
    queue             TEXT        NOT NULL,
    status            TEXT        NOT NULL DEFAULT 'created',
    created_at        TIMESTAMPTZ NOT NULL,
    completed_at      TIMESTAMPTZ,
    failed_at         TIMESTAMPTZ,
    not_before        TIMESTAMPTZ,
    serialized_params TEXT,
    serialized_result TEXT,
    retry_attempts    BIGINT      NOT NULL DEFAULT 0 CHECK (retry_attempts >= 0),
    retry_delay       BIGINT      NOT NULL CHECK (retry_delay >= 0),
    max_retries       BIGINT      NOT NULL CHECK (max_retries >= 0)
)
"#;

const CREATE_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS tasklet_tasks_claim_idx
    ON tasklet_tasks (queue, status, not_before, id)
"#;

const COLUMNS: &str = "id, function_id, queue, status, created_at, completed_at, failed_at, \
     not_before, serialized_params, serialized_result, retry_attempts, retry_delay, max_retries";

/// PostgresTaskStore は本番用の store
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// consumer プロセス 1 つ向けの小さなプールで接続する
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// タスクテーブルと claim 用インデックスがなければ作る
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_CLAIM_INDEX).execute(&self.pool).await?;
        debug!("schema ready");
        Ok(())
    }
}

fn to_u32(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn record_from_row(row: &PgRow) -> Result<TaskRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(TaskRecord {
        id: TaskId::new(row.try_get("id")?),
        function_id: row.try_get("function_id")?,
        queue: row.try_get("queue")?,
        status,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        failed_at: row.try_get("failed_at")?,
        not_before: row.try_get("not_before")?,
        serialized_params: row.try_get("serialized_params")?,
        serialized_result: row.try_get("serialized_result")?,
        retry_attempts: to_u32(row, "retry_attempts")?,
        retry_delay: to_u32(row, "retry_delay")?,
        max_retries: to_u32(row, "max_retries")?,
    })
}

async fn insert_row<'e, E: PgExecutor<'e>>(
    executor: E,
    task: NewTask,
) -> Result<TaskRecord, StoreError> {
    let sql = format!(
        "INSERT INTO tasklet_tasks \
             (function_id, queue, status, created_at, not_before, serialized_params, \
              retry_attempts, retry_delay, max_retries) \
         VALUES ($1, $2, 'created', $3, $4, $5, 0, $6, $7) \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(task.function_id)
        .bind(task.queue)
        .bind(task.created_at)
        .bind(task.not_before)
        .bind(task.serialized_params)
        .bind(i64::from(task.retry_delay))
        .bind(i64::from(task.max_retries))
        .fetch_one(executor)
        .await?;
    record_from_row(&row)
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task), fields(function_id = %task.function_id, queue = %task.queue), err)]
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        insert_row(&self.pool, task).await
    }

    #[instrument(skip(self), err)]
    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Box<dyn Claim>>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {COLUMNS} FROM tasklet_tasks \
             WHERE queue = $1 AND status = 'created' \
               AND (not_before IS NULL OR not_before <= $2) \
             ORDER BY not_before ASC NULLS FIRST, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        let row = sqlx::query(&sql)
            .bind(queue)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let record = record_from_row(&row)?;

        Ok(Some(Box::new(PgClaim { tx, record })))
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM tasklet_tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM tasklet_tasks \
             WHERE ($1::text IS NULL OR queue = $1) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY id ASC \
             LIMIT $3"
        );
        let limit = filter
            .limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX));
        let rows = sqlx::query(&sql)
            .bind(filter.queue.as_deref())
            .bind(filter.status.map(TaskStatus::as_str))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn counts(&self, queue: Option<&str>) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM tasklet_tasks \
             WHERE ($1::text IS NULL OR queue = $1) \
             GROUP BY status",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let status = status
                .parse::<TaskStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let n: i64 = row.try_get("n")?;
            counts.add(status, u64::try_from(n).unwrap_or_default());
        }
        Ok(counts)
    }

    #[instrument(skip(self), err)]
    async fn delete_by_status(&self, status: TaskStatus) -> Result<Vec<TaskId>, StoreError> {
        let rows = sqlx::query("DELETE FROM tasklet_tasks WHERE status = $1 RETURNING id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id").map(TaskId::new))
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }

    #[instrument(skip(self), err)]
    async fn reset_failed(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE tasklet_tasks \
             SET status = 'created', retry_attempts = 0, failed_at = NULL \
             WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// PgClaim は開いたトランザクションが持つ行ロック
struct PgClaim {
    tx: Transaction<'static, Postgres>,
    record: TaskRecord,
}

#[async_trait]
impl Claim for PgClaim {
    fn record(&self) -> &TaskRecord {
        &self.record
    }

    async fn commit(
        self: Box<Self>,
        updated: TaskRecord,
        children: Vec<NewTask>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let PgClaim { mut tx, record } = *self;

        let result = sqlx::query(
            "UPDATE tasklet_tasks SET \
                 status = $2, completed_at = $3, failed_at = $4, not_before = $5, \
                 serialized_result = $6, retry_attempts = $7 \
             WHERE id = $1",
        )
        .bind(record.id.get())
        .bind(updated.status.as_str())
        .bind(updated.completed_at)
        .bind(updated.failed_at)
        .bind(updated.not_before)
        .bind(updated.serialized_result)
        .bind(i64::from(updated.retry_attempts))
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id));
        }

        let mut inserted = Vec::with_capacity(children.len());
        for child in children {
            inserted.push(insert_row(&mut *tx, child).await?);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! `TASKLET_TEST_DATABASE_URL=postgres://... cargo test --features postgres -- --ignored` で実行

    use super::*;
    use chrono::TimeDelta;

    async fn store() -> PostgresTaskStore {
        let url = std::env::var("TASKLET_TEST_DATABASE_URL").unwrap();
        let store = PostgresTaskStore::connect(&url, 4).await.unwrap();
        store.ensure_schema().await.unwrap();
        sqlx::query("TRUNCATE tasklet_tasks RESTART IDENTITY")
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    fn new_task(not_before: Option<DateTime<Utc>>) -> NewTask {
        NewTask {
            function_id: "tests.add".to_string(),
            queue: "default".to_string(),
            created_at: Utc::now(),
            not_before,
            serialized_params: None,
            retry_delay: 120,
            max_retries: 3,
        }
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL"]
    async fn claims_skip_locked_rows_and_order_by_eta() {
        let store = store().await;
        let now = Utc::now();
        let late = store.insert(new_task(Some(now - TimeDelta::seconds(1)))).await.unwrap();
        let first = store.insert(new_task(None)).await.unwrap();

        let a = store.claim_next("default", now).await.unwrap().unwrap();
        let b = store.claim_next("default", now).await.unwrap().unwrap();

        assert_eq!(a.record().id, first.id);
        assert_eq!(b.record().id, late.id);
        assert!(store.claim_next("default", now).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL"]
    async fn commit_persists_state_and_children() {
        let store = store().await;
        let now = Utc::now();
        store.insert(new_task(None)).await.unwrap();

        let claim = store.claim_next("default", now).await.unwrap().unwrap();
        let mut record = claim.record().clone();
        record.mark_completed("bnVsbA==".to_string(), now);
        let children = claim.commit(record.clone(), vec![new_task(None)]).await.unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(children.len(), 1);
        assert_eq!(store.counts(None).await.unwrap().created, 1);
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL"]
    async fn dropped_claim_rolls_back() {
        let store = store().await;
        let now = Utc::now();
        let record = store.insert(new_task(None)).await.unwrap();

        let claim = store.claim_next("default", now).await.unwrap().unwrap();
        drop(claim);

        let again = store.claim_next("default", now).await.unwrap().unwrap();
        assert_eq!(again.record().id, record.id);
    }
}
