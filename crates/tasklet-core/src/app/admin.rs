//! Admin - 運用コマンド
//!
//! タスクテーブルの一括メンテナンス。processor 以外で既存レコードを
//! 変更するのはここだけ。

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::{StatusCounts, TaskId, TaskRecord, TaskStatus, TaskSummary};
use crate::ports::{ListFilter, StoreError, TaskStore};

/// Admin は運用向けの一括操作
#[derive(Clone)]
pub struct Admin {
    store: Arc<dyn TaskStore>,
}

impl Admin {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn delete_failed(&self) -> Result<Vec<TaskId>, StoreError> {
        self.delete(TaskStatus::Failed).await
    }

    #[instrument(skip(self))]
    pub async fn delete_completed(&self) -> Result<Vec<TaskId>, StoreError> {
        self.delete(TaskStatus::Completed).await
    }

    async fn delete(&self, status: TaskStatus) -> Result<Vec<TaskId>, StoreError> {
        let ids = self.store.delete_by_status(status).await?;
        for id in &ids {
            info!(task.id = %id, %status, "task deleted");
        }
        info!(count = ids.len(), %status, "delete finished");
        Ok(ids)
    }

    /// FAILED → CREATED（リトライ回数 0）にして consumer が再び拾えるようにする
    #[instrument(skip(self))]
    pub async fn mark_failed_consumable(&self) -> Result<u64, StoreError> {
        let reset = self.store.reset_failed().await?;
        info!(count = reset, "failed tasks marked consumable");
        Ok(reset)
    }

    pub async fn counts(&self, queue: Option<&str>) -> Result<StatusCounts, StoreError> {
        self.store.counts(queue).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<TaskSummary>, StoreError> {
        let records = self.store.list(filter).await?;
        Ok(records.iter().map(TaskRecord::summary).collect())
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testing::{self, AlwaysFails, Harness, Recorder};
    use crate::typed::Task;

    /// completed 2 件と failed 2 件
    async fn seeded() -> Harness {
        let h = testing::harness(Settings::default());
        for token in 0..2u64 {
            h.scheduler.atask(Recorder::NAME).schedule(&token).await.unwrap();
            h.scheduler.task(AlwaysFails::NAME).schedule(&()).await.unwrap();
        }
        h.consumer.drain("default").await.unwrap();
        h
    }

    #[tokio::test]
    async fn delete_failed_keeps_completed() {
        let h = seeded().await;

        let deleted = h.admin.delete_failed().await.unwrap();

        assert_eq!(deleted, vec![TaskId::new(2), TaskId::new(4)]);
        let counts = h.admin.counts(None).await.unwrap();
        assert_eq!((counts.completed, counts.failed), (2, 0));
    }

    #[tokio::test]
    async fn delete_completed_keeps_failed() {
        let h = seeded().await;

        let deleted = h.admin.delete_completed().await.unwrap();

        assert_eq!(deleted, vec![TaskId::new(1), TaskId::new(3)]);
        let counts = h.admin.counts(None).await.unwrap();
        assert_eq!((counts.completed, counts.failed), (0, 2));
    }

    #[tokio::test]
    async fn reset_makes_failed_records_consumable() {
        let h = seeded().await;

        assert_eq!(h.admin.mark_failed_consumable().await.unwrap(), 2);

        let failed = ListFilter {
            status: Some(TaskStatus::Failed),
            ..ListFilter::default()
        };
        assert!(h.admin.list(&failed).await.unwrap().is_empty());
        let record = h.admin.get(TaskId::new(2)).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Created);
        assert_eq!(record.retry_attempts, 0);
        assert_eq!(record.failed_at, None);

        // 再投入されたものは consumer が拾う
        assert_eq!(h.consumer.drain("default").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_renders_summaries() {
        let h = seeded().await;

        let all = h.admin.list(&ListFilter::default()).await.unwrap();

        assert_eq!(all.len(), 4);
        assert_eq!(all[0].retry_delay, "120s");
        assert_eq!(all[1].status, TaskStatus::Failed);
    }
}
