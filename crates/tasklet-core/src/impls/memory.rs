//! InMemoryTaskStore - メモリ上の実装
//!
//! `std::sync::Mutex` で守ったテーブルとロック集合。mutex は await を
//! またいで保持しない。本体の実行中に他の consumer から claim 済みレコードを
//! 隠すのはロック集合の役目。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{NewTask, StatusCounts, TaskId, TaskRecord, TaskStatus};
use crate::ports::{Claim, ListFilter, StoreError, TaskStore};

/// メモリ上のテーブル状態
#[derive(Default)]
struct TableState {
    /// 全レコード（id をキーにするので id 順に走査される）
    records: BTreeMap<TaskId, TaskRecord>,

    /// claim 中の id
    locked: HashSet<TaskId>,

    /// 最後に払い出した id
    last_id: i64,
}

impl TableState {
    fn allocate_id(&mut self) -> TaskId {
        self.last_id += 1;
        TaskId::new(self.last_id)
    }

    fn insert(&mut self, task: NewTask) -> TaskRecord {
        let id = self.allocate_id();
        let record = task.into_record(id);
        self.records.insert(id, record.clone());
        record
    }

    /// `queue` で最も優先度の高い、ロックされていない実行可能なレコード
    fn next_due(&self, queue: &str, now: DateTime<Utc>) -> Option<&TaskRecord> {
        self.records
            .values()
            .filter(|r| r.queue == queue && r.is_due(now) && !self.locked.contains(&r.id))
            .min_by_key(|r| (r.not_before.is_some(), r.not_before, r.id))
    }
}

fn lock(state: &Mutex<TableState>) -> Result<MutexGuard<'_, TableState>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Backend("in-memory table lock poisoned".to_string()))
}

/// InMemoryTaskStore はテスト、デモ、単一プロセス組み込み用の store
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<TableState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// claim 中のレコード数
    pub fn locked_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.locked.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError> {
        let mut state = lock(&self.state)?;
        Ok(state.insert(task))
    }

    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Box<dyn Claim>>, StoreError> {
        let mut state = lock(&self.state)?;
        let Some(record) = state.next_due(queue, now).cloned() else {
            return Ok(None);
        };
        state.locked.insert(record.id);

        Ok(Some(Box::new(MemoryClaim {
            state: Arc::clone(&self.state),
            record,
            released: false,
        })))
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state.records.get(&id).cloned())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let state = lock(&self.state)?;
        let matching = state.records.values().filter(|r| filter.matches(r)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn counts(&self, queue: Option<&str>) -> Result<StatusCounts, StoreError> {
        let state = lock(&self.state)?;
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            if queue.is_none_or(|q| q == record.queue) {
                counts.add(record.status, 1);
            }
        }
        Ok(counts)
    }

    async fn delete_by_status(&self, status: TaskStatus) -> Result<Vec<TaskId>, StoreError> {
        let mut state = lock(&self.state)?;
        let TableState {
            records, locked, ..
        } = &mut *state;

        let ids: Vec<TaskId> = records
            .values()
            .filter(|r| r.status == status && !locked.contains(&r.id))
            .map(|r| r.id)
            .collect();
        for id in &ids {
            records.remove(id);
        }
        Ok(ids)
    }

    async fn reset_failed(&self) -> Result<u64, StoreError> {
        let mut state = lock(&self.state)?;
        let mut reset = 0;
        for record in state.records.values_mut() {
            if record.status == TaskStatus::Failed {
                record.reset_for_reprocessing();
                reset += 1;
            }
        }
        Ok(reset)
    }
}

/// MemoryClaim は claim のガード（解放済みでなければ drop 時にロックを外す）
struct MemoryClaim {
    state: Arc<Mutex<TableState>>,
    record: TaskRecord,
    released: bool,
}

impl MemoryClaim {
    fn release(&mut self, state: &mut TableState) {
        state.locked.remove(&self.record.id);
        self.released = true;
    }
}

#[async_trait]
impl Claim for MemoryClaim {
    fn record(&self) -> &TaskRecord {
        &self.record
    }

    async fn commit(
        mut self: Box<Self>,
        updated: TaskRecord,
        children: Vec<NewTask>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let shared = Arc::clone(&self.state);
        let mut state = lock(&shared)?;
        self.release(&mut state);

        let Some(slot) = state.records.get_mut(&self.record.id) else {
            return Err(StoreError::NotFound(self.record.id));
        };
        *slot = updated;

        Ok(children.into_iter().map(|c| state.insert(c)).collect())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.state);
        let mut state = lock(&shared)?;
        self.release(&mut state);
        Ok(())
    }
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // poison されていても lock は外す
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.locked.remove(&self.record.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 30, 18, 30, 0).unwrap()
    }

    fn new_task(queue: &str, not_before: Option<DateTime<Utc>>) -> NewTask {
        NewTask {
            function_id: "tests.add".to_string(),
            queue: queue.to_string(),
            created_at: t0(),
            not_before,
            serialized_params: None,
            retry_delay: 120,
            max_retries: 0,
        }
    }

    async fn complete(claim: Box<dyn Claim>) {
        let mut record = claim.record().clone();
        record.mark_completed("bnVsbA==".to_string(), t0());
        claim.commit(record, Vec::new()).await.unwrap();
    }

    async fn claimed_ids(store: &InMemoryTaskStore, now: DateTime<Utc>) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(claim) = store.claim_next("default", now).await.unwrap() {
            ids.push(claim.record().id.get());
            complete(claim).await;
        }
        ids
    }

    #[tokio::test]
    async fn null_eta_first_then_ascending_eta() {
        let store = InMemoryTaskStore::new();
        for offset in [10, 20, 30, 40] {
            let eta = t0() + TimeDelta::seconds(offset);
            store.insert(new_task("default", Some(eta))).await.unwrap();
        }
        store.insert(new_task("default", None)).await.unwrap();

        let ids = claimed_ids(&store, t0() + TimeDelta::minutes(1)).await;

        assert_eq!(ids, vec![5, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn null_eta_records_keep_creation_order() {
        let store = InMemoryTaskStore::new();
        store.insert(new_task("default", Some(t0()))).await.unwrap();
        for _ in 0..4 {
            store.insert(new_task("default", None)).await.unwrap();
        }

        let ids = claimed_ids(&store, t0()).await;

        assert_eq!(ids, vec![2, 3, 4, 5, 1]);
    }

    #[tokio::test]
    async fn future_eta_and_other_queues_are_invisible() {
        let store = InMemoryTaskStore::new();
        store
            .insert(new_task("default", Some(t0() + TimeDelta::seconds(1))))
            .await
            .unwrap();
        store.insert(new_task("other", None)).await.unwrap();

        assert!(store.claim_next("default", t0()).await.unwrap().is_none());
        assert!(
            store
                .claim_next("default", t0() + TimeDelta::seconds(1))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn claimed_records_are_skipped() {
        let store = InMemoryTaskStore::new();
        store.insert(new_task("default", None)).await.unwrap();
        store.insert(new_task("default", None)).await.unwrap();

        let first = store.claim_next("default", t0()).await.unwrap().unwrap();
        let second = store.claim_next("default", t0()).await.unwrap().unwrap();

        assert_ne!(first.record().id, second.record().id);
        assert!(store.claim_next("default", t0()).await.unwrap().is_none());
        assert_eq!(store.locked_count(), 2);
    }

    #[tokio::test]
    async fn dropped_claim_leaves_record_claimable() {
        let store = InMemoryTaskStore::new();
        let record = store.insert(new_task("default", None)).await.unwrap();

        let claim = store.claim_next("default", t0()).await.unwrap().unwrap();
        drop(claim);

        assert_eq!(store.locked_count(), 0);
        assert_eq!(store.get(record.id).await.unwrap(), Some(record.clone()));
        let again = store.claim_next("default", t0()).await.unwrap().unwrap();
        assert_eq!(again.record().id, record.id);
        again.rollback().await.unwrap();
        assert_eq!(store.locked_count(), 0);
    }

    #[tokio::test]
    async fn commit_writes_record_and_children() {
        let store = InMemoryTaskStore::new();
        store.insert(new_task("default", None)).await.unwrap();

        let claim = store.claim_next("default", t0()).await.unwrap().unwrap();
        let mut record = claim.record().clone();
        record.mark_completed("bnVsbA==".to_string(), t0());
        let children = claim
            .commit(record, vec![new_task("default", None)])
            .await
            .unwrap();

        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, TaskId::new(2));
        assert_eq!(children[0].status, TaskStatus::Created);

        let counts = store.counts(None).await.unwrap();
        assert_eq!((counts.created, counts.completed), (1, 1));
    }

    #[tokio::test]
    async fn delete_and_reset_by_status() {
        let store = InMemoryTaskStore::new();
        for _ in 0..3 {
            store.insert(new_task("default", None)).await.unwrap();
        }
        let claim = store.claim_next("default", t0()).await.unwrap().unwrap();
        complete(claim).await;
        let claim = store.claim_next("default", t0()).await.unwrap().unwrap();
        let mut failed = claim.record().clone();
        failed.retry_attempts = 2;
        failed.mark_failed(t0());
        claim.commit(failed, Vec::new()).await.unwrap();

        assert_eq!(store.reset_failed().await.unwrap(), 1);
        let reset = store.get(TaskId::new(2)).await.unwrap().unwrap();
        assert_eq!(reset.status, TaskStatus::Created);
        assert_eq!(reset.retry_attempts, 0);

        let deleted = store.delete_by_status(TaskStatus::Completed).await.unwrap();
        assert_eq!(deleted, vec![TaskId::new(1)]);
        assert_eq!(store.counts(None).await.unwrap().total(), 2);
    }

    #[tokio::test]
    async fn list_filters_and_limits() {
        let store = InMemoryTaskStore::new();
        store.insert(new_task("a", None)).await.unwrap();
        store.insert(new_task("b", None)).await.unwrap();
        store.insert(new_task("a", None)).await.unwrap();

        let filter = ListFilter {
            queue: Some("a".into()),
            limit: Some(1),
            ..ListFilter::default()
        };
        let listed = store.list(&filter).await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, TaskId::new(1));
        assert_eq!(store.counts(Some("b")).await.unwrap().created, 1);
    }
}
