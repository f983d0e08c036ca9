//! TaskStore port - タスクテーブルの正本（source of truth）
//!
//! 実装:
//! - `impls::memory::InMemoryTaskStore`（テスト、デモ、組み込み用）
//! - `impls::postgres::PostgresTaskStore`（feature `postgres`）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{NewTask, StatusCounts, TaskId, TaskRecord, TaskStatus};

/// StoreError は TaskStore の操作エラー
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} does not exist")]
    NotFound(TaskId),

    /// 保存された行をレコードに戻せなかった
    #[error("corrupt task row: {0}")]
    Corrupt(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Claim は CREATED レコード 1 件に対する排他的な保持
///
/// claim は処理のトランザクションそのもの。選択、実行中の副作用、最終状態の
/// 書き込みはまとめて commit されるか、どれも残らない。
/// `commit` を呼ばずに drop すると `rollback` と同じ。
#[async_trait]
pub trait Claim: Send {
    /// claim した時点のレコード
    fn record(&self) -> &TaskRecord;

    /// `updated` を保存して `children` を挿入し、ロックを外す
    /// 挿入した子タスクを id 付きで返す。
    async fn commit(
        self: Box<Self>,
        updated: TaskRecord,
        children: Vec<NewTask>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// 何も変更せずにロックを外す
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// ListFilter は運用向け一覧の絞り込み（結果は id 順）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub queue: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.queue.as_deref().is_none_or(|q| q == record.queue)
            && self.status.is_none_or(|s| s == record.status)
    }
}

/// TaskStore は状態の正本
///
/// # 設計原則
/// - claim と状態遷移は同一トランザクション内
/// - 他の consumer が握っている行は待たずに飛ばす
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// CREATED の新規レコードを保存し、id 付きで返す
    async fn insert(&self, task: NewTask) -> Result<TaskRecord, StoreError>;

    /// `queue` で最も優先度の高い実行可能なレコードをロックする
    ///
    /// 実行可能: `status == Created` かつ `not_before` が null か `<= now`
    /// 順序: `not_before` が null のもの → `not_before` 昇順 → id
    /// 他者が claim 中のレコードは飛ばす。
    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Box<dyn Claim>>, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<TaskRecord>, StoreError>;

    /// status ごとの件数（キューで絞り込み可）
    async fn counts(&self, queue: Option<&str>) -> Result<StatusCounts, StoreError>;

    /// `status` のレコードを全削除し、削除した id を昇順で返す
    async fn delete_by_status(&self, status: TaskStatus) -> Result<Vec<TaskId>, StoreError>;

    /// FAILED → CREATED（リトライ回数 0）。戻したレコード数を返す
    async fn reset_failed(&self) -> Result<u64, StoreError>;
}
