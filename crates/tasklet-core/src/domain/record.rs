//! TaskRecord - 保存される作業単位

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus};
use crate::typed::codec::{CodecError, PayloadCodec};

/// TaskRecord はタスクテーブルの 1 行
///
/// # 設計原則
/// - タスク状態の正本
/// - 状態遷移はすべて下のメソッドを通す（processor は `status` を直接
///   書き換えない）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub function_id: String,
    pub queue: String,
    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    /// claim できる最早時刻（eta / リトライのバックオフ）
    pub not_before: Option<DateTime<Utc>>,

    /// 引数なしのタスクでは `None`
    pub serialized_params: Option<String>,

    /// 完了時にだけ設定
    pub serialized_result: Option<String>,

    /// 消費済みのリトライ回数。成功後も残す
    pub retry_attempts: u32,

    /// 次のリトライ予約で「現在時刻」に足す秒数
    pub retry_delay: u32,

    /// `retry_attempts` の上限。0 でリトライなし
    pub max_retries: u32,
}

/// FailureTransition は失敗した実行がレコードに何をしたか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// `Created` のまま。`not_before` に再び claim できる
    Retry { not_before: DateTime<Utc> },

    /// `Failed` に移った
    Failed,
}

impl TaskRecord {
    /// リトライが有効で、まだ使い切っていない
    pub fn can_be_retried(&self) -> bool {
        self.max_retries > 0 && self.retry_attempts < self.max_retries
    }

    /// `not_before` が設定されていて、まだ未来
    pub fn is_postponed(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_some_and(|eta| now < eta)
    }

    /// `now` の時点で claim できる
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && !self.is_postponed(now)
    }

    pub fn mark_completed(&mut self, serialized_result: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.serialized_result = Some(serialized_result);
        self.completed_at = Some(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.failed_at = Some(now);
    }

    /// 失敗した実行にリトライの状態遷移を適用する
    ///
    /// リトライ対象の失敗はリトライを 1 回消費する。その後もまだリトライ
    /// できる場合に限り claim 可能なまま残り、最後の 1 回を使い切った失敗は
    /// 終端になる。バックオフは前回の `not_before` ではなく常に `now` から
    /// 測る。
    pub fn apply_failure(&mut self, now: DateTime<Utc>, retryable: bool) -> FailureTransition {
        if !retryable || !self.can_be_retried() {
            self.mark_failed(now);
            return FailureTransition::Failed;
        }

        self.retry_attempts += 1;
        if !self.can_be_retried() {
            self.mark_failed(now);
            return FailureTransition::Failed;
        }

        let not_before = now + TimeDelta::seconds(i64::from(self.retry_delay));
        self.not_before = Some(not_before);
        FailureTransition::Retry { not_before }
    }

    /// 失敗レコードの運用リセット
    pub fn reset_for_reprocessing(&mut self) {
        self.status = TaskStatus::Created;
        self.retry_attempts = 0;
        self.failed_at = None;
    }

    /// 保存された呼び出し引数を decode する
    pub fn params<A: DeserializeOwned>(&self) -> Result<A, CodecError> {
        PayloadCodec::decode_params(self.serialized_params.as_deref())
    }

    /// 保存された戻り値を decode する（完了済みの場合）
    pub fn result<R: DeserializeOwned>(&self) -> Result<Option<R>, CodecError> {
        self.serialized_result
            .as_deref()
            .map(PayloadCodec::decode)
            .transpose()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            function_id: self.function_id.clone(),
            queue: self.queue.clone(),
            status: self.status,
            not_before: self.not_before,
            created_at: self.created_at,
            retry_attempts: self.retry_attempts,
            retry_delay: format!("{}s", self.retry_delay),
            max_retries: self.max_retries,
        }
    }
}

/// NewTask は検証済みでまだ保存されていないレコード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub function_id: String,
    pub queue: String,
    pub created_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    pub serialized_params: Option<String>,
    pub retry_delay: u32,
    pub max_retries: u32,
}

impl NewTask {
    /// store が払い出した id を付ける
    pub fn into_record(self, id: TaskId) -> TaskRecord {
        TaskRecord {
            id,
            function_id: self.function_id,
            queue: self.queue,
            status: TaskStatus::Created,
            created_at: self.created_at,
            completed_at: None,
            failed_at: None,
            not_before: self.not_before,
            serialized_params: self.serialized_params,
            serialized_result: None,
            retry_attempts: 0,
            retry_delay: self.retry_delay,
            max_retries: self.max_retries,
        }
    }
}

/// TaskSummary は運用向けのレコード表示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub function_id: String,
    pub queue: String,
    pub status: TaskStatus,
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub retry_attempts: u32,
    pub retry_delay: String,
    pub max_retries: u32,
}
