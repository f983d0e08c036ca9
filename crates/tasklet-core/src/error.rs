//! Errors - エラー型
//!
//! # 分類
//! - `TaskError`: 本体が返す（一時的 / 恒久的）
//! - `ExecutionError`: 実行の失敗理由。リトライ可否を決める
//! - `ScheduleError`: 投入時の拒否
//! - `ConsumerError`: strict モードのループが返す

use std::fmt;

use thiserror::Error;

use crate::domain::TaskId;
use crate::ports::StoreError;
use crate::typed::CodecError;

/// TaskError はタスク本体が返すエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// 一時的な失敗。レコードのリトライ設定に従う
    #[error("{0}")]
    Failed(String),

    /// 恒久的な失敗。レコードはそのまま FAILED になる
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TaskError {
    pub fn failed(msg: impl fmt::Display) -> Self {
        TaskError::Failed(msg.to_string())
    }

    pub fn fatal(msg: impl fmt::Display) -> Self {
        TaskError::Fatal(msg.to_string())
    }
}

/// ExecutionError は claim したレコードを完了まで実行できなかった理由
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no function registered as {0:?}")]
    UnknownFunction(String),

    #[error("cannot decode params: {0}")]
    Decode(#[source] CodecError),

    #[error("cannot encode result: {0}")]
    Encode(#[source] CodecError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ExecutionError {
    /// リトライ対象は本体の一時的な失敗だけ
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Task(TaskError::Failed(_)))
    }
}

/// ScheduleError は投入時の拒否（このエラーのときは何も保存されない）
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no function registered as {0:?}")]
    UnknownFunction(String),

    /// async 関数に同期の入口が使われた
    #[error("{0:?} is async; schedule it through the async entry point")]
    AsyncFunctionNotSupported(String),

    /// 同期関数に async の入口が使われた
    #[error("{0:?} is sync; schedule it through the sync entry point")]
    SyncFunctionNotSupported(String),

    #[error("queue name must not be empty")]
    EmptyQueue,

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// ConsumerError はループのエラー（strict モードでのみ返る）
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{id} failed: {source}")]
    Task {
        id: TaskId,
        #[source]
        source: ExecutionError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExecutionError::Task(TaskError::failed("boom")), true)]
    #[case(ExecutionError::Task(TaskError::fatal("boom")), false)]
    #[case(ExecutionError::UnknownFunction("x.y".into()), false)]
    #[case(ExecutionError::Decode(CodecError::Decode("bad".into())), false)]
    fn only_transient_failures_retry(#[case] err: ExecutionError, #[case] expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }

    #[test]
    fn consumer_error_names_the_task() {
        let err = ConsumerError::Task {
            id: TaskId::new(9),
            source: TaskError::failed("boom").into(),
        };
        assert_eq!(err.to_string(), "task-9 failed: boom");
    }
}
