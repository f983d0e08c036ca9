//! Processor - claim 済みタスクの実行と状態遷移
//!
//! 1 件の claim の流れ:
//! 1. postponed（eta が未来）→ rollback、変更なし
//! 2. 関数を解決し params を decode して実行（sync はその場で、async は await）
//! 3. 成功 → COMPLETED + ステージした子タスク
//! 4. 失敗 → `TaskRecord::apply_failure` がリトライか FAILED かを決める
//! 5. claim のトランザクションで commit
//!
//! 実行エラーは状態変更の commit 後に outcome に入れて返す。表に出すかどうかは
//! 呼び出し側が決める。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::context::TaskContext;
use crate::config::Settings;
use crate::domain::{FailureTransition, TaskId, TaskRecord};
use crate::error::ExecutionError;
use crate::ports::{Claim, Clock, StoreError};
use crate::typed::FunctionRegistry;

/// ProcessOutcome は claim の処理がレコードに何をしたか
#[derive(Debug)]
pub enum ProcessOutcome {
    /// eta より前に claim された。何も変えずに解放
    Postponed { id: TaskId },

    Completed { id: TaskId, children: Vec<TaskId> },

    /// CREATED のまま。`not_before` に再び claim できる
    Retried {
        id: TaskId,
        retry_attempts: u32,
        not_before: DateTime<Utc>,
        error: ExecutionError,
    },

    Failed { id: TaskId, error: ExecutionError },
}

impl ProcessOutcome {
    pub fn id(&self) -> TaskId {
        match self {
            ProcessOutcome::Postponed { id }
            | ProcessOutcome::Completed { id, .. }
            | ProcessOutcome::Retried { id, .. }
            | ProcessOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            ProcessOutcome::Retried { error, .. } | ProcessOutcome::Failed { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<(TaskId, ExecutionError)> {
        match self {
            ProcessOutcome::Retried { id, error, .. } | ProcessOutcome::Failed { id, error } => {
                Some((id, error))
            }
            _ => None,
        }
    }
}

/// Processor は claim 1 件を実行して状態を確定させる
#[derive(Clone)]
pub struct Processor {
    registry: Arc<FunctionRegistry>,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
}

impl Processor {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            settings,
            clock,
        }
    }

    /// claim したレコードを実行し、新しい状態を commit する
    ///
    /// `Err` になるのは store のエラーだけ。タスクの失敗は記録したうえで
    /// outcome で報告する。
    #[instrument(
        name = "process",
        skip_all,
        fields(
            task.id = %claim.record().id,
            function_id = %claim.record().function_id,
            queue = %claim.record().queue,
        ),
    )]
    pub async fn process(&self, claim: Box<dyn Claim>) -> Result<ProcessOutcome, StoreError> {
        let mut record = claim.record().clone();
        let id = record.id;

        let claimed_at = self.clock.now();
        if record.is_postponed(claimed_at) {
            claim.rollback().await?;
            debug!(not_before = ?record.not_before, "task postponed");
            return Ok(ProcessOutcome::Postponed { id });
        }

        let ctx = TaskContext::new(
            &record,
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
            claimed_at,
        );
        let result = self.execute(&ctx, &record).await;
        let now = self.clock.now();

        let error = match result {
            Ok(serialized_result) => {
                record.mark_completed(serialized_result, now);
                let children = claim.commit(record, ctx.take_staged()).await?;
                let children: Vec<TaskId> = children.iter().map(|c| c.id).collect();
                info!(children = children.len(), "task completed");
                return Ok(ProcessOutcome::Completed { id, children });
            }
            Err(error) => error,
        };

        // 失敗した親の子タスクは捨てる
        let discarded = ctx.take_staged().len();
        if discarded > 0 {
            debug!(discarded, "discarding children of failed task");
        }

        match record.apply_failure(now, error.is_retryable()) {
            FailureTransition::Retry { not_before } => {
                let retry_attempts = record.retry_attempts;
                claim.commit(record, Vec::new()).await?;
                warn!(
                    retry_attempts,
                    %not_before,
                    error = %error,
                    "task failed, retry scheduled"
                );
                Ok(ProcessOutcome::Retried {
                    id,
                    retry_attempts,
                    not_before,
                    error,
                })
            }
            FailureTransition::Failed => {
                let retry_attempts = record.retry_attempts;
                claim.commit(record, Vec::new()).await?;
                error!(retry_attempts, error = %error, "task failed");
                Ok(ProcessOutcome::Failed { id, error })
            }
        }
    }

    async fn execute(&self, ctx: &TaskContext, record: &TaskRecord) -> Result<String, ExecutionError> {
        let function = self
            .registry
            .resolve(&record.function_id)
            .ok_or_else(|| ExecutionError::UnknownFunction(record.function_id.clone()))?;
        function
            .invoke(ctx, record.serialized_params.as_deref())
            .await
    }
}
