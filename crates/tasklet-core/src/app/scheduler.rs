//! Scheduler - タスク投入 API
//!
//! 呼び出しを registry で検証し、CREATED のレコードを 1 件だけ保存します。
//! 関数本体はここでは実行しません。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::Settings;
use crate::domain::TaskRecord;
use crate::error::ScheduleError;
use crate::ports::{Clock, TaskStore};
use crate::typed::{DispatchMode, FunctionRegistry, TaskOptions};

/// Scheduler は `task()` / `atask()` の入口
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    registry: Arc<FunctionRegistry>,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<FunctionRegistry>,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            clock,
        }
    }

    /// 同期関数の入口（async 関数は拒否）
    pub fn task(&self, function_id: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder {
            scheduler: self,
            options: TaskOptions::new(function_id, DispatchMode::Sync),
        }
    }

    /// async 関数の入口（同期関数は拒否）
    pub fn atask(&self, function_id: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder {
            scheduler: self,
            options: TaskOptions::new(function_id, DispatchMode::Async),
        }
    }

    #[instrument(
        name = "schedule",
        skip(self, options, args),
        fields(function_id = %options.function_id, entry = %options.entry),
    )]
    pub async fn schedule<A: Serialize + ?Sized + Sync>(
        &self,
        options: &TaskOptions,
        args: &A,
        eta: Option<DateTime<Utc>>,
    ) -> Result<TaskRecord, ScheduleError> {
        let task = options.prepare(&self.registry, &self.settings, args, eta, self.clock.now())?;
        let record = self.store.insert(task).await?;
        debug!(task.id = %record.id, queue = %record.queue, "task scheduled");
        Ok(record)
    }
}

/// TaskBuilder は 1 回の投入に対する上書き設定
pub struct TaskBuilder<'a> {
    scheduler: &'a Scheduler,
    options: TaskOptions,
}

impl TaskBuilder<'_> {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.options = self.options.queue(queue);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options = self.options.max_retries(max_retries);
        self
    }

    pub fn retry_delay(mut self, retry_delay: u32) -> Self {
        self.options = self.options.retry_delay(retry_delay);
        self
    }

    pub async fn schedule<A: Serialize + ?Sized + Sync>(
        self,
        args: &A,
    ) -> Result<TaskRecord, ScheduleError> {
        self.scheduler.schedule(&self.options, args, None).await
    }

    pub async fn schedule_at<A: Serialize + ?Sized + Sync>(
        self,
        args: &A,
        eta: DateTime<Utc>,
    ) -> Result<TaskRecord, ScheduleError> {
        self.scheduler.schedule(&self.options, args, Some(eta)).await
    }
}
