//! TaskContext - 実行中のタスクに渡す文脈
//!
//! context 経由で投入した子タスクはステージされるだけで、まだ保存されない。
//! processor は親が完了した場合に限り、親の claim トランザクションで書き込む。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Settings;
use crate::domain::{NewTask, TaskId, TaskRecord};
use crate::error::ScheduleError;
use crate::typed::{FunctionRegistry, TaskOptions};

/// TaskContext は実行中のタスクに渡される文脈
pub struct TaskContext {
    task_id: TaskId,
    queue: String,
    retry_attempts: u32,
    now: DateTime<Utc>,
    registry: Arc<FunctionRegistry>,
    settings: Arc<Settings>,
    staged: Mutex<Vec<NewTask>>,
}

impl TaskContext {
    pub fn new(
        record: &TaskRecord,
        registry: Arc<FunctionRegistry>,
        settings: Arc<Settings>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: record.id,
            queue: record.queue.clone(),
            retry_attempts: record.retry_attempts,
            now,
            registry,
            settings,
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// この実行より前に消費したリトライ回数
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// claim した時刻
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// 即時実行の子タスクをステージする
    pub fn schedule<A: Serialize + ?Sized>(
        &self,
        options: &TaskOptions,
        args: &A,
    ) -> Result<(), ScheduleError> {
        self.stage(options, args, None)
    }

    /// `eta` に実行する子タスクをステージする
    pub fn schedule_at<A: Serialize + ?Sized>(
        &self,
        options: &TaskOptions,
        args: &A,
        eta: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        self.stage(options, args, Some(eta))
    }

    fn stage<A: Serialize + ?Sized>(
        &self,
        options: &TaskOptions,
        args: &A,
        eta: Option<DateTime<Utc>>,
    ) -> Result<(), ScheduleError> {
        let task = options.prepare(&self.registry, &self.settings, args, eta, self.now)?;
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
        Ok(())
    }

    /// ステージした子タスクを取り出す
    pub fn take_staged(&self) -> Vec<NewTask> {
        std::mem::take(&mut *self.staged.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
