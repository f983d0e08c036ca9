//! TaskOptions - 投入時の設定とバリデーション

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::codec::PayloadCodec;
use super::handler::DispatchMode;
use super::registry::FunctionRegistry;
use crate::config::Settings;
use crate::domain::NewTask;
use crate::error::ScheduleError;

/// TaskOptions はどの関数をどの入口で投入するかと、設定既定値の上書き
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub function_id: String,
    pub entry: DispatchMode,
    pub queue: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<u32>,
}

impl TaskOptions {
    /// 同期の入口
    pub fn sync(function_id: impl Into<String>) -> Self {
        Self::new(function_id, DispatchMode::Sync)
    }

    /// async の入口
    pub fn asynchronous(function_id: impl Into<String>) -> Self {
        Self::new(function_id, DispatchMode::Async)
    }

    pub fn new(function_id: impl Into<String>, entry: DispatchMode) -> Self {
        Self {
            function_id: function_id.into(),
            entry,
            queue: None,
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// バックオフ（秒）
    pub fn retry_delay(mut self, retry_delay: u32) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    /// registry で検証し、保存するレコードを組み立てる
    ///
    /// 検査順: 関数が登録済み → 入口とモードが一致 → キュー名が空でない →
    /// 引数が encode できる
    pub fn prepare<A: Serialize + ?Sized>(
        &self,
        registry: &FunctionRegistry,
        settings: &Settings,
        args: &A,
        eta: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<NewTask, ScheduleError> {
        let mode = registry
            .mode(&self.function_id)
            .ok_or_else(|| ScheduleError::UnknownFunction(self.function_id.clone()))?;

        match (self.entry, mode) {
            (DispatchMode::Sync, DispatchMode::Async) => {
                return Err(ScheduleError::AsyncFunctionNotSupported(
                    self.function_id.clone(),
                ));
            }
            (DispatchMode::Async, DispatchMode::Sync) => {
                return Err(ScheduleError::SyncFunctionNotSupported(
                    self.function_id.clone(),
                ));
            }
            _ => {}
        }

        let queue = self
            .queue
            .clone()
            .unwrap_or_else(|| settings.default_queue.clone());
        if queue.trim().is_empty() {
            return Err(ScheduleError::EmptyQueue);
        }

        Ok(NewTask {
            function_id: self.function_id.clone(),
            queue,
            created_at: now,
            not_before: eta,
            serialized_params: PayloadCodec::encode_params(args)?,
            retry_delay: self.retry_delay.unwrap_or(settings.retry_delay),
            max_retries: self.max_retries.unwrap_or(settings.max_retries),
        })
    }
}
