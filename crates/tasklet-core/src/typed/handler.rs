//! DynFunction - 型消去された呼び出し口
//!
//! # 構造
//! - `SyncTask` / `AsyncTask` は型付きの表層
//! - `SyncFunction<T>` / `AsyncFunction<T>` がそれを `DynFunction` に変換
//! - registry は `HashMap<String, Arc<dyn DynFunction>>` で保持

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::codec::PayloadCodec;
use super::task::{AsyncTask, SyncTask};
use crate::app::TaskContext;
use crate::error::ExecutionError;

/// DispatchMode は関数の呼び出し方と投入口を表す
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Sync,
    Async,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Sync => f.write_str("sync"),
            DispatchMode::Async => f.write_str("async"),
        }
    }
}

/// DynFunction は object-safe な呼び出し口
///
/// 保存された params を受け取り、保存用の結果を返すので、processor は
/// 具体的な引数型も戻り値型も知らない。
#[async_trait]
pub trait DynFunction: Send + Sync {
    fn function_id(&self) -> &'static str;

    fn mode(&self) -> DispatchMode;

    async fn invoke(
        &self,
        ctx: &TaskContext,
        params: Option<&str>,
    ) -> Result<String, ExecutionError>;
}

pub struct SyncFunction<T: SyncTask> {
    task: Arc<T>,
}

impl<T: SyncTask> SyncFunction<T> {
    pub fn new(task: Arc<T>) -> Self {
        Self { task }
    }
}

#[async_trait]
impl<T: SyncTask> DynFunction for SyncFunction<T> {
    fn function_id(&self) -> &'static str {
        T::NAME
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Sync
    }

    async fn invoke(
        &self,
        ctx: &TaskContext,
        params: Option<&str>,
    ) -> Result<String, ExecutionError> {
        let args: T::Args = PayloadCodec::decode_params(params).map_err(ExecutionError::Decode)?;
        // blocking: consumer の task 上でそのまま実行
        let output = self.task.run(ctx, args)?;
        PayloadCodec::encode(&output).map_err(ExecutionError::Encode)
    }
}

pub struct AsyncFunction<T: AsyncTask> {
    task: Arc<T>,
}

impl<T: AsyncTask> AsyncFunction<T> {
    pub fn new(task: Arc<T>) -> Self {
        Self { task }
    }
}

#[async_trait]
impl<T: AsyncTask> DynFunction for AsyncFunction<T> {
    fn function_id(&self) -> &'static str {
        T::NAME
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Async
    }

    async fn invoke(
        &self,
        ctx: &TaskContext,
        params: Option<&str>,
    ) -> Result<String, ExecutionError> {
        let args: T::Args = PayloadCodec::decode_params(params).map_err(ExecutionError::Decode)?;
        let output = self.task.run(ctx, args).await?;
        PayloadCodec::encode(&output).map_err(ExecutionError::Encode)
    }
}
