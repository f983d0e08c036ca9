//! tasklet-core
//!
//! 1 つのタスクテーブルを正本とする、永続化された遅延タスクキュー
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, record）
//! - **ports**: 抽象化レイヤー（TaskStore, Claim, Clock）
//! - **typed**: 型付き Task API（Task trait, FunctionRegistry, PayloadCodec）
//! - **impls**: 実装（InMemoryTaskStore, PostgresTaskStore）
//! - **app**: アプリケーションロジック（builder, scheduler, processor, consumer, admin）
//! - **config**: ランタイム設定
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

#[cfg(test)]
mod testing;

pub use app::{App, AppBuilder, TaskContext};
pub use config::Settings;
pub use domain::{TaskId, TaskRecord, TaskStatus};
pub use error::{ExecutionError, ScheduleError, TaskError};
pub use typed::{AsyncTask, SyncTask, Task};
