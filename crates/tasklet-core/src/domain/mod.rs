//! Domain - ドメインモデル（ids, status, record）
//!
//! ストレージや実行については何も知らず、タスクの形と
//! 取りうる状態遷移だけを定義する。

pub mod ids;
pub mod record;
pub mod state;

pub use ids::TaskId;
pub use record::{FailureTransition, NewTask, TaskRecord, TaskSummary};
pub use state::{ParseStatusError, StatusCounts, TaskStatus};
