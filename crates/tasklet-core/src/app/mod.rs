//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Scheduler**: タスク投入（validation → insert）
//! - **Processor**: claim 済みタスクの実行と retry/backoff 遷移
//! - **Consumer**: ポーリングループ（sleep → claim → process）
//! - **Admin**: 削除・再投入などの運用操作

pub mod admin;
pub mod builder;
pub mod consumer;
pub mod context;
pub mod processor;
pub mod scheduler;

pub use self::admin::Admin;
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::consumer::{Consumer, ConsumerGroup};
pub use self::context::TaskContext;
pub use self::processor::{ProcessOutcome, Processor};
pub use self::scheduler::{Scheduler, TaskBuilder};
