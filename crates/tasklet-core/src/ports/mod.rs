//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（PostgreSQL, 時計）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - タスクテーブルが唯一の共有状態（source of truth）
//! - "now" は必ず Clock から読む

pub mod clock;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::task_store::{Claim, ListFilter, StoreError, TaskStore};
