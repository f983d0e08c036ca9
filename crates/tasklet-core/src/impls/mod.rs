//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・デモ・組み込み用
//! - **PostgresTaskStore**: 本番用（feature `postgres`）

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use self::memory::InMemoryTaskStore;
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresTaskStore;
