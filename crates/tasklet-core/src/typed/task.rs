//! Task trait - 型付き関数の定義
//!
//! 型は自分の名前（`NAME`）と引数・戻り値の型を宣言し、[`SyncTask`] か
//! [`AsyncTask`] のどちらか一方だけを実装する。registry はどちらかを記録し、
//! scheduler は対応する入口が使われたことを検査する。

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::TaskContext;
use crate::error::TaskError;

/// Task は function_id と型を対応付ける
///
/// # 使用例
/// ```ignore
/// struct Add;
///
/// impl Task for Add {
///     const NAME: &'static str = "billing.totals.add";
///     type Args = (i64, i64);
///     type Output = i64;
/// }
///
/// impl SyncTask for Add {
///     fn run(&self, _ctx: &TaskContext, (a, b): (i64, i64)) -> Result<i64, TaskError> {
///         Ok(a + b)
///     }
/// }
/// ```
pub trait Task: Send + Sync + 'static {
    /// 全レコードに保存される安定したドット区切りの識別子
    ///
    /// # 命名規約
    /// - `{namespace}.{module}.{function}`
    /// - 一度永続化したら変更しない
    const NAME: &'static str;

    /// 呼び出し引数。`()` は null として保存される
    type Args: Serialize + DeserializeOwned + Send + Sync + 'static;

    type Output: Serialize + Send + 'static;
}

/// SyncTask はブロッキングする本体（consumer のタスク上でそのまま実行）
pub trait SyncTask: Task {
    fn run(&self, ctx: &TaskContext, args: Self::Args) -> Result<Self::Output, TaskError>;
}

/// AsyncTask は async な本体（claim のトランザクション内で await される）
#[async_trait]
pub trait AsyncTask: Task {
    async fn run(&self, ctx: &TaskContext, args: Self::Args) -> Result<Self::Output, TaskError>;
}
