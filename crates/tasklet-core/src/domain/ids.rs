//! TaskId - タスクの識別子
//!
//! id は呼び出し側ではなく store が払い出す。単調増加なので id 順は
//! 挿入順と同じで、claim の選択はこれを最後のタイブレークに使う。

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskId は保存されたタスクレコードの識別子
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
