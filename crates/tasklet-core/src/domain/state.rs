//! TaskStatus - タスクの状態遷移

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// TaskStatus は保存されるタスクの状態
///
/// 状態遷移:
/// - Created -> Completed
/// - Created -> Created（リトライ予約、`not_before` を後ろへ）
/// - Created -> Failed（リトライ上限到達かリトライ対象外のエラー）
/// - Failed -> Created（運用リセットのみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// claim 待ち（最初から、またはリトライ予約後）
    Created,

    /// 正常終了。終端
    Completed,

    /// 断念。consumer にとっては終端
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// claim できるのは `Created` だけ
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Created)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// StatusCounts は status ごとのレコード数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Created => self.created += n,
            TaskStatus::Completed => self.completed += n,
            TaskStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.completed + self.failed
    }
}
