//! Settings - ランタイム設定
//!
//! 起動時に一度だけ読み、`Arc` で共有する。全フィールドに既定値があるので、
//! 空の YAML は [`Settings::default`] になる。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_RETRIES: u32 = 0;
pub const DEFAULT_RETRY_DELAY_SECS: u32 = 120;
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// 投入や consumer でキュー名を省略したときのキュー
    pub default_queue: String,

    /// 新規レコードのリトライ上限の既定値。0 でリトライなし
    pub max_retries: u32,

    /// バックオフの既定値（秒）
    pub retry_delay: u32,

    /// ループのエラーを返さずに記録してポーリングを続ける
    pub fail_silently: bool,

    /// ポーリング間隔（秒、1 秒未満も可）
    pub poll_interval: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_queue: DEFAULT_QUEUE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            fail_silently: true,
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("default_queue must not be empty")]
    EmptyDefaultQueue,

    #[error("poll_interval must be a finite, non-negative number of seconds (got {0})")]
    InvalidPollInterval(f64),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.default_queue.trim().is_empty() {
            return Err(SettingsError::EmptyDefaultQueue);
        }
        if !self.poll_interval.is_finite() || self.poll_interval < 0.0 {
            return Err(SettingsError::InvalidPollInterval(self.poll_interval));
        }
        Ok(())
    }

    /// ポーリング間隔を `Duration` で返す。先に [`Settings::validate`] を呼ぶこと。
    /// 不正な値は 0 になる。
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval).unwrap_or(Duration::ZERO)
    }
}
