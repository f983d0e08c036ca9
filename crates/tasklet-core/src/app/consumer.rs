//! Consumer - キューのポーリングループ
//!
//! sleep → claim → process を繰り返します。
//!
//! # 設計原則
//! - shutdown は sleep の境界でのみ観測する（処理中の claim は必ず commit まで進む）
//! - `fail_silently` ならエラーを記録して継続、そうでなければ commit 後に返す
//! - ConsumerGroup 内の 1 台が strict モードで止まったら全台を止める

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::processor::{ProcessOutcome, Processor};
use crate::config::Settings;
use crate::error::ConsumerError;
use crate::ports::{Clock, StoreError, TaskStore};

/// Consumer は 1 つのキューをポーリングする
#[derive(Clone)]
pub struct Consumer {
    store: Arc<dyn TaskStore>,
    processor: Processor,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    fail_silently: bool,
}

impl Consumer {
    pub fn new(
        store: Arc<dyn TaskStore>,
        processor: Processor,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            processor,
            clock,
            poll_interval: settings.poll_interval(),
            fail_silently: settings.fail_silently,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_fail_silently(mut self, fail_silently: bool) -> Self {
        self.fail_silently = fail_silently;
        self
    }

    /// claim と処理を 1 回だけ行う。実行可能なタスクがなければ `None`
    pub async fn run_once(&self, queue: &str) -> Result<Option<ProcessOutcome>, StoreError> {
        let Some(claim) = self.store.claim_next(queue, self.clock.now()).await? else {
            return Ok(None);
        };
        self.processor.process(claim).await.map(Some)
    }

    /// 現時点で claim できるタスクがなくなるまで処理する
    pub async fn drain(&self, queue: &str) -> Result<Vec<ProcessOutcome>, StoreError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once(queue).await? {
            let postponed = matches!(outcome, ProcessOutcome::Postponed { .. });
            outcomes.push(outcome);
            // clock が巻き戻った場合の無限ループ防止
            if postponed {
                break;
            }
        }
        Ok(outcomes)
    }

    /// `shutdown` が true になるか sender が drop されるまでポーリングする
    #[instrument(name = "consumer", skip(self, shutdown), fields(poll_interval = ?self.poll_interval))]
    pub async fn run(
        &self,
        queue: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConsumerError> {
        info!(fail_silently = self.fail_silently, "consumer started");

        loop {
            // shutdown が来ていたら抜ける
            if *shutdown.borrow() {
                break;
            }

            // sleep だけを shutdown と競合させる（処理中は止めない）
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.step(queue).await {
                Ok(()) => {}
                Err(err) if self.fail_silently => {
                    warn!(error = %err, "consumer error ignored");
                }
                Err(err) => {
                    error!(error = %err, "consumer stopped on error");
                    return Err(err);
                }
            }
        }

        info!("consumer stopped");
        Ok(())
    }

    async fn step(&self, queue: &str) -> Result<(), ConsumerError> {
        let Some(outcome) = self.run_once(queue).await? else {
            return Ok(());
        };
        match outcome.into_error() {
            Some((id, source)) => Err(ConsumerError::Task { id, source }),
            None => Ok(()),
        }
    }
}

/// ConsumerGroup は同じキューを読む consumer の集合
///
/// - 全 consumer が同じ shutdown を共有する
/// - どれか 1 台がエラーで止まったら残りにも shutdown を送る
/// - `shutdown_and_join()` で全 consumer の終了を待てる
pub struct ConsumerGroup {
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: Vec<JoinHandle<Result<(), ConsumerError>>>,
}

impl ConsumerGroup {
    /// `queue` を読む consumer を `n` 台起動する
    pub fn spawn(n: usize, consumer: Arc<Consumer>, queue: impl Into<String>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let queue: Arc<str> = Arc::from(queue.into());

        let joins = (0..n)
            .map(|_| {
                let consumer = Arc::clone(&consumer);
                let queue = Arc::clone(&queue);
                let rx = shutdown_rx.clone();
                let shutdown_tx = Arc::clone(&shutdown_tx);
                tokio::spawn(async move {
                    let result = consumer.run(&queue, rx).await;
                    if result.is_err() {
                        // 残りの consumer も止める
                        let _ = shutdown_tx.send(true);
                    }
                    result
                })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// 全 consumer に現在のステップ後の停止を要求する
    pub fn request_shutdown(&self) {
        // receiver が既に drop されていても無視
        let _ = self.shutdown_tx.send(true);
    }

    /// `signal` が完了したら shutdown を要求する（ctrl-c など）
    pub fn shutdown_on<F>(&self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        tokio::spawn(async move {
            signal.await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        });
    }

    /// shutdown を要求せずに全 consumer の終了を待つ
    ///
    /// 最初に観測した consumer のエラーを返す。
    pub async fn join(self) -> Result<(), ConsumerError> {
        let mut first = None;
        for join in self.joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first.get_or_insert(err);
                }
                Err(err) => error!(error = %err, "consumer task panicked"),
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn shutdown_and_join(self) -> Result<(), ConsumerError> {
        self.request_shutdown();
        self.join().await
    }
}
