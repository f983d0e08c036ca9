//! Demo - デモ用の関数と `tasklet demo` の in-memory 実行

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tasklet_core::app::{AppBuilder, ConsumerGroup};
use tasklet_core::error::TaskError;
use tasklet_core::impls::InMemoryTaskStore;
use tasklet_core::ports::ListFilter;
use tasklet_core::typed::{RegistryError, TaskOptions};
use tasklet_core::{AsyncTask, Settings, SyncTask, Task, TaskContext};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct Greeting {
    pub name: String,
}

pub struct Greet;

impl Task for Greet {
    const NAME: &'static str = "demo.greet";
    type Args = Greeting;
    type Output = String;
}

impl SyncTask for Greet {
    fn run(&self, _ctx: &TaskContext, args: Greeting) -> Result<String, TaskError> {
        if args.name.is_empty() {
            return Err(TaskError::fatal("name is empty"));
        }
        Ok(format!("Hello, {}!", args.name))
    }
}

pub struct Sum;

impl Task for Sum {
    const NAME: &'static str = "demo.sum";
    type Args = Vec<i64>;
    type Output = i64;
}

#[async_trait]
impl AsyncTask for Sum {
    async fn run(&self, _ctx: &TaskContext, values: Vec<i64>) -> Result<i64, TaskError> {
        tokio::task::yield_now().await;
        Ok(values.iter().sum())
    }
}

/// Flaky は消費したリトライ回数が `failures` に達するまで失敗する
pub struct Flaky;

impl Task for Flaky {
    const NAME: &'static str = "demo.flaky";
    type Args = u32;
    type Output = u32;
}

impl SyncTask for Flaky {
    fn run(&self, ctx: &TaskContext, failures: u32) -> Result<u32, TaskError> {
        let attempts = ctx.retry_attempts();
        if attempts < failures {
            return Err(TaskError::failed(format!(
                "intentional failure ({attempts}/{failures})"
            )));
        }
        Ok(attempts)
    }
}

/// FanOut は名前ごとに `demo.greet` を投入する（子タスクは成功時にだけ残る）
pub struct FanOut;

impl Task for FanOut {
    const NAME: &'static str = "demo.fan_out";
    type Args = Vec<String>;
    type Output = usize;
}

impl SyncTask for FanOut {
    fn run(&self, ctx: &TaskContext, names: Vec<String>) -> Result<usize, TaskError> {
        let greet = TaskOptions::sync(Greet::NAME);
        for name in &names {
            ctx.schedule(&greet, &Greeting { name: name.clone() })
                .map_err(TaskError::fatal)?;
        }
        Ok(names.len())
    }
}

pub const FUNCTIONS: &[&str] = &[Greet::NAME, Sum::NAME, Flaky::NAME, FanOut::NAME];

pub fn register(builder: &mut AppBuilder) -> Result<(), RegistryError> {
    builder.register_sync(Greet)?;
    builder.register_async(Sum)?;
    builder.register_sync(Flaky)?;
    builder.register_sync(FanOut)?;
    Ok(())
}

/// in-memory store にいくつか投入し、`concurrency` 台の consumer で処理して
/// 最終的なレコードを JSON で出力する
pub async fn run(settings: Settings, concurrency: usize, timeout: Duration) -> anyhow::Result<()> {
    let queue = settings.default_queue.clone();
    let mut builder = AppBuilder::new(settings);
    register(&mut builder)?;
    let app = builder
        .expect_functions(FUNCTIONS)
        .build(Arc::new(InMemoryTaskStore::new()))
        .context("build demo app")?;

    let scheduler = app.scheduler();
    scheduler
        .task(Greet::NAME)
        .schedule(&Greeting {
            name: "tasklet".to_string(),
        })
        .await?;
    scheduler.atask(Sum::NAME).schedule(&vec![1, 2, 3, 4]).await?;
    scheduler
        .task(Flaky::NAME)
        .max_retries(3)
        .retry_delay(1)
        .schedule(&1u32)
        .await?;
    scheduler
        .task(FanOut::NAME)
        .schedule(&vec!["alice".to_string(), "bob".to_string()])
        .await?;
    scheduler
        .task(Greet::NAME)
        .schedule(&Greeting {
            name: String::new(),
        })
        .await?;

    let group = ConsumerGroup::spawn(concurrency, Arc::new(app.consumer()), queue.clone());
    info!(consumers = group.len(), %queue, "demo consumers started");

    let admin = app.admin();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let counts = admin.counts(Some(&queue)).await?;
        if counts.created == 0 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            group.shutdown_and_join().await?;
            bail!("demo did not settle within {timeout:?} ({} still pending)", counts.created);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    group.shutdown_and_join().await?;

    let counts = admin.counts(Some(&queue)).await?;
    info!(
        completed = counts.completed,
        failed = counts.failed,
        "demo finished"
    );
    let summaries = admin.list(&ListFilter::default()).await?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_settles_with_one_fatal_failure() {
        let settings = Settings {
            poll_interval: 0.005,
            ..Settings::default()
        };
        let mut builder = AppBuilder::new(settings);
        register(&mut builder).unwrap();
        let app = builder
            .expect_functions(FUNCTIONS)
            .build(Arc::new(InMemoryTaskStore::new()))
            .unwrap();
        let scheduler = app.scheduler();
        scheduler
            .task(FanOut::NAME)
            .schedule(&vec!["alice".to_string()])
            .await
            .unwrap();
        scheduler
            .task(Greet::NAME)
            .schedule(&Greeting {
                name: String::new(),
            })
            .await
            .unwrap();

        let outcomes = app.consumer().drain("default").await.unwrap();
        assert_eq!(outcomes.len(), 3);

        let counts = app.admin().counts(None).await.unwrap();
        assert_eq!((counts.completed, counts.failed), (2, 1));
    }
}
