//! テスト用の共通フィクスチャ

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::app::{Admin, AppBuilder, Consumer, Processor, Scheduler, TaskContext};
use crate::config::Settings;
use crate::domain::{NewTask, TaskId};
use crate::error::TaskError;
use crate::impls::InMemoryTaskStore;
use crate::ports::FixedClock;
use crate::typed::{AsyncTask, FunctionRegistry, SyncTask, Task, TaskHandle, TaskOptions};

pub struct Add;

impl Task for Add {
    const NAME: &'static str = "tests.add";
    type Args = (i64, i64);
    type Output = i64;
}

impl SyncTask for Add {
    fn run(&self, _ctx: &TaskContext, (a, b): (i64, i64)) -> Result<i64, TaskError> {
        Ok(a + b)
    }
}

pub struct AsyncAdd;

impl Task for AsyncAdd {
    const NAME: &'static str = "tests.async_add";
    type Args = (i64, i64);
    type Output = i64;
}

#[async_trait]
impl AsyncTask for AsyncAdd {
    async fn run(&self, _ctx: &TaskContext, (a, b): (i64, i64)) -> Result<i64, TaskError> {
        tokio::task::yield_now().await;
        Ok(a + b)
    }
}

/// 毎回失敗し、呼ばれた回数を数える
#[derive(Clone, Default)]
pub struct AlwaysFails {
    calls: Arc<AtomicU32>,
}

impl AlwaysFails {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Task for AlwaysFails {
    const NAME: &'static str = "tests.always_fails";
    type Args = ();
    type Output = ();
}

impl SyncTask for AlwaysFails {
    fn run(&self, _ctx: &TaskContext, _args: ()) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TaskError::failed("always fails"))
    }
}

/// 消費したリトライ回数が `args` 未満の間は失敗する
pub struct Flaky;

impl Task for Flaky {
    const NAME: &'static str = "tests.flaky";
    type Args = u32;
    type Output = String;
}

impl SyncTask for Flaky {
    fn run(&self, ctx: &TaskContext, failures: u32) -> Result<String, TaskError> {
        if ctx.retry_attempts() < failures {
            return Err(TaskError::failed("not yet"));
        }
        Ok("ok".to_string())
    }
}

pub struct Fatal;

impl Task for Fatal {
    const NAME: &'static str = "tests.fatal";
    type Args = ();
    type Output = ();
}

impl SyncTask for Fatal {
    fn run(&self, _ctx: &TaskContext, _args: ()) -> Result<(), TaskError> {
        Err(TaskError::fatal("unrecoverable"))
    }
}

/// 子の `Add` を投入し、指定されたら失敗する
pub struct Spawner;

impl Task for Spawner {
    const NAME: &'static str = "tests.spawner";
    type Args = bool;
    type Output = ();
}

impl SyncTask for Spawner {
    fn run(&self, ctx: &TaskContext, fail: bool) -> Result<(), TaskError> {
        ctx.schedule(&TaskOptions::sync(Add::NAME), &(1, 2))
            .map_err(TaskError::fatal)?;
        if fail {
            return Err(TaskError::failed("parent failed after scheduling"));
        }
        Ok(())
    }
}

/// 実行ごとに token を記録する
#[derive(Clone, Default)]
pub struct Recorder {
    tokens: Arc<Mutex<Vec<u64>>>,
}

impl Recorder {
    pub fn tokens(&self) -> Vec<u64> {
        self.tokens.lock().unwrap().clone()
    }
}

impl Task for Recorder {
    const NAME: &'static str = "tests.recorder";
    type Args = u64;
    type Output = u64;
}

#[async_trait]
impl AsyncTask for Recorder {
    async fn run(&self, _ctx: &TaskContext, token: u64) -> Result<u64, TaskError> {
        tokio::task::yield_now().await;
        self.tokens.lock().unwrap().push(token);
        Ok(token)
    }
}

/// 呼ばれた回数を数える（引数なし）
#[derive(Clone, Default)]
pub struct Counter {
    hits: Arc<AtomicU32>,
}

impl Counter {
    pub fn get(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Task for Counter {
    const NAME: &'static str = "tests.counter";
    type Args = ();
    type Output = u32;
}

impl SyncTask for Counter {
    fn run(&self, _ctx: &TaskContext, _args: ()) -> Result<u32, TaskError> {
        Ok(self.hits.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// 全フィクスチャを in-memory store と固定時計につないだもの
pub struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub clock: Arc<FixedClock>,
    pub scheduler: Scheduler,
    pub processor: Processor,
    pub consumer: Consumer,
    pub admin: Admin,
    /// `Add` 登録時のハンドル
    pub add: TaskHandle<Add>,
    pub always_fails: AlwaysFails,
    pub recorder: Recorder,
    pub counter: Counter,
}

/// テストで使う基準時刻
pub fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 30, 18, 30, 0).unwrap()
}

pub fn harness(settings: Settings) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let clock = Arc::new(FixedClock::new(t0()));
    let always_fails = AlwaysFails::default();
    let recorder = Recorder::default();
    let counter = Counter::default();

    let mut builder = AppBuilder::new(settings);
    let add = builder.register_sync(Add).unwrap();
    builder.register_async(AsyncAdd).unwrap();
    builder.register_sync(always_fails.clone()).unwrap();
    builder.register_sync(Flaky).unwrap();
    builder.register_sync(Fatal).unwrap();
    builder.register_sync(Spawner).unwrap();
    builder.register_async(recorder.clone()).unwrap();
    builder.register_sync(counter.clone()).unwrap();

    let app = builder.clock(clock.clone()).build(store.clone()).unwrap();

    Harness {
        scheduler: app.scheduler(),
        processor: app.processor(),
        consumer: app.consumer(),
        admin: app.admin(),
        store,
        clock,
        add,
        always_fails,
        recorder,
        counter,
    }
}

/// 全フィクスチャを登録した registry
pub fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register_sync(Add).unwrap();
    registry.register_async(AsyncAdd).unwrap();
    registry.register_sync(AlwaysFails::default()).unwrap();
    registry.register_sync(Flaky).unwrap();
    registry.register_sync(Fatal).unwrap();
    registry.register_sync(Spawner).unwrap();
    registry.register_async(Recorder::default()).unwrap();
    registry.register_sync(Counter::default()).unwrap();
    registry
}

/// processor を通さずに直接呼ぶための context
pub fn context() -> TaskContext {
    let record = NewTask {
        function_id: Add::NAME.to_string(),
        queue: "default".to_string(),
        created_at: t0(),
        not_before: None,
        serialized_params: None,
        retry_delay: 120,
        max_retries: 0,
    }
    .into_record(TaskId::new(1));
    TaskContext::new(
        &record,
        Arc::new(registry()),
        Arc::new(Settings::default()),
        t0(),
    )
}
