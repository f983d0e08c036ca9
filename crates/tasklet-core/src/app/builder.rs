//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;

use super::admin::Admin;
use super::consumer::Consumer;
use super::processor::Processor;
use super::scheduler::Scheduler;
use crate::config::{Settings, SettingsError};
use crate::ports::{Clock, SystemClock, TaskStore};
use crate::typed::{AsyncTask, FunctionRegistry, RegistryError, SyncTask, TaskHandle};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let mut builder = AppBuilder::new(settings);
/// let add = builder.register_sync(Add)?;
/// let app = builder
///     .expect_functions(&["billing.totals.add"])
///     .build(Arc::new(InMemoryTaskStore::new()))?;
/// ```
///
/// # Fail-fast 設計
/// - expect_functions() で期待される function_id を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」と settings をチェック
pub struct AppBuilder {
    settings: Settings,
    registry: FunctionRegistry,
    clock: Arc<dyn Clock>,
    expected_functions: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing functions: {0:?}. These functions were expected but not registered.")]
    MissingFunctions(Vec<String>),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl AppBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: FunctionRegistry::new(),
            clock: Arc::new(SystemClock),
            expected_functions: None,
        }
    }

    pub fn register_sync<T: SyncTask>(&mut self, task: T) -> Result<TaskHandle<T>, RegistryError> {
        self.registry.register_sync(task)
    }

    pub fn register_async<T: AsyncTask>(
        &mut self,
        task: T,
    ) -> Result<TaskHandle<T>, RegistryError> {
        self.registry.register_async(task)
    }

    /// 時計を差し替える（テスト、シミュレーション）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn expect_functions(mut self, function_ids: &[&str]) -> Self {
        self.expected_functions = Some(function_ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn build(self, store: Arc<dyn TaskStore>) -> Result<App, BuildError> {
        self.settings.validate()?;

        if let Some(expected) = &self.expected_functions {
            let missing: Vec<String> = expected
                .iter()
                .filter(|id| !self.registry.contains(id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingFunctions(missing));
            }
        }

        Ok(App {
            settings: Arc::new(self.settings),
            registry: Arc::new(self.registry),
            clock: self.clock,
            store,
        })
    }
}

/// App は構築済みの部品一式
///
/// 全ハンドルが同じ store, registry, settings, clock を共有する
#[derive(Clone)]
pub struct App {
    settings: Arc<Settings>,
    registry: Arc<FunctionRegistry>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn TaskStore>,
}

impl App {
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
            Arc::clone(&self.clock),
        )
    }

    pub fn processor(&self) -> Processor {
        Processor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
            Arc::clone(&self.clock),
        )
    }

    pub fn consumer(&self) -> Consumer {
        Consumer::new(
            Arc::clone(&self.store),
            self.processor(),
            Arc::clone(&self.clock),
            &self.settings,
        )
    }

    pub fn admin(&self) -> Admin {
        Admin::new(Arc::clone(&self.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;
    use crate::testing::{Add, AsyncAdd};
    use crate::typed::Task;

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(InMemoryTaskStore::new())
    }

    #[test]
    fn build_success() {
        let mut builder = AppBuilder::new(Settings::default());
        builder.register_sync(Add).unwrap();
        builder.register_async(AsyncAdd).unwrap();

        let app = builder
            .expect_functions(&[Add::NAME, AsyncAdd::NAME])
            .build(store());

        assert!(app.is_ok());
    }

    #[test]
    fn build_missing_functions() {
        let mut builder = AppBuilder::new(Settings::default());
        builder.register_sync(Add).unwrap();

        let app = builder
            .expect_functions(&[Add::NAME, AsyncAdd::NAME])
            .build(store());

        assert!(matches!(
            app,
            Err(BuildError::MissingFunctions(missing)) if missing == vec![AsyncAdd::NAME.to_string()]
        ));
    }

    #[test]
    fn build_rejects_invalid_settings() {
        let builder = AppBuilder::new(Settings {
            default_queue: String::new(),
            ..Settings::default()
        });

        assert!(matches!(
            builder.build(store()),
            Err(BuildError::Settings(SettingsError::EmptyDefaultQueue))
        ));
    }

    #[tokio::test]
    async fn handles_share_one_store() {
        let mut builder = AppBuilder::new(Settings::default());
        let add = builder.register_sync(Add).unwrap();
        let app = builder.build(store()).unwrap();

        app.scheduler()
            .schedule(&add.options(), &(2, 3), None)
            .await
            .unwrap();
        app.consumer().drain("default").await.unwrap();

        assert_eq!(app.admin().counts(None).await.unwrap().completed, 1);
    }
}
