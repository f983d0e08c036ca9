//! FunctionRegistry - 関数の登録と解決
//!
//! 起動時に明示的に登録する。function_id の重複は拒否。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{AsyncFunction, DispatchMode, DynFunction, SyncFunction};
use super::options::TaskOptions;
use super::task::{AsyncTask, SyncTask, Task};
use crate::app::TaskContext;
use crate::error::TaskError;

/// FunctionRegistry は function_id → 呼び出し口 の対応表
///
/// # 使用例
/// ```ignore
/// let mut registry = FunctionRegistry::new();
/// let add = registry.register_sync(Add)?;
///
/// scheduler.schedule(&add.options(), &(1, 3), None).await?;
/// ```
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn DynFunction>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("function {0:?} is already registered")]
    AlreadyRegistered(String),
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sync<T: SyncTask>(&mut self, task: T) -> Result<TaskHandle<T>, RegistryError> {
        let task = Arc::new(task);
        self.insert(T::NAME, Arc::new(SyncFunction::new(Arc::clone(&task))))?;
        Ok(TaskHandle::new(task, DispatchMode::Sync))
    }

    pub fn register_async<T: AsyncTask>(
        &mut self,
        task: T,
    ) -> Result<TaskHandle<T>, RegistryError> {
        let task = Arc::new(task);
        self.insert(T::NAME, Arc::new(AsyncFunction::new(Arc::clone(&task))))?;
        Ok(TaskHandle::new(task, DispatchMode::Async))
    }

    fn insert(&mut self, name: &str, function: Arc<dyn DynFunction>) -> Result<(), RegistryError> {
        if self.functions.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.functions.insert(name.to_string(), function);
        Ok(())
    }

    pub fn resolve(&self, function_id: &str) -> Option<Arc<dyn DynFunction>> {
        self.functions.get(function_id).cloned()
    }

    pub fn mode(&self, function_id: &str) -> Option<DispatchMode> {
        self.functions.get(function_id).map(|f| f.mode())
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.functions.contains_key(function_id)
    }

    /// 登録済みの function_id（ソート済み）
    pub fn registered_functions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.functions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// TaskHandle は登録時に返る型付きハンドル
///
/// 本体を直接呼べるうえ、scheduler に渡す TaskOptions も作れるので、
/// 呼び出し側が function_id を手書きすることはない。
pub struct TaskHandle<T: Task> {
    task: Arc<T>,
    mode: DispatchMode,
}

impl<T: Task> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            mode: self.mode,
        }
    }
}

impl<T: Task> TaskHandle<T> {
    fn new(task: Arc<T>, mode: DispatchMode) -> Self {
        Self { task, mode }
    }

    pub fn name(&self) -> &'static str {
        T::NAME
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// 登録時のモードに合った入口の TaskOptions
    pub fn options(&self) -> TaskOptions {
        TaskOptions::new(T::NAME, self.mode)
    }
}

impl<T: SyncTask> TaskHandle<T> {
    /// キューを通さずにその場で実行する
    pub fn call(&self, ctx: &TaskContext, args: T::Args) -> Result<T::Output, TaskError> {
        self.task.run(ctx, args)
    }
}

impl<T: AsyncTask> TaskHandle<T> {
    /// キューを通さずにその場で await する
    pub async fn acall(&self, ctx: &TaskContext, args: T::Args) -> Result<T::Output, TaskError> {
        self.task.run(ctx, args).await
    }
}
