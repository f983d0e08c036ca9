//! Typed - 型付き Task API
//!
//! このモジュールは function_id の typo と sync/async の取り違えを
//! 登録時・投入時に排除します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task`, `SyncTask`, `AsyncTask`, `TaskHandle<T>` - 型安全
//! - **内部（Dyn）**: `DynFunction` - object-safe, type erasure

pub mod codec;
pub mod handler;
pub mod options;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::handler::{AsyncFunction, DispatchMode, DynFunction, SyncFunction};
pub use self::options::TaskOptions;
pub use self::registry::{FunctionRegistry, RegistryError, TaskHandle};
pub use self::task::{AsyncTask, SyncTask, Task};
