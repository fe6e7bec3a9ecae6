//! Impls - ports の実装（開発・テスト・単一ノード用）
//!
//! - `InMemoryTaskStore`: `RwLock` で守った version 付きタスクレコード
//! - `InMemoryDriver`: テスト用の擬似スケジューラ
//! - `LocalFileCache`: ディレクトリベースの file cache
//! - `ShellTask`: シェル行を実行する組み込み task kind

pub mod local_file_cache;
pub mod memory_driver;
pub mod memory_store;
pub mod shell_task;

pub use self::local_file_cache::LocalFileCache;
pub use self::memory_driver::{InMemoryDriver, SubmitBehavior};
pub use self::memory_store::InMemoryTaskStore;
pub use self::shell_task::{SHELL_TASK_TYPE, ShellParams, ShellTask};
