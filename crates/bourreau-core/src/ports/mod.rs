//! Ports - 抽象化レイヤー
//!
//! engine が利用する外部要素を trait として定義します。
//!
//! - `TaskStore`: タスクレコードの永続化（source of truth）
//! - `FileCache`: ファイルのステージング（stage hook のみが使う）
//! - `Clock` / `IdGenerator`: 時刻と id（テストで差し替え可能）

pub mod clock;
pub mod file_cache;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::file_cache::{FileCache, FileCacheError, FileRef};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::TaskStore;
