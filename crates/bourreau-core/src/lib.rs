//! bourreau-core
//!
//! Task orchestration on an execution node: tasks advance through setup,
//! cluster execution and post-processing, gated by prerequisites on other
//! tasks, with jobs submitted to a batch scheduler through a driver.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（status, task record, prerequisite, job spec）
//! - **ports**: 抽象化レイヤー（TaskStore, FileCache, Clock, IdGenerator）
//! - **driver**: スケジューラ driver（local プロセス, PBS, SGE）と sweep 単位の job キャッシュ
//! - **lifecycle**: engine と、engine が呼ぶ `TaskKind` hook
//! - **parallelizer**: 複数タスクを 1 つの wrapper job にまとめる
//! - **app**: builder, poll loop, operator 向け API
//! - **impls**: 実装（in-memory store / driver, local file cache, shell task）

pub mod app;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod impls;
pub mod lifecycle;
pub mod parallelizer;
pub mod ports;
pub mod prerequisites;
pub mod signal;

pub use app::{EngineBuilder, Operator, PollLoop, PollSettings};
pub use config::EngineConfig;
pub use error::EngineError;
pub use lifecycle::{Engine, TaskKind};
