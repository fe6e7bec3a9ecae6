//! App - アプリケーション層
//!
//! engine と ports を組み合わせて、ノード上で動く形にまとめます。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: store, driver, file cache, task kind のワイヤリング
//! - **PollLoop**: 定期的な sweep と、WorkSignal による早めの sweep
//! - **Operator**: 制御・ステータス要求の窓口

pub mod builder;
pub mod operator;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::operator::Operator;
pub use self::status::{StatusCounts, TaskView};
pub use self::worker_loop::{PollLoop, PollSettings, SweepReport, sweep};
