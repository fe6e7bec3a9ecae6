//! Task lifecycle: the engine, the task kinds it drives and their on-disk
//! layout.
//!
//! - `Engine::advance` moves one task along its stages during a sweep
//! - `Engine::control` / `recover` / `restart` serve operator requests
//! - `TaskKind` hooks do the tool-specific work of each stage

mod control;
pub mod engine;
pub mod kind;
pub mod locks;
pub mod paths;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Advance, Engine, EngineSettings};
pub use kind::{StageContext, TaskKind};
pub use locks::{TaskLockGuard, TaskLocks};
pub use paths::{TaskPaths, render_script};
pub use registry::{RegistryError, TaskKindRegistry};
