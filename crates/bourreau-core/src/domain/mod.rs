//! Domain - ドメインモデル
//!
//! ids, status, task record, prerequisite edge, job spec。I/O を持たない純粋な型。

pub mod ids;
pub mod job;
pub mod prerequisite;
pub mod status;
pub mod task;

pub use ids::{BatchId, Id, IdMarker, ParseIdError, TaskId};
pub use job::{Capacity, CapacitySnapshot, JobHandle, JobSpec, JobState, JobStates};
pub use prerequisite::{Gate, InvalidPrerequisite, PrerequisiteCheck, Prerequisites};
pub use status::{Stage, TaskStatus};
pub use task::{LogEntry, StatusTransition, TaskRecord, TransitionError};
