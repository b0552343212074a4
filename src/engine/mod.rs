//! The enumeration engine: batched group arithmetic, predicate
//! dispatch and the worker loops.

pub mod batch;
pub mod predicate;
pub mod worker;

pub use batch::{run_pass, BatchBuffers};
pub use predicate::{Checker, MatchKind, MatchRecord, Predicate};
pub use worker::{
    fresh_random_key, BatchWorker, TaprootWorker, TxidWorker, WorkerHandle, WorkerPhase,
};

/// CPU group geometry: one batched inversion covers half points on each
/// side of the center; a pass chains several groups.
pub const CPU_GROUP_HALF: usize = 512;
pub const CPU_GROUP_SIZE: usize = 2 * CPU_GROUP_HALF;
pub const CPU_ITERS: usize = 8;
pub const CPU_STEP_SIZE: u64 = (CPU_GROUP_SIZE * CPU_ITERS) as u64;
