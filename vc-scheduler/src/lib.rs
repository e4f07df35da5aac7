//! Persistent job-leasing scheduler, resource-class concurrency gating,
//! and the vector refresh worker (spec §4.7, §4.8).

pub mod queue;
pub mod reaper;
pub mod schema;
pub mod vector_worker;
pub mod worker;

pub use queue::{LeasedJob, NewJob};
pub use vector_worker::{CosineFallbackIndex, IndexBackend, IndexDocument, VectorWorkerConfig};
pub use worker::{ConcurrencyLimits, GpuGate, JobContext, JobError, JobHandler, NoGpuGate, Scheduler};
