//! Durable harvest jobs: the shared queue, its crash recovery, and the
//! worker loop that drains it.

pub mod job;
pub mod source;
pub mod testing;
pub mod worker;

pub use job::{HarvestJob, JobStatus};
pub use source::{JobSource, PostgresJobSource};
pub use worker::{HarvestWorker, WorkerConfig};
