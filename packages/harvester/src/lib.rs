pub mod admission;
pub mod cancel;
pub mod config;
pub mod error;
pub mod harvest;
pub mod http;
pub mod jobs;
pub mod parse;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod site;
pub mod storage;
pub mod types;
pub mod vault;

// Re-exports for clean API
pub use cancel::CancelSignal;
pub use config::Config;
pub use error::{HarvestError, HarvestResult};
pub use harvest::{ExamFilter, Harvester};
pub use jobs::{HarvestJob, HarvestWorker, JobSource, JobStatus, PostgresJobSource, WorkerConfig};
pub use progress::{DurableProgressSink, HarvestEvent, LiveProgressSink, ProgressSink};
pub use retry::RetryExecutor;
pub use storage::{PostgresQuestionStore, QuestionStore};
pub use types::{
    Alternative, Credential, ExamRef, ExamSummary, LogEntry, LogLevel, LoginKind, Metrics,
    ProgressPayload, Question, QuestionMeta,
};
pub use vault::{Base64Vault, CredentialVault};
