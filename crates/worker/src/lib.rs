mod retry;
mod stats;
mod worker;

pub use retry::retry_on_busy;
pub use stats::{BatchOutcome, WorkerStats, WorkerStatsSnapshot};
pub use worker::EmbeddingWorker;
