mod gate;
mod orchestrator;
mod plan;
mod task;
mod transfer;
mod transport;

#[cfg(test)]
mod testing;

pub use gate::{CancelToken, ResumeGate};
pub use orchestrator::{DownloadOrchestrator, OrchestratorConfig, OrchestratorStatus, TerminalTotals};
pub use plan::{
    filename_from_uri, plan_downloads, plan_for, target_path, DownloadPlan, SourceCandidate,
    SourceResolver, StaticResolver, FALLBACK_DIRECTORY,
};
pub use task::{DownloadRequest, DownloadTask, TaskId, TaskStatus};
pub use transfer::{run_transfer, TransferEvent, TransferJob, TransferOutcome, CHUNK_SIZE};
pub use transport::{parse_range_total, HttpTransport, TransferRequest, TransferResponse, Transport};
