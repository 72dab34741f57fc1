//! tabport-core: deadline-raced export orchestration and record → spreadsheet mapping.

pub mod mapper;
pub mod runtime;
pub mod workbook;

pub use runtime::admission::{PoolStats, WorkerPool};
pub use runtime::job::{
    ColumnParam, ExportJob, JobError, JobInfo, JobParams, JobRegistry, Layout, TabularJob,
    TemplateLayout, export_file_name,
};
pub use runtime::orchestrator::{DETACHED_MESSAGE, DetachPolicy, JobRequest, Orchestrator, OrchestratorConfig};
pub use runtime::sink::{ArtifactSink, MemoryArtifactSink, SinkError};
pub use runtime::store::{MemoryTaskStore, StoreError, TaskStore};
pub use runtime::sweeper::{
    PROCESSING_TIMEOUT, ReaperPolicy, RetentionPolicy, RetentionSweeper, StuckTaskReaper, SweepReport,
    SweeperHandle, spawn_sweepers,
};
pub use runtime::types::{
    Artifact, DownloadError, RuntimeError, Submission, TaskId, TaskQuery, TaskRecord, TaskStatus,
    TaskUpdate,
};
