//! Fetch side of the export: tasks, paging, retry and the hierarchy walk.

mod paginator;
mod pipeline;
mod retry;
mod task;

pub use paginator::{Page, PageError, Paginator};
pub use pipeline::{Pipeline, PipelineError};
pub use retry::{RetryPolicy, RetryTracker, TaskState};
pub use task::{FetchKind, FetchParams, FetchTask, TaskError};
