use tracing::info;

use super::{PollHandle, PollPolicy, Poller};
use crate::api::models::Task;
use crate::api::{require_id, ApiClient, ApiError};
use crate::config::PollingConfig;

/// Which status endpoint tracks the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSource {
    /// Uploaded video: `/api/status/{id}`
    #[default]
    Processing,
    /// URL submission: `/api/download-status/{id}`
    Download,
}

pub struct TaskPoller;

impl TaskPoller {
    pub fn policy(config: &PollingConfig, auto_refresh: bool) -> PollPolicy {
        let policy = PollPolicy::every(config.task_interval());
        if auto_refresh {
            policy
        } else {
            PollPolicy {
                auto_refresh: false,
                ..policy
            }
        }
    }

    /// Poll a task at the configured interval until it completes or fails.
    ///
    /// Without `auto_refresh` the status is fetched once.
    pub fn spawn(
        client: ApiClient,
        task_id: &str,
        source: TaskSource,
        config: &PollingConfig,
        auto_refresh: bool,
    ) -> Result<PollHandle<Task>, ApiError> {
        let policy = Self::policy(config, auto_refresh);
        Self::spawn_with_policy(client, task_id, source, policy)
    }

    pub fn spawn_with_policy(
        client: ApiClient,
        task_id: &str,
        source: TaskSource,
        policy: PollPolicy,
    ) -> Result<PollHandle<Task>, ApiError> {
        let task_id = require_id("task_id", task_id)?.to_string();
        info!("Tracking task {} via {:?}", task_id, source);

        let handle = Poller::new(format!("task {}", task_id), policy).spawn(move || {
            let client = client.clone();
            let task_id = task_id.clone();
            async move { Self::fetch_once(&client, &task_id, source).await }
        });
        Ok(handle)
    }

    pub async fn fetch_once(
        client: &ApiClient,
        task_id: &str,
        source: TaskSource,
    ) -> Result<Task, ApiError> {
        match source {
            TaskSource::Processing => client.task_status(task_id).await,
            TaskSource::Download => client.download_status(task_id).await,
        }
    }
}
