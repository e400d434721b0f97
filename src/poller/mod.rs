/**
 * Poller Module
 *
 * Serialised, cancellable status polling shared by task and payment
 * tracking. One spawned loop per resource, one request in flight at a time,
 * and no request after a terminal status has been observed.
 */

pub mod payment;
pub mod task;

pub use payment::{PaymentFlowError, PaymentPoller, PaymentResult, PaymentReturn, PaymentWatch};
pub use task::{TaskPoller, TaskSource};

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::api::models::{PaymentOrder, Task};
use crate::api::ApiError;

/// A polled resource status
pub trait PollStatus: Clone + Send + Sync + 'static {
    fn is_terminal(&self) -> bool;
    /// Short label for transition logs
    fn label(&self) -> String;
}

impl PollStatus for Task {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn label(&self) -> String {
        match &self.current_step {
            Some(step) => format!("{} ({})", self.status, step),
            None => self.status.to_string(),
        }
    }
}

impl PollStatus for PaymentOrder {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn label(&self) -> String {
        self.status.to_string()
    }
}

/// Client-side view of a polled resource
#[derive(Debug, Clone, PartialEq)]
pub enum PollState<S> {
    /// Nothing fetched yet
    Idle,
    Status(S),
    /// Last poll failed; `last` keeps the previous good status
    Failed { last: Option<S>, error: ApiError },
}

impl<S: PollStatus> PollState<S> {
    pub fn last(&self) -> Option<&S> {
        match self {
            PollState::Idle => None,
            PollState::Status(s) => Some(s),
            PollState::Failed { last, .. } => last.as_ref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollState::Status(s) if s.is_terminal())
    }
}

/// How a polling loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<S> {
    /// Authoritative terminal status
    Terminal(S),
    /// Single-shot poll finished without reaching a terminal status
    Stopped { last: Option<S> },
    /// Gave up after `PollPolicy::max_duration`
    TimedOut { last: Option<S> },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay after a successful poll
    pub interval: Duration,
    /// Delay after a failed poll
    pub error_interval: Duration,
    pub max_duration: Option<Duration>,
    /// When false, fetch once and stop
    pub auto_refresh: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::every(Duration::from_millis(2000))
    }
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            error_interval: interval,
            max_duration: None,
            auto_refresh: true,
        }
    }

    pub fn once() -> Self {
        Self {
            auto_refresh: false,
            ..Self::default()
        }
    }

    pub fn with_error_interval(mut self, error_interval: Duration) -> Self {
        self.error_interval = error_interval;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }
}

/// Owns the published state of one polled resource.
///
/// Each accepted result replaces the state wholesale. Once a terminal status
/// has been published every later result is ignored.
pub struct PollMonitor<S> {
    tx: watch::Sender<PollState<S>>,
}

impl<S: PollStatus> PollMonitor<S> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PollState::Idle);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState<S>> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> PollState<S> {
        self.tx.borrow().clone()
    }

    /// Publish a poll result. Returns false when it was ignored.
    pub fn apply(&self, result: Result<S, ApiError>) -> bool {
        self.tx.send_if_modified(move |state| {
            if state.is_terminal() {
                return false;
            }
            *state = match result {
                Ok(status) => PollState::Status(status),
                Err(error) => PollState::Failed {
                    last: state.last().cloned(),
                    error,
                },
            };
            true
        })
    }

    pub fn terminal(&self) -> Option<S> {
        match &*self.tx.borrow() {
            PollState::Status(s) if s.is_terminal() => Some(s.clone()),
            _ => None,
        }
    }

    fn last(&self) -> Option<S> {
        self.tx.borrow().last().cloned()
    }
}

impl<S: PollStatus> Default for PollMonitor<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns polling loops
pub struct Poller {
    name: String,
    policy: PollPolicy,
}

impl Poller {
    pub fn new(name: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    /// Start polling with `fetch`. Must be called inside a tokio runtime.
    pub fn spawn<S, F, Fut>(self, fetch: F) -> PollHandle<S>
    where
        S: PollStatus,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, ApiError>> + Send + 'static,
    {
        let monitor = PollMonitor::new();
        let state_rx = monitor.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let join = tokio::spawn(run(self.name, self.policy, monitor, cancel_rx, fetch));

        PollHandle {
            state_rx,
            cancel_tx,
            join: Some(join),
        }
    }
}

async fn run<S, F, Fut>(
    name: String,
    policy: PollPolicy,
    monitor: PollMonitor<S>,
    mut cancel_rx: watch::Receiver<bool>,
    mut fetch: F,
) -> PollOutcome<S>
where
    S: PollStatus,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, ApiError>> + Send + 'static,
{
    let started = Instant::now();
    let mut last_label: Option<String> = None;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                debug!("[{}] cancelled with a request in flight", name);
                return PollOutcome::Cancelled;
            }
            result = fetch() => result,
        };
        if *cancel_rx.borrow() {
            return PollOutcome::Cancelled;
        }

        let succeeded = result.is_ok();
        match &result {
            Ok(status) => {
                let label = status.label();
                if last_label.as_deref() != Some(label.as_str()) {
                    info!("[{}] {}", name, label);
                    last_label = Some(label);
                }
            }
            Err(e) if e.is_recoverable() => warn!("[{}] poll failed, retrying: {}", name, e),
            Err(e) => warn!("[{}] poll rejected, polling continues: {}", name, e),
        }
        monitor.apply(result);

        if let Some(status) = monitor.terminal() {
            info!("[{}] reached terminal status {}", name, status.label());
            return PollOutcome::Terminal(status);
        }
        if !policy.auto_refresh {
            return PollOutcome::Stopped {
                last: monitor.last(),
            };
        }

        let delay = if succeeded {
            policy.interval
        } else {
            policy.error_interval
        };
        let wake_at = Instant::now() + delay;
        if let Some(max) = policy.max_duration {
            if wake_at.duration_since(started) > max {
                let deadline = started + max;
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => return PollOutcome::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
                warn!("[{}] gave up after {:?}", name, max);
                return PollOutcome::TimedOut {
                    last: monitor.last(),
                };
            }
        }

        tokio::select! {
            biased;
            _ = cancel_rx.changed() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }
}

/// Consumer side of a running poller. Dropping it cancels the loop.
pub struct PollHandle<S> {
    state_rx: watch::Receiver<PollState<S>>,
    cancel_tx: watch::Sender<bool>,
    join: Option<JoinHandle<PollOutcome<S>>>,
}

impl<S: PollStatus> PollHandle<S> {
    pub fn state(&self) -> PollState<S> {
        self.state_rx.borrow().clone()
    }

    /// Wait for the next published state; `None` once the loop has ended
    pub async fn changed(&mut self) -> Option<PollState<S>> {
        self.state_rx.changed().await.ok()?;
        Some(self.state_rx.borrow_and_update().clone())
    }

    pub fn updates(&self) -> WatchStream<PollState<S>> {
        WatchStream::new(self.state_rx.clone())
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Wait for the loop to end
    pub async fn wait(mut self) -> PollOutcome<S> {
        match self.join.take() {
            Some(join) => match join.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("poll task aborted: {}", e);
                    PollOutcome::Cancelled
                }
            },
            None => PollOutcome::Cancelled,
        }
    }
}

impl<S> Drop for PollHandle<S> {
    fn drop(&mut self) {
        self.cancel_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::TaskStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn task(status: TaskStatus) -> Task {
        serde_json::from_value(serde_json::json!({
            "task_id": "t1",
            "status": status.as_str(),
        }))
        .unwrap()
    }

    #[test]
    fn test_monitor_replaces_state() {
        let monitor = PollMonitor::new();
        assert_eq!(monitor.state(), PollState::Idle);

        assert!(monitor.apply(Ok(task(TaskStatus::Pending))));
        assert!(monitor.apply(Ok(task(TaskStatus::Processing))));
        assert_eq!(monitor.state(), PollState::Status(task(TaskStatus::Processing)));
    }

    #[test]
    fn test_monitor_failure_keeps_last_good() {
        let monitor = PollMonitor::new();
        monitor.apply(Ok(task(TaskStatus::Processing)));
        monitor.apply(Err(ApiError::Timeout("slow".into())));

        match monitor.state() {
            PollState::Failed { last, error } => {
                assert_eq!(last, Some(task(TaskStatus::Processing)));
                assert_eq!(error, ApiError::Timeout("slow".into()));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_monitor_never_regresses_from_terminal() {
        let monitor = PollMonitor::new();
        monitor.apply(Ok(task(TaskStatus::Completed)));

        assert!(!monitor.apply(Ok(task(TaskStatus::Processing))));
        assert!(!monitor.apply(Err(ApiError::Transport("late".into()))));
        assert_eq!(monitor.terminal(), Some(task(TaskStatus::Completed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Poller::new("t1", PollPolicy::every(Duration::from_millis(2000))).spawn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(task(if n < 2 {
                    TaskStatus::Processing
                } else {
                    TaskStatus::Completed
                }))
            }
        });

        assert_eq!(handle.wait().await, PollOutcome::Terminal(task(TaskStatus::Completed)));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Poller::new("t1", PollPolicy::every(Duration::from_millis(100))).spawn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 | 1 => Err(ApiError::Transport("connection reset".into())),
                    _ => Ok(task(TaskStatus::Failed)),
                }
            }
        });

        assert_eq!(handle.wait().await, PollOutcome::Terminal(task(TaskStatus::Failed)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot() {
        let handle = Poller::new("t1", PollPolicy::once())
            .spawn(|| async { Ok(task(TaskStatus::Processing)) });
        assert_eq!(
            handle.wait().await,
            PollOutcome::Stopped {
                last: Some(task(TaskStatus::Processing))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let policy = PollPolicy::every(Duration::from_millis(2000))
            .with_max_duration(Duration::from_secs(10));
        let handle = Poller::new("t1", policy).spawn(|| async { Ok(task(TaskStatus::Pending)) });

        assert_eq!(
            handle.wait().await,
            PollOutcome::TimedOut {
                last: Some(task(TaskStatus::Pending))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_result() {
        let handle = Poller::new("t1", PollPolicy::default()).spawn(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(task(TaskStatus::Completed))
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        let observed = handle.state();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(observed, PollState::Idle);
        assert_eq!(handle.state(), PollState::Idle);
        assert_eq!(handle.wait().await, PollOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_reports_each_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut handle = Poller::new("t1", PollPolicy::every(Duration::from_millis(50))).spawn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(task(if n == 0 {
                    TaskStatus::Processing
                } else {
                    TaskStatus::Completed
                }))
            }
        });

        let first = handle.changed().await.unwrap();
        assert_eq!(first, PollState::Status(task(TaskStatus::Processing)));
        let second = handle.changed().await.unwrap();
        assert_eq!(second, PollState::Status(task(TaskStatus::Completed)));
        assert_eq!(handle.changed().await, None);
    }
}
