//! Fixed-cadence background tasks with per-task failure handling.
//!
//! Each tick runs the synchronous action on the blocking pool. Errors and
//! panics are handed to the task's error handler and the task keeps its
//! cadence; a failing task never affects any other task.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_types::CollaboratorError;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest cadence a task runs at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Why one run of a periodic action did not complete.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Error(#[from] CollaboratorError),

    #[error("panicked: {0}")]
    Panic(String),
}

type Action = Arc<dyn Fn() -> Result<(), CollaboratorError> + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str, &TaskFailure) + Send + Sync>;

/// A named action run every `interval` until shutdown.
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    action: Action,
    on_error: ErrorHandler,
}

impl PeriodicTask {
    /// A task whose failures are logged.
    pub fn new<F>(name: &'static str, interval: Duration, action: F) -> Self
    where
        F: Fn() -> Result<(), CollaboratorError> + Send + Sync + 'static,
    {
        Self {
            name,
            interval: interval.max(MIN_INTERVAL),
            action: Arc::new(action),
            on_error: Arc::new(log_failure),
        }
    }

    /// Replace the error handler.
    pub fn on_error<H>(mut self, handler: H) -> Self
    where
        H: Fn(&str, &TaskFailure) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(handler);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the task until the `shutdown` flag is set. The first run happens
    /// immediately unless shutdown was already requested.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(
                task = self.name,
                interval_ms = self.interval.as_millis() as u64,
                "periodic task started"
            );
            loop {
                tokio::select! {
                    biased;
                    () = shutdown_requested(&mut shutdown) => {
                        tracing::debug!(task = self.name, "periodic task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(failure) = self.run_once().await {
                            (self.on_error)(self.name, &failure);
                        }
                    }
                }
            }
        })
    }

    async fn run_once(&self) -> Result<(), TaskFailure> {
        let action = Arc::clone(&self.action);
        match tokio::task::spawn_blocking(move || action()).await {
            Ok(result) => result.map_err(TaskFailure::Error),
            Err(join) if join.is_panic() => {
                Err(TaskFailure::Panic(panic_message(join.into_panic())))
            }
            Err(join) => Err(TaskFailure::Panic(join.to_string())),
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&requested| requested).await;
}

fn log_failure(task: &str, failure: &TaskFailure) {
    tracing::error!(task, error = %failure, "periodic task failed, continuing");
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_until_shutdown() {
        let (tx, _) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = PeriodicTask::new("counter", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .spawn(tx.subscribe());

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send_replace(true);
        handle.await.unwrap();

        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several runs, got {after_stop}");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn errors_and_panics_go_to_the_handler_and_the_task_continues() {
        let (tx, _) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let panics = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let (e, p) = (Arc::clone(&errors), Arc::clone(&panics));
        let handle = PeriodicTask::new("flaky", Duration::from_millis(5), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            match n % 3 {
                0 => Err(CollaboratorError::Storage("disk full".into())),
                1 => panic!("boom"),
                _ => Ok(()),
            }
        })
        .on_error(move |name, failure| {
            assert_eq!(name, "flaky");
            match failure {
                TaskFailure::Error(_) => e.fetch_add(1, Ordering::SeqCst),
                TaskFailure::Panic(msg) => {
                    assert_eq!(msg, "boom");
                    p.fetch_add(1, Ordering::SeqCst)
                }
            };
        })
        .spawn(tx.subscribe());

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send_replace(true);
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 4);
        assert!(errors.load(Ordering::SeqCst) >= 1);
        assert!(panics.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn task_spawned_after_shutdown_never_runs() {
        let (tx, _) = watch::channel(false);
        tx.send_replace(true);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = PeriodicTask::new("late", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .spawn(tx.subscribe());

        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let task = PeriodicTask::new("fast", Duration::ZERO, || Ok(()));
        assert_eq!(task.interval(), MIN_INTERVAL);
        assert_eq!(task.name(), "fast");
    }
}
