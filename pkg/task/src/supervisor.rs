use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Retry policy for a supervised task.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Clamped to at least 1.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> + Send {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff.max(self.initial_backoff))
            .with_max_times(self.max_attempts.max(1) - 1)
            .build()
    }
}

/// Status callbacks for a supervised task.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    /// Called once, before the first attempt.
    async fn on_start(&self);

    /// An attempt failed and another one follows after `delay`.
    async fn on_retry(&self, attempt: usize, error: &anyhow::Error, delay: Duration);

    async fn on_success(&self, attempts: usize);

    /// The last attempt failed.
    async fn on_failure(&self, attempts: usize, error: &anyhow::Error);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { attempts: usize },
    Failed { attempts: usize, message: String },
}

/// Run `job` in the background under `policy`, reporting to `observer`.
///
/// The returned handle resolves to the final outcome. Callers are free to
/// drop it; the observer still sees every transition.
pub fn supervise<F, Fut>(
    name: String,
    policy: RetryPolicy,
    observer: Arc<dyn TaskObserver>,
    mut job: F,
) -> JoinHandle<TaskOutcome>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        info!("Supervised task {} started", name);
        observer.on_start().await;

        let mut delays = policy.delays();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match job().await {
                Ok(()) => {
                    info!("Supervised task {} succeeded (attempt {})", name, attempt);
                    observer.on_success(attempt).await;
                    return TaskOutcome::Succeeded { attempts: attempt };
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            "Supervised task {} attempt {} failed, retrying in {:?}: {:#}",
                            name, attempt, delay, e
                        );
                        observer.on_retry(attempt, &e, delay).await;
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(
                            "Supervised task {} failed after {} attempts: {:#}",
                            name, attempt, e
                        );
                        observer.on_failure(attempt, &e).await;
                        return TaskOutcome::Failed {
                            attempts: attempt,
                            message: format!("{:#}", e),
                        };
                    }
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskObserver for Recorder {
        async fn on_start(&self) {
            self.events.lock().unwrap().push("start".into());
        }
        async fn on_retry(&self, attempt: usize, _error: &anyhow::Error, _delay: Duration) {
            self.events.lock().unwrap().push(format!("retry-{}", attempt));
        }
        async fn on_success(&self, attempts: usize) {
            self.events.lock().unwrap().push(format!("ok-{}", attempts));
        }
        async fn on_failure(&self, attempts: usize, error: &anyhow::Error) {
            self.events
                .lock()
                .unwrap()
                .push(format!("failed-{}: {}", attempts, error));
        }
    }

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let recorder = Arc::new(Recorder::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let outcome = supervise("flaky".into(), fast(3), recorder.clone(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    anyhow::bail!("not yet");
                }
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, TaskOutcome::Succeeded { attempts: 2 });
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start", "retry-1", "ok-2"]
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let recorder = Arc::new(Recorder::default());
        let outcome = supervise("broken".into(), fast(2), recorder.clone(), || async {
            anyhow::bail!("downstream unreachable")
        })
        .await
        .unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Failed {
                attempts: 2,
                message: "downstream unreachable".into()
            }
        );
        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], "failed-2: downstream unreachable");
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let recorder = Arc::new(Recorder::default());
        let outcome = supervise("once".into(), fast(0), recorder.clone(), || async {
            anyhow::bail!("nope")
        })
        .await
        .unwrap();
        assert!(matches!(outcome, TaskOutcome::Failed { attempts: 1, .. }));
    }
}
