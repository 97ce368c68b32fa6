use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// A set of concurrent subtasks with a ceiling on how many run at once.
///
/// The group's token is a child of the caller's token, so cancelling the
/// inbound call cancels every subtask. Dropping the group (for example when
/// an axum handler future is dropped on client disconnect) cancels and
/// aborts whatever is still outstanding.
pub struct TaskGroup<T> {
    tasks: JoinSet<Option<T>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize, parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
            cancel: parent.child_token(),
        }
    }

    /// Queue a subtask. It starts once a permit is free.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return None,
                permit = permits.acquire_owned() => permit.ok()?,
            };
            tokio::select! {
                _ = cancel.cancelled() => None,
                out = task => Some(out),
            }
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Next finished subtask, in completion order. Subtasks that were
    /// cancelled are skipped; a panicked subtask surfaces as `Err`.
    pub async fn next(&mut self) -> Option<Result<T, JoinError>> {
        loop {
            match self.tasks.join_next().await? {
                Ok(Some(out)) => return Some(Ok(out)),
                Ok(None) => continue,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Wait for every subtask. Results are in completion order.
    pub async fn join_all(&mut self) -> Result<Vec<T>, JoinError> {
        let mut out = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.next().await {
            out.push(result?);
        }
        Ok(out)
    }

    /// Stop every outstanding subtask.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
    }
}

impl<T> Drop for TaskGroup<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
