use log::error;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Bounded pool of tokio tasks for blocking-on-network work.
///
/// Results come back in completion order, not submission order.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
    root: CancellationToken,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        WorkerPool {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
            root: CancellationToken::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Fresh token for one job. The job's owner decides when to cancel it.
    pub fn job_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub async fn run_all<I, F, T>(&self, jobs: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut set = JoinSet::new();
        for job in jobs {
            let permits = self.permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                job.await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(value) => results.push(value),
                Err(err) => error!("{} worker failed: {}", self.name, err),
            }
        }
        results
    }
}
