//! FILENAME: query-runtime/src/worker.rs
//! The background execution unit.
//!
//! Jobs cross to the worker over an mpsc channel and answer on a oneshot,
//! so no mutable state is shared across the boundary. The worker spawns
//! each job independently; months of one range fetch concurrently.

use std::sync::Arc;
use std::time::Duration;

use result_cache::ResultShape;
use tokio::sync::{mpsc, oneshot};

use crate::error::FetchError;
use crate::months::MonthRange;
use crate::service::{QueryVariables, RemoteQueryService, StalenessMarker};

enum Job {
    Fetch {
        query_id: String,
        variables: QueryVariables,
        bounds: Option<MonthRange>,
        reply: oneshot::Sender<Result<ResultShape, FetchError>>,
    },
    Probe {
        query_id: String,
        variables: QueryVariables,
        bounds: Option<MonthRange>,
        reply: oneshot::Sender<Result<StalenessMarker, FetchError>>,
    },
}

/// Handle to the worker task. Cloneable; dropping every handle closes the
/// channel and stops the worker once in-flight jobs finish.
#[derive(Clone)]
pub struct QueryExecutor {
    tx: mpsc::Sender<Job>,
    probe_supported: bool,
}

impl QueryExecutor {
    /// Spawns the worker on the current tokio runtime. `timeout` bounds
    /// every remote call; an elapsed call fails that job only.
    pub fn spawn<S: RemoteQueryService>(service: Arc<S>, timeout: Option<Duration>) -> Self {
        let probe_supported = service.supports_index_probe();
        let (tx, mut rx) = mpsc::channel::<Job>(64);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let service = Arc::clone(&service);
                tokio::spawn(run_job(service, job, timeout));
            }
        });
        QueryExecutor {
            tx,
            probe_supported,
        }
    }

    pub fn supports_probe(&self) -> bool {
        self.probe_supported
    }

    pub async fn fetch(
        &self,
        query_id: String,
        variables: QueryVariables,
        bounds: Option<MonthRange>,
    ) -> Result<ResultShape, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Fetch {
                query_id,
                variables,
                bounds,
                reply,
            })
            .await
            .map_err(|_| FetchError::ExecutorStopped)?;
        rx.await.map_err(|_| FetchError::ExecutorStopped)?
    }

    pub async fn probe(
        &self,
        query_id: String,
        variables: QueryVariables,
        bounds: Option<MonthRange>,
    ) -> Result<StalenessMarker, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Probe {
                query_id,
                variables,
                bounds,
                reply,
            })
            .await
            .map_err(|_| FetchError::ExecutorStopped)?;
        rx.await.map_err(|_| FetchError::ExecutorStopped)?
    }
}

async fn run_job<S: RemoteQueryService>(service: Arc<S>, job: Job, timeout: Option<Duration>) {
    match job {
        Job::Fetch {
            query_id,
            variables,
            bounds,
            reply,
        } => {
            let result = bounded(
                service.execute(&query_id, &variables, bounds.as_ref()),
                timeout,
            )
            .await;
            // A dropped receiver means the caller gave up; nothing to do.
            let _ = reply.send(result);
        }
        Job::Probe {
            query_id,
            variables,
            bounds,
            reply,
        } => {
            let result = bounded(
                service.execute_index(&query_id, &variables, bounds.as_ref()),
                timeout,
            )
            .await;
            let _ = reply.send(result);
        }
    }
}

async fn bounded<T>(
    fut: impl std::future::Future<Output = Result<T, FetchError>>,
    timeout: Option<Duration>,
) -> Result<T, FetchError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use table_model::{Row, Value};

    struct SlowService {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl RemoteQueryService for SlowService {
        fn execute(
            &self,
            _query_id: &str,
            _variables: &QueryVariables,
            bounds: Option<&MonthRange>,
        ) -> impl std::future::Future<Output = Result<ResultShape, FetchError>> + Send {
            let bounds = bounds.cloned();
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                let month = bounds.map(|b| b.start.key()).unwrap_or_default();
                let mut shape = ResultShape::new();
                shape.insert(
                    "rows".to_string(),
                    vec![Row::from_pairs([("month", Value::text(month))])],
                );
                Ok(shape)
            }
        }

        fn execute_index(
            &self,
            _query_id: &str,
            _variables: &QueryVariables,
            _bounds: Option<&MonthRange>,
        ) -> impl std::future::Future<Output = Result<StalenessMarker, FetchError>> + Send {
            async move { Ok(Value::text("m1")) }
        }
    }

    #[tokio::test]
    async fn jobs_round_trip_over_the_channel() {
        let service = Arc::new(SlowService {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let executor = QueryExecutor::spawn(Arc::clone(&service), None);
        let shape = executor
            .fetch("q".to_string(), QueryVariables::new(), None)
            .await
            .unwrap();
        assert_eq!(shape["rows"].len(), 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(!executor.supports_probe());
    }

    #[tokio::test]
    async fn elapsed_jobs_fail_with_timeout() {
        let service = Arc::new(SlowService {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let executor =
            QueryExecutor::spawn(Arc::clone(&service), Some(Duration::from_millis(5)));
        let result = executor
            .fetch("q".to_string(), QueryVariables::new(), None)
            .await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }
}
