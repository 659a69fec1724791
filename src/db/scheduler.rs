// Async Scheduler
// Multiplexes many in-flight queries over a single drain loop

use crate::db::error::{DbalError, DriverDiagnostic};
use crate::db::result::ResultSet;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::{Future, IntoFuture};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Default poll granularity of the drain loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A submitted query future
pub type QueryFuture<T> = BoxFuture<'static, Result<T, DbalError>>;

struct Submission<T> {
    id: u64,
    label: String,
    future: QueryFuture<T>,
    resolver: oneshot::Sender<Result<T, DbalError>>,
}

struct Completed<T> {
    id: u64,
    label: String,
    resolver: oneshot::Sender<Result<T, DbalError>>,
    outcome: Result<T, DbalError>,
}

impl<T> Submission<T> {
    async fn run(self) -> Completed<T> {
        let outcome = self.future.await;
        Completed {
            id: self.id,
            label: self.label,
            resolver: self.resolver,
            outcome,
        }
    }
}

struct Registry<T> {
    queued: Vec<Submission<T>>,
    in_flight: usize,
    processed: usize,
    next_id: u64,
}

/// Adopted queries being polled. Lives in the shared state so a cancelled
/// drainer hands them to the next one instead of dropping them.
type InFlight<T> = FuturesUnordered<BoxFuture<'static, Completed<T>>>;

struct Inner<T> {
    registry: Mutex<Registry<T>>,
    drain: tokio::sync::Mutex<InFlight<T>>,
    poll_interval: Duration,
}

impl<T: Send + 'static> Inner<T> {
    fn registry(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn adopt(&self) -> Vec<Submission<T>> {
        let mut registry = self.registry();
        let adopted = std::mem::take(&mut registry.queued);
        registry.in_flight += adopted.len();
        adopted
    }

    fn resolve(&self, completed: Completed<T>) {
        {
            let mut registry = self.registry();
            registry.in_flight = registry.in_flight.saturating_sub(1);
            registry.processed += 1;
        }
        debug!(
            query = completed.id,
            connection = %completed.label,
            ok = completed.outcome.is_ok(),
            "parallel query completed"
        );
        if completed.resolver.send(completed.outcome).is_err() {
            trace!(query = completed.id, "handle dropped before completion");
        }
    }

    /// Drive every registered query until none is pending.
    ///
    /// `in_flight` is the set guarded by the drain lock.
    async fn drain(&self, in_flight: &mut InFlight<T>) {
        loop {
            for submission in self.adopt() {
                in_flight.push(Box::pin(submission.run()));
            }
            if in_flight.is_empty() {
                let mut registry = self.registry();
                if registry.queued.is_empty() {
                    registry.processed = 0;
                    return;
                }
                continue;
            }
            match tokio::time::timeout(self.poll_interval, in_flight.next()).await {
                Ok(Some(completed)) => self.resolve(completed),
                Ok(None) => {}
                Err(_) => trace!(in_flight = in_flight.len(), "poll interval elapsed"),
            }
        }
    }
}

/// Explicitly constructed multiplexer for concurrently submitted queries.
///
/// Cloning shares the same registry. Queries are polled by whoever awaits a
/// handle; no background task is spawned.
pub struct AsyncScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Default for AsyncScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> AsyncScheduler<T> {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    queued: Vec::new(),
                    in_flight: 0,
                    processed: 0,
                    next_id: 0,
                }),
                drain: tokio::sync::Mutex::new(FuturesUnordered::new()),
                poll_interval,
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Register a query and return its handle without polling it
    pub fn submit<F>(&self, label: impl Into<String>, future: F) -> QueryHandle<T>
    where
        F: Future<Output = Result<T, DbalError>> + Send + 'static,
    {
        let label = label.into();
        let (resolver, receiver) = oneshot::channel();
        let id = {
            let mut registry = self.inner.registry();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.queued.push(Submission {
                id,
                label: label.clone(),
                future: Box::pin(future),
                resolver,
            });
            id
        };
        debug!(query = id, connection = %label, "parallel query submitted");

        QueryHandle {
            id,
            label,
            receiver,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Queries registered or in flight
    pub fn pending(&self) -> usize {
        let registry = self.inner.registry();
        registry.queued.len() + registry.in_flight
    }

    /// Queries resolved since the last time the loop drained
    pub fn processed(&self) -> usize {
        self.inner.registry().processed
    }

    /// Drive every pending query to completion
    pub async fn run_pending(&self) {
        let mut in_flight = self.inner.drain.lock().await;
        self.inner.drain(&mut in_flight).await;
    }
}

/// Handle to one submitted query
pub struct QueryHandle<T> {
    id: u64,
    label: String,
    receiver: oneshot::Receiver<Result<T, DbalError>>,
    inner: Arc<Inner<T>>,
}

fn abandoned() -> DbalError {
    DbalError::Query(DriverDiagnostic::new(
        "query was abandoned before completion",
    ))
}

impl<T: Send + 'static> QueryHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Label of the connection running the query
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for this query, draining the registry when nobody else is
    pub async fn wait(mut self) -> Result<T, DbalError> {
        loop {
            match self.receiver.try_recv() {
                Ok(outcome) => return outcome,
                Err(oneshot::error::TryRecvError::Closed) => return Err(abandoned()),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }

            let mut in_flight = tokio::select! {
                outcome = &mut self.receiver => {
                    return outcome.unwrap_or_else(|_| Err(abandoned()));
                }
                in_flight = self.inner.drain.lock() => in_flight,
            };
            self.inner.drain(&mut in_flight).await;
            drop(in_flight);
        }
    }
}

impl<T: Send + 'static> IntoFuture for QueryHandle<T> {
    type Output = Result<T, DbalError>;
    type IntoFuture = BoxFuture<'static, Result<T, DbalError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// Outcome of `execute_async`, resolved by awaiting it
pub enum PendingResult<'a> {
    /// Runs the query on the adapter's own link when awaited
    Deferred(BoxFuture<'a, Result<ResultSet, DbalError>>),
    /// Already submitted to a scheduler
    Scheduled(QueryHandle<ResultSet>),
    /// Failed before anything was submitted
    Rejected(DbalError),
}

impl<'a> PendingResult<'a> {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<ResultSet, DbalError>> + Send + 'a,
    {
        PendingResult::Deferred(Box::pin(future))
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, PendingResult::Scheduled(_))
    }
}

impl<'a> IntoFuture for PendingResult<'a> {
    type Output = Result<ResultSet, DbalError>;
    type IntoFuture = BoxFuture<'a, Result<ResultSet, DbalError>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            PendingResult::Deferred(future) => future,
            PendingResult::Scheduled(handle) => Box::pin(handle.wait()),
            PendingResult::Rejected(err) => Box::pin(async move { Err(err) }),
        }
    }
}
