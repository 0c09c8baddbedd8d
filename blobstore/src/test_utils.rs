use crate::{AccessCondition, Error, LeaseId, LeaseTarget, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Delay added before a request reaches the service and after it answers.
#[derive(Debug, Clone, Default)]
pub struct LatencySimulator {
    pub request: Duration,
    pub response: Duration,
}

impl LatencySimulator {
    pub fn symmetric(latency: Duration) -> Self {
        Self {
            request: latency,
            response: latency,
        }
    }

    pub async fn simulate_request(&self) {
        if !self.request.is_zero() {
            sleep(self.request).await;
        }
    }

    pub async fn simulate_response(&self) {
        if !self.response.is_zero() {
            sleep(self.response).await;
        }
    }
}

/// Wraps a [`LeaseTarget`] and injects latency and transport failures.
#[derive(Debug)]
pub struct FaultyTarget<T> {
    inner: T,
    latency: LatencySimulator,
    partitioned: AtomicBool,
    failures_left: AtomicUsize,
    response_failures_left: AtomicUsize,
    acquire_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl<T: LeaseTarget> FaultyTarget<T> {
    pub fn new(inner: T) -> Self {
        Self::with_latency(inner, LatencySimulator::default())
    }

    pub fn with_latency(inner: T, latency: LatencySimulator) -> Self {
        Self {
            inner,
            latency,
            partitioned: AtomicBool::new(false),
            failures_left: AtomicUsize::new(0),
            response_failures_left: AtomicUsize::new(0),
            acquire_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Every request fails until [`FaultyTarget::heal`] is called.
    pub fn partition(&self) {
        self.partitioned.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.partitioned.store(false, Ordering::SeqCst);
    }

    /// The next `count` requests fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// The next `count` requests reach the service and take effect, but
    /// their answers are lost and the caller sees a transport error.
    pub fn fail_responses(&self, count: usize) {
        self.response_failures_left.store(count, Ordering::SeqCst);
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    async fn before_request(&self) -> Result<()> {
        self.latency.simulate_request().await;

        if self.partitioned.load(Ordering::SeqCst) {
            return Err(Error::Transport("network partition".to_string()));
        }
        if take_one(&self.failures_left) {
            return Err(Error::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    async fn after_response<R>(&self, result: Result<R>) -> Result<R> {
        self.latency.simulate_response().await;

        if take_one(&self.response_failures_left) {
            return Err(Error::Transport("response lost".to_string()));
        }
        result
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<T: LeaseTarget> LeaseTarget for FaultyTarget<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn acquire_lease(
        &self,
        duration: Duration,
        proposed_id: Option<LeaseId>,
    ) -> Result<LeaseId> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.before_request().await?;
        let result = self.inner.acquire_lease(duration, proposed_id).await;
        self.after_response(result).await
    }

    async fn renew_lease(&self, lease_id: &LeaseId) -> Result<()> {
        self.before_request().await?;
        let result = self.inner.renew_lease(lease_id).await;
        self.after_response(result).await
    }

    async fn release_lease(&self, lease_id: &LeaseId) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.before_request().await?;
        let result = self.inner.release_lease(lease_id).await;
        self.after_response(result).await
    }

    async fn read(&self, condition: &AccessCondition) -> Result<Bytes> {
        self.before_request().await?;
        let result = self.inner.read(condition).await;
        self.after_response(result).await
    }

    async fn write(&self, data: Bytes, condition: &AccessCondition) -> Result<()> {
        self.before_request().await?;
        let result = self.inner.write(data, condition).await;
        self.after_response(result).await
    }
}
