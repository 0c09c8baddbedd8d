// End-to-end lock behaviour against the in-memory blob service

use blobstore::test_utils::{FaultyTarget, LatencySimulator};
use cloudlock::prelude::*;
use proptest::prelude::*;
use tokio::time::{sleep, Instant};

const BLOB: &str = "testblob";

fn setup() -> (Arc<InMemoryBlobService>, Arc<BlobRef>) {
    let service = InMemoryBlobService::new();
    service.upload(BLOB, "0");
    let blob = Arc::new(service.blob(BLOB));
    (service, blob)
}

async fn increment_by_one<T: LeaseTarget + 'static>(target: Arc<T>) -> cloudlock::Result<u32> {
    let mut lock = CloudLock::new(target.clone(), None)?;
    assert!(lock.acquire(10, Duration::from_secs(1)).await?);

    let condition = lock.access_condition()?;
    let text = target.read(&condition).await?;
    let count: u32 = std::str::from_utf8(&text).unwrap().parse().unwrap();
    target
        .write(Bytes::from((count + 1).to_string()), &condition)
        .await?;

    lock.release().await?;
    Ok(count + 1)
}

#[tokio::test(start_paused = true)]
async fn test_released_when_disposed() {
    let (_service, blob) = setup();

    let mut lock = CloudLock::new(blob.clone(), Some(MIN_LEASE_DURATION)).unwrap();
    assert!(lock.acquire(5, Duration::from_secs(1)).await.unwrap());
    lock.dispose().await;

    // Available to an outside party straight away
    let lease_id = blob.acquire_lease(MIN_LEASE_DURATION, None).await.unwrap();
    blob.release_lease(&lease_id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_cycles() {
    let (_service, blob) = setup();

    for _ in 0..5 {
        let mut lock = CloudLock::new(blob.clone(), None).unwrap();
        let started = Instant::now();
        assert!(lock.try_acquire().await.unwrap());
        assert_eq!(Instant::now(), started);
        lock.dispose().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_can_be_taken() {
    let (_service, blob) = setup();

    let mut lock = CloudLock::new(blob.clone(), Some(MIN_LEASE_DURATION)).unwrap();
    assert!(lock.try_acquire().await.unwrap());
    let stale = AccessCondition::lease(lock.held_lease_id().unwrap());

    sleep(Duration::from_secs(14)).await;
    let err = blob
        .acquire_lease(MIN_LEASE_DURATION, None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);

    // One second past the lease
    sleep(Duration::from_secs(2)).await;
    let outsider = blob.acquire_lease(MIN_LEASE_DURATION, None).await.unwrap();

    let err = lock.renew().await.unwrap_err();
    assert!(matches!(err, LockError::LeaseExpiredOnRenew { .. }));
    assert_eq!(lock.state(), LockState::Released);

    // The stale holder can no longer touch the blob
    assert!(blob.write(Bytes::from("9"), &stale).await.is_err());
    let current = AccessCondition::lease(outsider);
    blob.write(Bytes::from("7"), &current).await.unwrap();
    lock.dispose().await;
    assert_eq!(blob.read(&current).await.unwrap(), "7");
}

#[tokio::test(start_paused = true)]
async fn test_retries_on_collisions() {
    let (service, blob) = setup();

    let results = futures_util::future::join_all([
        tokio::spawn(increment_by_one(blob.clone())),
        tokio::spawn(increment_by_one(blob.clone())),
        tokio::spawn(increment_by_one(blob.clone())),
    ])
    .await;

    let mut seen: Vec<u32> = results
        .into_iter()
        .map(|result| result.unwrap().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(service.download(BLOB).unwrap(), "3");
}

#[tokio::test(start_paused = true)]
async fn test_no_lost_updates_with_latency() {
    let service = InMemoryBlobService::new();
    service.upload(BLOB, "0");
    let latency = LatencySimulator::symmetric(Duration::from_millis(20));
    let target = Arc::new(FaultyTarget::with_latency(service.blob(BLOB), latency));

    let workers = 6;
    let handles: Vec<_> = (0..workers)
        .map(|_| tokio::spawn(increment_by_one(target.clone())))
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(service.download(BLOB).unwrap(), workers.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_scoped_workers_exactly_once() {
    let (service, blob) = setup();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let blob = blob.clone();
            tokio::spawn(async move {
                let target = blob.clone();
                with_lock(blob, None, RetryPolicy::default(), |lease_id| async move {
                    let condition = AccessCondition::lease(lease_id);
                    let text = target.read(&condition).await.unwrap();
                    let count: u32 = std::str::from_utf8(&text).unwrap().parse().unwrap();
                    // Hold the lock across a suspension point
                    sleep(Duration::from_millis(1500)).await;
                    target
                        .write(Bytes::from((count + 1).to_string()), &condition)
                        .await
                        .unwrap();
                })
                .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }
    assert_eq!(service.download(BLOB).unwrap(), "4");
}

#[tokio::test]
async fn test_release_without_acquire() {
    let (service, blob) = setup();

    let mut lock = CloudLock::new(blob.clone(), None).unwrap();
    lock.release().await.unwrap();
    lock.release().await.unwrap();
    assert_eq!(lock.state(), LockState::Released);
    assert!(!service.lease_state(BLOB).unwrap().is_leased());
}

#[tokio::test]
async fn test_config_drives_lock() {
    let (_service, blob) = setup();
    let config = LockConfig::from_json(r#"{ "lease_duration_secs": 45, "max_attempts": 2 }"#).unwrap();

    let mut lock = CloudLock::from_config(blob, &config).unwrap();
    assert_eq!(lock.lease_duration(), Duration::from_secs(45));
    assert!(lock.acquire_with(&config.retry_policy()).await.unwrap());
    lock.dispose().await;
}

proptest! {
    #[test]
    fn short_durations_never_reach_the_service(millis in 0u64..15_000) {
        let service = InMemoryBlobService::new();
        service.upload(BLOB, "0");
        let target = Arc::new(FaultyTarget::new(service.blob(BLOB)));

        let result = CloudLock::new(target.clone(), Some(Duration::from_millis(millis)));
        let is_configuration_error = matches!(result, Err(LockError::Configuration { .. }));
        prop_assert!(is_configuration_error);
        prop_assert_eq!(target.acquire_calls(), 0);
    }

    #[test]
    fn valid_durations_are_accepted(secs in 15u64..=60) {
        let (_service, blob) = setup();
        let lock = CloudLock::new(blob, Some(Duration::from_secs(secs))).unwrap();
        prop_assert_eq!(lock.lease_duration(), Duration::from_secs(secs));
        prop_assert_eq!(lock.state(), LockState::Unacquired);
    }
}
