//! Coordinated sections: renewal, cancellation and lease loss

use coordkit::common::Error;
use coordkit::lock::{CoordinatedSection, DistributedMutex, MemoryLockStore, SectionOutcome};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const TTL: Duration = Duration::from_millis(100);

fn section(store: &Arc<MemoryLockStore>) -> CoordinatedSection {
    CoordinatedSection::new(DistributedMutex::new(store.clone()))
}

#[tokio::test(start_paused = true)]
async fn test_lease_outlives_initial_ttl() {
    let store = Arc::new(MemoryLockStore::new());
    let holder = section(&store);
    let other = DistributedMutex::new(store.clone());

    let run = holder.run("report", TTL, || async {
        sleep(Duration::from_millis(450)).await;
        Ok("done")
    });
    let observer = async {
        for _ in 0..4 {
            sleep(Duration::from_millis(100)).await;
            assert!(!other.acquire("report", TTL).await.unwrap().is_acquired());
        }
    };
    let (outcome, ()) = tokio::join!(run, observer);

    assert_eq!(outcome.unwrap(), SectionOutcome::Completed("done"));
    assert!(holder.mutex().metrics().leases_extended.get() >= 8);
    assert!(other.acquire("report", TTL).await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_and_stops_renewal() {
    let store = Arc::new(MemoryLockStore::new());
    let section = section(&store);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(220)).await;
        trigger.cancel();
    });

    let result: Result<SectionOutcome<()>, Error> = section
        .run_with_cancel("job", TTL, &cancel, |_token| async {
            pending::<()>().await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(store.holder("job").is_none());

    let metrics = section.mutex().metrics();
    assert_eq!(metrics.sections_cancelled.get(), 1);
    assert_eq!(metrics.sections_active.get(), 0);

    let renewals = metrics.leases_extended.get();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(metrics.leases_extended.get(), renewals);
}

#[tokio::test(start_paused = true)]
async fn test_lost_lease_does_not_stop_callback() {
    let store = Arc::new(MemoryLockStore::new());
    let section = section(&store);
    let intruder = DistributedMutex::new(store.clone());

    let store_ref = store.clone();
    let outcome = section
        .run("batch", TTL, || async {
            // the store drops out long enough for the lease to lapse
            store_ref.set_available(false);
            sleep(Duration::from_millis(150)).await;
            store_ref.set_available(true);

            let lease = intruder
                .acquire("batch", Duration::from_secs(30))
                .await?
                .into_lease()
                .ok_or_else(|| Error::Internal("intruder should win".into()))?;
            sleep(Duration::from_millis(100)).await;
            Ok(lease.token)
        })
        .await
        .unwrap();

    // the callback ran to completion and the intruder's lock survived release
    let token = outcome.completed().unwrap();
    assert_eq!(store.holder("batch").as_deref(), Some(token.as_str()));
    assert!(section.mutex().metrics().lease_extend_failures.get() >= 2);
}

#[tokio::test]
async fn test_contention_between_sections() {
    let store = Arc::new(MemoryLockStore::new());
    let first = section(&store);
    let second = section(&store);

    let (a, b) = tokio::join!(
        first.run("nightly", Duration::from_secs(30), || async {
            sleep(Duration::from_millis(50)).await;
            Ok(1)
        }),
        second.run("nightly", Duration::from_secs(30), || async {
            sleep(Duration::from_millis(50)).await;
            Ok(2)
        }),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.is_contended()).count(), 1);
    assert!(store.holder("nightly").is_none());
}
