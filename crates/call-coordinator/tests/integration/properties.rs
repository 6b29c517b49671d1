use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use call_coordinator::{CoordinationError, Host, SlotState, coordinate};
use call_coordinator_test::HitCounter;
use futures::FutureExt;

use crate::{ANSWER, counting_producer, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_run_across_threads() {
    setup();
    let hits = HitCounter::new();
    let coordinated = counting_producer("k", &hits, Duration::from_millis(5));

    for _ in 0..10 {
        let host = Host::new();
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let coordinated = coordinated.clone();
                let host = host.clone();
                tokio::spawn(async move { coordinated.call(&host).await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap(), Ok(ANSWER));
        }
    }

    // one run per host
    assert_eq!(hits.hits("k"), 10);
}

#[tokio::test]
async fn test_sequential_calls_are_cached() {
    setup();
    let hits = HitCounter::new();
    let coordinated = counting_producer("k", &hits, Duration::from_millis(1));
    let host = Host::new();

    assert_eq!(coordinated.call(&host).await, Ok(ANSWER));
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(coordinated.call(&host).await, Ok(ANSWER));

    assert_eq!(hits.hits("k"), 1);
}

#[tokio::test]
async fn test_completed_slot_does_not_suspend() {
    setup();
    let hits = HitCounter::new();
    let coordinated = counting_producer("k", &hits, Duration::from_millis(1));
    let host = Host::new();

    coordinated.call(&host).await.unwrap();

    for _ in 0..10 {
        assert_eq!(coordinated.call(&host).now_or_never(), Some(Ok(ANSWER)));
    }
}

#[tokio::test]
async fn test_clones_share_the_slot() {
    setup();
    let hits = HitCounter::new();
    let coordinated = counting_producer("k", &hits, Duration::from_millis(1));
    let clone = coordinated.clone();
    let host = Host::new();

    let (first, second) = futures::join!(coordinated.call(&host), clone.call(&host));
    assert_eq!(first, second);
    assert_eq!(hits.hits("k"), 1);
}

#[tokio::test]
async fn test_producer_sees_the_first_host() {
    setup();
    let coordinated = coordinate("host_id").wrap(|host: Host| async move {
        Ok::<_, CoordinationError>(host.id())
    });
    let host = Host::new();

    assert_eq!(coordinated.call(&host).await, Ok(host.id()));
    assert_eq!(coordinated.call(&host.clone()).await, Ok(host.id()));
}

#[tokio::test]
async fn test_value_is_immutable_once_ready() {
    setup();
    let runs = Arc::new(AtomicUsize::new(0));
    let coordinated = {
        let runs = Arc::clone(&runs);
        coordinate("k").wrap(move |_host| {
            let run = runs.fetch_add(1, Ordering::Relaxed);
            async move { Ok::<_, CoordinationError>(run) }
        })
    };
    let host = Host::new();

    assert_eq!(coordinated.call(&host).await, Ok(0));
    assert_eq!(coordinated.state(&host), SlotState::Ready);
    for _ in 0..5 {
        assert_eq!(coordinated.call(&host).await, Ok(0));
        assert_eq!(coordinated.state(&host), SlotState::Ready);
    }
    assert_eq!(runs.load(Ordering::Relaxed), 1);
}
