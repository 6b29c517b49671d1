use std::time::Duration;

use anyhow::anyhow;
use call_coordinator::{CoordinationError, FailurePolicy, Host, Slot, SlotState, coordinate};
use call_coordinator_test::HitCounter;
use futures::FutureExt;
use futures::future::join_all;

use crate::{ANSWER, counting_producer, setup};

#[tokio::test]
async fn test_failure_is_broadcast() {
    setup();
    let hits = HitCounter::new();
    let coordinated = {
        let hits = hits.clone();
        coordinate("k").wrap(move |_host| {
            hits.hit("k");
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Err::<u32, _>(anyhow!("registry unavailable"))
            }
        })
    };
    let host = Host::new();

    let expected = Err(CoordinationError::Failed("registry unavailable".into()));
    let results = join_all((0..10).map(|_| coordinated.call(&host))).await;
    assert!(results.iter().all(|result| result == &expected));

    // later callers get the same failure, without another run
    assert_eq!(coordinated.call(&host).await, expected);
    assert_eq!(coordinated.state(&host), SlotState::Failed);
    assert_eq!(hits.hits("k"), 1);
}

#[tokio::test]
async fn test_failure_is_retried() {
    setup();
    let hits = HitCounter::new();
    let coordinated = {
        let hits = hits.clone();
        coordinate("k")
            .with_policy(FailurePolicy::Retry)
            .wrap(move |_host| {
                let run = hits.hit("k");
                async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    match run {
                        1 => Err(anyhow!("flaky")),
                        _ => Ok(ANSWER),
                    }
                }
            })
    };
    let host = Host::new();

    // everybody waiting on the failed run gets its failure
    let expected = Err(CoordinationError::Failed("flaky".into()));
    let results = join_all((0..5).map(|_| coordinated.call(&host))).await;
    assert!(results.iter().all(|result| result == &expected));
    assert_eq!(coordinated.state(&host), SlotState::Empty);
    assert!(!host.contains_key("k"));

    assert_eq!(coordinated.call(&host).await, Ok(ANSWER));
    assert_eq!(coordinated.call(&host).await, Ok(ANSWER));
    assert_eq!(hits.hits("k"), 2);
}

#[tokio::test]
async fn test_panic_is_broadcast() {
    setup();
    let coordinated = coordinate("k").wrap(|_host| async {
        let answer: Option<u32> = None;
        Ok::<_, CoordinationError>(answer.expect("no answer"))
    });
    let host = Host::new();

    let expected = Err(CoordinationError::Panicked("no answer".into()));
    let (first, second) = futures::join!(coordinated.call(&host), coordinated.call(&host));
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(coordinated.call(&host).await, expected);
}

#[tokio::test]
async fn test_panic_while_starting_is_broadcast() {
    setup();
    let explode = true;
    let coordinated = coordinate("k").wrap(move |_host| {
        if explode {
            panic!("failed to set up producer");
        }
        async { Ok::<_, CoordinationError>(ANSWER) }
    });
    let host = Host::new();

    assert_eq!(
        coordinated.call(&host).await,
        Err(CoordinationError::Panicked("failed to set up producer".into()))
    );
}

#[tokio::test]
async fn test_panic_is_retried() {
    setup();
    let hits = HitCounter::new();
    let coordinated = {
        let hits = hits.clone();
        coordinate("k")
            .with_policy(FailurePolicy::Retry)
            .wrap(move |_host| {
                let run = hits.hit("k");
                async move {
                    if run == 1 {
                        panic!("first run explodes");
                    }
                    Ok::<_, CoordinationError>(ANSWER)
                }
            })
    };
    let host = Host::new();

    assert_eq!(
        coordinated.call(&host).await,
        Err(CoordinationError::Panicked("first run explodes".into()))
    );
    assert_eq!(coordinated.state(&host), SlotState::Empty);

    assert_eq!(coordinated.call(&host).await, Ok(ANSWER));
    assert_eq!(hits.hits("k"), 2);
}

#[test]
fn test_runtime_shutdown_is_retried() {
    setup();
    let hits = HitCounter::new();
    let coordinated = {
        let hits = hits.clone();
        coordinate("k")
            .with_policy(FailurePolicy::Retry)
            .wrap(move |_host| {
                let run = hits.hit("k");
                async move {
                    if run == 1 {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    Ok::<_, CoordinationError>(ANSWER)
                }
            })
    };
    let host = Host::new();
    let new_runtime = || {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    };

    let runtime = new_runtime();
    runtime.block_on(async {
        assert_eq!(coordinated.call(&host).now_or_never(), None);
        tokio::time::sleep(Duration::from_millis(1)).await;
    });
    assert_eq!(coordinated.state(&host), SlotState::Pending);
    drop(runtime);

    // the cancelled run cleared the slot instead of storing its failure
    assert_eq!(coordinated.state(&host), SlotState::Empty);
    assert!(!host.contains_key("k"));

    assert_eq!(new_runtime().block_on(coordinated.call(&host)), Ok(ANSWER));
    assert_eq!(hits.hits("k"), 2);
}

#[test]
fn test_runtime_shutdown_cancels_producer() {
    setup();
    let hits = HitCounter::new();
    let coordinated = counting_producer("k", &hits, Duration::from_secs(3600));
    let host = Host::new();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(async {
        // install the slot and spawn the producer, then abandon the call
        assert_eq!(coordinated.call(&host).now_or_never(), None);
        tokio::time::sleep(Duration::from_millis(1)).await;
    });
    assert_eq!(coordinated.state(&host), SlotState::Pending);
    drop(runtime);

    assert_eq!(coordinated.state(&host), SlotState::Failed);
    assert!(matches!(
        host.get::<Slot<u32>>("k"),
        Some(Slot::Failed(CoordinationError::Cancelled))
    ));
    assert_eq!(hits.hits("k"), 1);
}

#[tokio::test]
async fn test_decorations_share_their_key() {
    setup();
    let hits = HitCounter::new();
    let coordinated = counting_producer("k", &hits, Duration::from_millis(1));
    let retrying = coordinate("k")
        .with_policy(FailurePolicy::Retry)
        .wrap_producer({
            let hits = hits.clone();
            move |_host: Host| {
                hits.hit("k");
                async { Ok::<_, CoordinationError>(ANSWER) }
            }
        });
    let host = Host::new();

    // both decorations use the same slot, whichever comes first runs its producer
    assert_eq!(retrying.call(&host).await, Ok(ANSWER));
    assert_eq!(coordinated.call(&host).await, Ok(ANSWER));
    assert_eq!(hits.hits("k"), 1);
}
