use pagepress::{AdmissionGate, Error};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn waiters_are_admitted_in_arrival_order() {
    let gate = AdmissionGate::new(1, Duration::from_secs(5));
    let held = gate.acquire().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for (i, name) in ["A", "B", "C"].into_iter().enumerate() {
        let gate_c = gate.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            let permit = gate_c.acquire().await.unwrap();
            order.lock().unwrap().push(name);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(permit);
        }));
        while gate.queued() < i + 1 {
            tokio::task::yield_now().await;
        }
    }

    assert_eq!(gate.queued(), 3);
    drop(held);
    for t in tasks {
        t.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(gate.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn excess_callers_queue_instead_of_running() {
    let max = 3;
    let extra = 4;
    let gate = AdmissionGate::new(max, Duration::from_secs(5));
    let permits: Vec<_> = {
        let mut v = Vec::new();
        for _ in 0..max {
            v.push(gate.acquire().await.unwrap());
        }
        v
    };

    let mut waiters = Vec::new();
    for _ in 0..extra {
        let g = gate.clone();
        waiters.push(tokio::spawn(async move { g.acquire().await.map(drop) }));
    }
    while gate.queued() < extra {
        tokio::task::yield_now().await;
    }
    assert_eq!(gate.active_count(), max);

    drop(permits);
    for w in waiters {
        w.await.unwrap().unwrap();
    }
    assert_eq!(gate.active_count(), 0);
    assert_eq!(gate.queued(), 0);
}

#[tokio::test]
async fn busy_error_is_retryable_and_leaves_queue_empty() {
    let gate = AdmissionGate::new(1, Duration::from_millis(30));
    let _held = gate.acquire().await.unwrap();
    let err = gate.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Busy { .. }));
    assert!(err.is_retryable());
    assert_eq!(gate.queued(), 0);
}
