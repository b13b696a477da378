mod common;

use common::{eventually, harness, HELLO};
use pagepress::engine::mock::MockBehavior;
use pagepress::{PoolConfig, RecyclePolicy};

fn recycling_config(after_requests: u64, hard_cap: Option<u64>) -> PoolConfig {
    PoolConfig {
        max_concurrent: 4,
        recycle: RecyclePolicy {
            after_requests,
            hard_cap,
        },
        ..Default::default()
    }
}

fn producer(pdf: &[u8]) -> String {
    let text = String::from_utf8_lossy(pdf);
    let start = text.find("process ").expect("mock producer tag");
    text[start..].split(')').next().unwrap_or_default().to_string()
}

#[tokio::test]
async fn idle_process_is_replaced_after_threshold() {
    let h = harness(recycling_config(3, None), MockBehavior::default());
    for _ in 0..3 {
        let pdf = h.pool.render_pdf(HELLO, None, None).await.unwrap();
        assert_eq!(producer(&pdf), "process 1");
    }

    let pdf = h.pool.render_pdf(HELLO, None, None).await.unwrap();
    assert_eq!(producer(&pdf), "process 2");

    let stats = h.pool.stats().engine;
    assert_eq!(stats.generation, 2);
    assert_eq!(stats.recycles, 1);
    assert_eq!(stats.requests, 1);
    assert_eq!(h.launcher.close_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_jobs_finish_on_their_process() {
    let h = harness(
        recycling_config(2, None),
        MockBehavior {
            print_delay_ms: 150,
            ..Default::default()
        },
    );

    let slow: Vec<_> = (0..3)
        .map(|_| {
            let pool = h.pool.clone();
            tokio::spawn(async move { pool.render_pdf(HELLO, None, None).await })
        })
        .collect();

    let pool = h.pool.clone();
    assert!(eventually(move || pool.stats().engine.requests == 3).await);
    // Threshold passed while surfaces are open: retirement waits.
    assert_eq!(h.launcher.close_count(), 0);

    for job in slow {
        let pdf = job.await.unwrap().unwrap();
        assert_eq!(producer(&pdf), "process 1");
    }

    let pdf = h.pool.render_pdf(HELLO, None, None).await.unwrap();
    assert_eq!(producer(&pdf), "process 2");
    assert_eq!(h.pool.stats().engine.recycles, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hard_cap_retires_busy_process() {
    let h = harness(
        recycling_config(1, Some(2)),
        MockBehavior {
            print_delay_ms: 200,
            ..Default::default()
        },
    );

    let slow: Vec<_> = (0..2)
        .map(|_| {
            let pool = h.pool.clone();
            tokio::spawn(async move { pool.render_pdf(HELLO, None, None).await })
        })
        .collect();
    let pool = h.pool.clone();
    assert!(eventually(move || pool.stats().engine.active_surfaces == 2).await);

    let pdf = h.pool.render_pdf(HELLO, None, None).await.unwrap();
    assert_eq!(producer(&pdf), "process 2");
    assert_eq!(h.pool.stats().engine.forced_recycles, 1);

    // The mock keeps printing on a closed process, so the old jobs still finish.
    for job in slow {
        job.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn crashed_process_is_relaunched() {
    let h = harness(recycling_config(100, None), MockBehavior::default());
    h.pool.render_pdf(HELLO, None, None).await.unwrap();
    h.launcher.disconnect_current();

    let pdf = h.pool.render_pdf(HELLO, None, None).await.unwrap();
    assert_eq!(producer(&pdf), "process 2");
    assert_eq!(h.pool.stats().engine.recycles, 0);
}

#[tokio::test]
async fn shutdown_then_render_launches_again() {
    let h = harness(recycling_config(100, None), MockBehavior::default());
    h.pool.render_pdf(HELLO, None, None).await.unwrap();
    h.pool.shutdown().await.unwrap();
    assert!(!h.pool.stats().engine.running);

    h.pool.render_pdf(HELLO, None, None).await.unwrap();
    assert_eq!(h.launcher.launch_count(), 2);
}
