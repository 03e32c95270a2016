//! Load testing for the load balancer.

use std::time::{Duration, Instant};

mod common;

#[tokio::test]
async fn test_load_performance() {
    // 1. Setup backends
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;

    // 2. Start balancer
    let proxy = common::start_proxy(common::config_for(vec![a.url(), b.url()])).await;

    // 3. Run load test
    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let start = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = proxy.client().clone();
        let url = proxy.url("/");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "Some requests failed");

    // Round-robin splits a fault-free run exactly.
    assert_eq!(a.hits(), total_requests / 2);
    assert_eq!(b.hits(), total_requests / 2);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("-------------------------\n");

    proxy.shutdown.trigger();
}
