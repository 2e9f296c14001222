//! Paces a batch of fake requests to a few hosts.
//!
//! Run with `RUST_LOG=debug cargo run --example per_host [rates.toml]` to see
//! every wait. Without a rate table, each host gets two requests per second.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use request_limiter::{HostLimiter, RateTable, Registry, Result};
use tokio::time::Instant;

const URLS: &[&str] = &[
    "https://example.com/",
    "https://example.com/about",
    "https://example.com/contact",
    "https://example.org/",
    "https://example.org/news",
    "https://example.net/",
];

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let rates = match env::args().nth(1) {
        Some(path) => RateTable::from_path(path)?,
        None => ["example.com", "example.org", "example.net"]
            .into_iter()
            .map(|host| (host, 2.0))
            .collect(),
    };
    let rates = Arc::new(rates);

    let start = Instant::now();
    let requests = URLS.iter().map(|url| {
        let limiter = HostLimiter::new(rates.clone(), url, false);
        async move {
            let status = limiter.run(fake_request()).await?;
            println!("{:>6.2}s {url} -> {status}", start.elapsed().as_secs_f64());
            Ok::<_, request_limiter::ErrorKind>(())
        }
    });

    for result in join_all(requests).await {
        result?;
    }

    let mut stats: Vec<_> = Registry::global().all_token_stats().into_iter().collect();
    stats.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (host, stats) in stats {
        println!(
            "{host}: {} requests, {} throttled, {:?} waited in total",
            stats.permits, stats.throttled, stats.total_wait
        );
    }
    Ok(())
}

/// Stands in for an HTTP request
async fn fake_request() -> u16 {
    tokio::time::sleep(Duration::from_millis(100)).await;
    200
}
