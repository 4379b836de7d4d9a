//! Fetch one URL many times at once and show that only one request leaves.
//!
//! ```sh
//! RUST_LOG=sluice=debug cargo run --example fetch -- https://httpbin.org/get
//! ```
use futures::future::join_all;
use sluice::prelude::*;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/get".to_string());

    let client = Client::builder()
        .user_agent("sluice-fetch/0.1")
        .request_timeout(Duration::from_secs(15))
        .follow_redirect(true)
        .cache_expire_after_write(Duration::from_secs(5))
        .build()?;

    let started = Instant::now();
    let requests = (0..8).map(|_| Request::get(&url).build());
    let requests = requests.collect::<Result<Vec<_>, _>>()?;
    let futures = client.execute_all(requests)?;

    for (n, outcome) in join_all(futures).await.into_iter().enumerate() {
        let response = outcome?;
        tracing::info!(
            n,
            status = %response.status(),
            bytes = response.body().len(),
            "response"
        );
    }

    let retried = Request::get(&url)
        .critical_get(true)
        .retry_status_codes([500, 502, 503, 504])
        .max_retries(2)
        .build()?;
    let response = client.critical_execute(retried)?.await?;
    tracing::info!(status = %response.status(), "critical fetch");

    let stats = client.cache_stats();
    tracing::info!(
        elapsed = ?started.elapsed(),
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        "done"
    );

    client.close();
    Ok(())
}
