use reqwest::Client;
use std::time::Duration;

/// Shared HTTP client for gateway calls. Only the connect phase is bounded by
/// default; a total request timeout is applied when `HTTP_TIMEOUT_SECS` is set.
pub fn build_client() -> Client {
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(connect));
    if let Some(timeout) = env_secs("HTTP_TIMEOUT_SECS") {
        builder = builder.timeout(Duration::from_secs(timeout));
    }
    builder.build().unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
}
