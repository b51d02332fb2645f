//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Listener bind loop honouring the configured retry policy."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use gr_common::config::BindRetryConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bind `addr`, retrying every `retry.interval` until it succeeds or the
/// attempt budget runs out.
pub async fn bind_with_retry(addr: SocketAddr, retry: &BindRetryConfig) -> Result<TcpListener> {
    let max_attempts = retry.max_attempts();
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if attempt > 1 {
                    info!(address = %addr, attempt, "listener bound after retry");
                }
                return Ok(listener);
            }
            Err(err) => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(anyhow!(
                        "failed to bind {addr} after {attempt} attempt(s): {err}"
                    ));
                }
                warn!(
                    address = %addr,
                    attempt,
                    retry_in_ms = retry.interval.as_millis() as u64,
                    error = %err,
                    "bind failed, retrying"
                );
                tokio::time::sleep(retry.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gr_common::config::RetryPolicy;
    use std::time::Duration;

    #[tokio::test]
    async fn bounded_retry_gives_up() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let retry = BindRetryConfig {
            policy: RetryPolicy::Bounded,
            attempts: Some(2),
            interval: Duration::from_millis(10),
        };
        let err = bind_with_retry(addr, &retry).await.unwrap_err();
        assert!(err.to_string().contains("2 attempt"));
    }

    #[tokio::test]
    async fn retry_succeeds_once_port_frees() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let retry = BindRetryConfig {
            policy: RetryPolicy::Infinite,
            attempts: None,
            interval: Duration::from_millis(20),
        };
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(taken);
        });
        let listener = tokio::time::timeout(Duration::from_secs(5), bind_with_retry(addr, &retry))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(listener.local_addr().unwrap(), addr);
        release.await.unwrap();
    }
}
