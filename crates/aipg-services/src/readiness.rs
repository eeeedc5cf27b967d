//! Health polling of freshly started backends.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

use crate::supervisor::ExitSignal;

/// Polls a health endpoint until it answers 200.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: reqwest::Client,
    interval: Duration,
    request_timeout: Duration,
}

impl ReadinessProber {
    pub fn new(interval: Duration, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            interval,
            request_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the server is running and healthy.
    ///
    /// Connection failures and non-200 answers both count as not ready.
    pub async fn check_health(&self, url: &str) -> bool {
        match self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                if !(e.is_connect() || e.is_timeout()) {
                    debug!("health check of {} failed: {}", url, e);
                }
                false
            }
        }
    }

    /// Wait until `health_url` answers 200, `timeout` elapses, or the
    /// process exits, whichever comes first.
    ///
    /// The first request goes out one interval after the call. Whichever
    /// side loses the race is dropped along with its timers.
    pub async fn await_ready(
        &self,
        exited_early: ExitSignal,
        health_url: &str,
        timeout: Duration,
    ) -> bool {
        let poll = async {
            let mut attempts: u32 = 0;
            loop {
                tokio::time::sleep(self.interval).await;
                attempts += 1;
                if self.check_health(health_url).await {
                    info!("{} ready after {} polls", health_url, attempts);
                    return true;
                }
            }
        };

        tokio::select! {
            ready = tokio::time::timeout(timeout, poll) => {
                if ready.is_err() {
                    info!("{} not ready within {:?}", health_url, timeout);
                }
                ready.unwrap_or(false)
            }
            _ = exited_early.wait() => {
                info!("process behind {} exited before becoming ready", health_url);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::exit_signal;
    use crate::testing::TestServer;
    use std::time::Instant;

    const INTERVAL: Duration = Duration::from_millis(50);

    fn prober() -> ReadinessProber {
        ReadinessProber::new(INTERVAL, Duration::from_secs(2))
    }

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/healthy")
    }

    #[tokio::test]
    async fn test_early_exit_wins_quickly() {
        let (tx, signal) = exit_signal();
        tx.send(()).unwrap();
        let url = closed_port_url().await;

        let started = Instant::now();
        let ready = prober()
            .await_ready(signal, &url, Duration::from_secs(30))
            .await;
        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_ready_on_nth_poll_not_earlier() {
        let server = TestServer::start(|n, _| if n >= 2 { (200, vec![]) } else { (503, vec![]) }).await;
        let (_tx, signal) = exit_signal();

        let started = Instant::now();
        let ready = prober()
            .await_ready(signal, &server.url("/healthy"), Duration::from_secs(10))
            .await;
        let elapsed = started.elapsed();

        assert!(ready);
        assert_eq!(server.hits(), 3);
        assert!(elapsed >= INTERVAL * 3, "resolved too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_resolves_false() {
        let server = TestServer::start(|_, _| (500, vec![])).await;
        let (_tx, signal) = exit_signal();

        let started = Instant::now();
        let ready = prober()
            .await_ready(signal, &server.url("/health"), Duration::from_millis(300))
            .await;
        assert!(!ready);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(server.hits() >= 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_not_ready() {
        let url = closed_port_url().await;
        assert!(!prober().check_health(&url).await);
    }

    #[tokio::test]
    async fn test_dropped_exit_sender_never_signals() {
        let server = TestServer::ok("").await;
        let (tx, signal) = exit_signal();
        drop(tx);
        let ready = prober()
            .await_ready(signal, &server.url("/queue"), Duration::from_secs(5))
            .await;
        assert!(ready);
    }

    #[tokio::test]
    async fn test_no_polls_after_decision() {
        let server = TestServer::ok("").await;
        let (_tx, signal) = exit_signal();
        assert!(prober().await_ready(signal, &server.url("/healthy"), Duration::from_secs(5)).await);
        let hits = server.hits();
        tokio::time::sleep(INTERVAL * 4).await;
        assert_eq!(server.hits(), hits);
    }
}
