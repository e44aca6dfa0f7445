//! Network reachability as seen by the sync engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::config::RemoteConfig;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports whether the device can currently reach the network.
///
/// `is_connected` must be a cheap, non-blocking read.
pub trait ConnectivityProbe {
    fn is_connected(&self) -> bool;
}

/// Fixed answer; used by tests and by explicit offline mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConnectivity(pub bool);

impl StaticConnectivity {
    #[must_use]
    pub const fn online() -> Self {
        Self(true)
    }

    #[must_use]
    pub const fn offline() -> Self {
        Self(false)
    }
}

impl ConnectivityProbe for StaticConnectivity {
    fn is_connected(&self) -> bool {
        self.0
    }
}

/// Last observed reachability of the backend health endpoint.
///
/// Starts out disconnected until the first `refresh`.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    url: String,
    client: Client,
    reachable: Arc<AtomicBool>,
}

impl ReachabilityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            url: url.into(),
            client: Client::builder().timeout(timeout).build()?,
            reachable: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn for_config(config: &RemoteConfig) -> reqwest::Result<Self> {
        Self::new(
            config.connectivity_url(),
            config.request_timeout.min(DEFAULT_PROBE_TIMEOUT),
        )
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Probe the endpoint once and remember the answer.
    ///
    /// Any HTTP response counts as reachable; only transport failures
    /// (DNS, connect, timeout) mark the probe offline.
    pub async fn refresh(&self) -> bool {
        let reachable = match self.client.get(&self.url).send().await {
            Ok(response) => {
                tracing::debug!(
                    "Connectivity probe {} answered HTTP {}",
                    self.url,
                    response.status().as_u16()
                );
                true
            }
            Err(error) => {
                tracing::debug!("Connectivity probe {} failed: {}", self.url, error);
                false
            }
        };
        self.reachable.store(reachable, Ordering::SeqCst);
        reachable
    }
}

impl ConnectivityProbe for ReachabilityProbe {
    fn is_connected(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

impl<T: ConnectivityProbe + ?Sized> ConnectivityProbe for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_connectivity_reports_fixed_value() {
        assert!(StaticConnectivity::online().is_connected());
        assert!(!StaticConnectivity::offline().is_connected());
    }

    #[test]
    fn reachability_probe_uses_health_url_and_starts_offline() {
        let config = RemoteConfig::new("https://demo.supabase.co", "anon").unwrap();
        let probe = ReachabilityProbe::for_config(&config).unwrap();
        assert_eq!(probe.url(), "https://demo.supabase.co/auth/v1/health");
        assert!(!probe.is_connected());
    }

    #[tokio::test]
    async fn refresh_marks_unreachable_host_offline() {
        // Port 9 on loopback is the discard service; nothing listens there in CI.
        let probe =
            ReachabilityProbe::new("http://127.0.0.1:9/health", Duration::from_millis(500)).unwrap();
        assert!(!probe.refresh().await);
        assert!(!probe.is_connected());
    }
}
