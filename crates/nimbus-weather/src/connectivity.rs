//! Connectivity probes: is the network believed to be unavailable?

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// True when network access is believed unavailable (airplane mode,
    /// no route, ...). Polled once per tick.
    async fn is_offline(&self) -> bool;
}

/// Flag toggled from outside the engine, the equivalent of an airplane-mode
/// switch. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ManualConnectivity {
    offline: Arc<AtomicBool>,
}

impl ManualConnectivity {
    pub fn new(offline: bool) -> Self {
        Self {
            offline: Arc::new(AtomicBool::new(offline)),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for ManualConnectivity {
    async fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

/// Considers the network available when a TCP connection to `addr` opens
/// within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpConnectivity {
    addr: String,
    timeout: Duration,
}

impl TcpConnectivity {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpConnectivity {
    async fn is_offline(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                tracing::debug!("Connectivity probe to {} failed: {}", self.addr, e);
                true
            }
            Err(_) => {
                tracing::debug!("Connectivity probe to {} timed out", self.addr);
                true
            }
        }
    }
}
