use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Measures raw round-trip latency to a host, independently of the measured
/// call. Implementations must resolve within the given timeout.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Returns the round-trip time in milliseconds, or `None` when the host
    /// is unreachable or the measurement is unknown.
    async fn measure(&self, host: &str, timeout: Duration) -> Option<f64>;
}

/// Round-trip probe using a TCP handshake. ICMP needs privileged sockets,
/// so the connect time to the service port stands in for the raw wire RTT.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub port: u16,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self { port: 443 }
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn measure(&self, host: &str, timeout: Duration) -> Option<f64> {
        let addr = format!("{}:{}", host, self.port);
        let start = Instant::now();

        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Some(start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(err)) => {
                debug!("probe connect to {} failed: {}", addr, err);
                None
            }
            Err(_) => {
                debug!("probe to {} timed out after {:?}", addr, timeout);
                None
            }
        }
    }
}
