use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Instant;
use tokio::net::TcpStream;

/// Outcome of one successful liveness probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub latency_ms: u64,
    pub connections: Option<u32>,
}

/// Trivial liveness check against the database.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Returns latency on success; any error marks the database unhealthy.
    async fn ping(&self) -> Result<ProbeOutcome>;
}

/// Probes a database by opening a TCP connection to its listener.
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }
}

#[async_trait]
impl DatabaseProbe for TcpProbe {
    fn name(&self) -> &str { "tcp" }

    async fn ping(&self) -> Result<ProbeOutcome> {
        let started = Instant::now();
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Failed to connect to database at {}", self.address))?;
        drop(stream);

        Ok(ProbeOutcome {
            latency_ms: started.elapsed().as_millis() as u64,
            connections: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string());
        let outcome = probe.ping().await.unwrap();
        assert!(outcome.latency_ms < 5_000);
    }

    #[tokio::test]
    async fn tcp_probe_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpProbe::new(addr.to_string()).ping().await.unwrap_err();
        assert!(err.to_string().contains("Failed to connect"));
    }
}
