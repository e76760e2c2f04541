use std::{future::Future, time::Duration};

use async_trait::async_trait;
use log::trace;
use tokio::net::TcpStream;

use crate::balance::Endpoint;

/// Error a probe rejects with. Only its message is used, for logging.
pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// `Ok` marks the endpoint healthy, `Err` unhealthy.
pub type ProbeResult = Result<(), ProbeError>;

/// Caller-supplied health check, run once per endpoint per tick.
///
/// The endpoint is a copy; the probe cannot change pool state directly.
/// Any `Fn(Endpoint) -> impl Future<Output = ProbeResult>` closure is a probe.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: Endpoint) -> ProbeResult;
}

#[async_trait]
impl<F, Fut> Probe for F
where
    F: Fn(Endpoint) -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult> + Send + 'static,
{
    async fn probe(&self, endpoint: Endpoint) -> ProbeResult {
        (self)(endpoint).await
    }
}

/// Marks an endpoint healthy when a TCP connection to `address:port` opens.
#[derive(Clone, Debug, Default)]
pub struct TcpProbe {
    connect_timeout: Option<Duration>,
}

impl TcpProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, endpoint: Endpoint) -> ProbeResult {
        let addr = endpoint.socket_addr();
        trace!("TCP probe connecting to {addr}");

        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| format!("connect to {addr} timed out after {timeout:?}"))??,
            None => TcpStream::connect(addr).await?,
        };
        drop(stream);

        Ok(())
    }
}
