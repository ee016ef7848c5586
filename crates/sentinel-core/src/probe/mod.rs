mod http;
mod retry;
mod tcp;

pub use http::{HttpProbe, KeywordProbe};
pub use retry::RetryPolicy;
pub use tcp::{connect_with_timeout, extract_host, ConnectOutcome, PortProbe};

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::monitor::{ProbeKind, ProbeOutcome};

/// A single check attempt against a target.
///
/// Implementations never fail: transport, protocol and content failures all
/// resolve to a status/latency pair. The trait is object-safe and Send + Sync
/// so one prober can be shared by every cycle task.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, kind: &ProbeKind) -> ProbeOutcome;
}

/// The three protocol strategies, dispatched on the monitor's kind.
#[derive(Debug, Clone)]
pub struct ProbeSet {
    http: HttpProbe,
    keyword: KeywordProbe,
    port: PortProbe,
}

impl ProbeSet {
    pub fn new(http: HttpProbe, keyword: KeywordProbe, port: PortProbe) -> Self {
        Self {
            http,
            keyword,
            port,
        }
    }

    pub fn from_config(config: &EngineConfig) -> reqwest::Result<Self> {
        Ok(Self {
            http: HttpProbe::new(config.http_timeout)?,
            keyword: KeywordProbe::new(config.keyword_timeout)?,
            port: PortProbe::new(config.port_timeout),
        })
    }
}

#[async_trait]
impl Prober for ProbeSet {
    async fn probe(&self, url: &str, kind: &ProbeKind) -> ProbeOutcome {
        match kind {
            ProbeKind::Http => self.http.probe(url).await,
            ProbeKind::Keyword { keyword } => self.keyword.probe(url, keyword).await,
            ProbeKind::Port { port } => self.port.probe(url, *port).await,
        }
    }
}
