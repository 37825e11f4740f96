//! Remote source fetch collaborator.
//!
//! Reconciliation only consumes the [`SourceFetcher`] contract: a probe
//! either yields the remote body with its hash, a definitive not-found, or
//! a transient failure. Retries with backoff belong inside the
//! implementation; by the time an outcome reaches the reconciler it is
//! final for this pass.

use std::time::Duration;

/// Result of probing one remote source URL.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The page exists; body plus its content digest.
    Fetched {
        body: String,
        content_hash: String,
    },
    /// The remote source definitively reports the page gone.
    NotFound,
    /// Transport or server trouble that outlived the fetcher's own
    /// retries. Not evidence the page is gone.
    Transient(String),
}

pub trait SourceFetcher: Sync {
    fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Digest used for remote bodies; must match the one reconciliation uses
/// for local files so the hashes are comparable.
pub fn hash_body(body: &str) -> String {
    blake3::hash(body.as_bytes()).to_hex().to_string()
}

/// HTTP implementation of the fetch contract.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(probe_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(probe_timeout)
            .build();
        Self { agent }
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchOutcome {
        match self.agent.get(url).call() {
            Ok(response) => match response.into_string() {
                Ok(body) => {
                    let content_hash = hash_body(&body);
                    FetchOutcome::Fetched { body, content_hash }
                }
                Err(err) => FetchOutcome::Transient(err.to_string()),
            },
            Err(ureq::Error::Status(404 | 410, _)) => FetchOutcome::NotFound,
            Err(err) => FetchOutcome::Transient(err.to_string()),
        }
    }
}
