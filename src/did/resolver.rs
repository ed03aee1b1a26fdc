//! DID document resolution over HTTPS.
//!
//! The web resolver fetches `did.json` with a hard timeout, zero redirects,
//! and an SSRF guard: before any request is made, every address the host
//! resolves to must fall outside the private and reserved ranges. A single
//! retry is attempted on network failure; nothing else is retried.

use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

use super::{DidDocument, url_for};
use crate::config::TrustConfig;
use crate::error::Error;

/// Resolves a DID to its DID document.
///
/// The verifier is generic over this trait so deployments can substitute a
/// caching or test resolver for the live web resolver.
pub trait DidResolver: Send + Sync {
    /// Resolve the DID, returning the hosted document.
    fn resolve(&self, did: &str) -> impl Future<Output = anyhow::Result<DidDocument>> + Send;
}

/// Live `did:web` resolver.
#[derive(Clone, Debug)]
pub struct WebResolver {
    client: reqwest::Client,
}

impl WebResolver {
    /// Build a resolver from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the TLS backend cannot be initialized.
    pub fn new(config: &TrustConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .https_only(true)
            .timeout(Duration::from_millis(config.did_resolve_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch and decode the DID document for a `did:web` identifier.
    ///
    /// # Errors
    ///
    /// `Error::BlockedHost` when the host resolves into a private or
    /// reserved range; `Error::DidResolution` on network, status, or decode
    /// failure.
    pub async fn resolve_did(&self, did: &str) -> Result<DidDocument, Error> {
        let url = url_for(did)?;
        let host = url
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| Error::DidResolution(format!("no host in {url}")))?;
        guard_host(host).await?;

        debug!("resolving {did} via {url}");

        // one retry on network failure, none on a bad status
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(first) => {
                debug!("retrying DID fetch after network error: {first}");
                self.client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| Error::DidResolution(format!("fetch {url}: {e}")))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DidResolution(format!("{url} returned {status}")));
        }
        let document: DidDocument = response
            .json()
            .await
            .map_err(|e| Error::DidResolution(format!("decode {url}: {e}")))?;

        if document.id != did {
            return Err(Error::InvalidDidDocument(format!(
                "document id {} does not match {did}",
                document.id
            )));
        }
        Ok(document)
    }
}

impl DidResolver for WebResolver {
    async fn resolve(&self, did: &str) -> anyhow::Result<DidDocument> {
        Ok(self.resolve_did(did).await?)
    }
}

/// Reject hosts that are, or resolve to, private or reserved addresses.
async fn guard_host(host: &str) -> Result<(), Error> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        if is_blocked(addr) {
            return Err(Error::BlockedHost(host.to_string()));
        }
        return Ok(());
    }

    let addrs = tokio::net::lookup_host((host, 443))
        .await
        .map_err(|e| Error::DidResolution(format!("lookup {host}: {e}")))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        if is_blocked(addr.ip()) {
            return Err(Error::BlockedHost(host.to_string()));
        }
    }
    if !any {
        return Err(Error::DidResolution(format!("{host} has no addresses")));
    }
    Ok(())
}

/// `true` for loopback, RFC 1918, link-local, ULA, and unspecified ranges.
fn is_blocked(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked(IpAddr::V4(mapped));
            }
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10 link-local
                || (segments[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (segments[0] & 0xfe00) == 0xfc00
        }
    }
}
