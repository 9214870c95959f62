//! Peer registry and the HTTP client used to talk to peers

use crate::blockchain::Block;
use crate::error::ChainError;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A known peer: its network location (`host[:port]`) and the public key it
/// advertised. Serialized as a `[host, key]` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "(String, String)", from = "(String, String)")]
pub struct Peer {
    pub host: String,
    pub key: String,
}

impl From<Peer> for (String, String) {
    fn from(peer: Peer) -> Self {
        (peer.host, peer.key)
    }
}

impl From<(String, String)> for Peer {
    fn from((host, key): (String, String)) -> Self {
        Peer { host, key }
    }
}

impl Peer {
    pub fn new(host: impl Into<String>, key: impl Into<String>) -> Self {
        Peer {
            host: host.into(),
            key: key.into(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.host)
    }
}

/// Extracts `host[:port]` from a peer URL. Scheme-less addresses such as
/// `10.0.0.5:5000` are read as `http://`.
pub fn network_location(address: &str) -> Result<String, PeerError> {
    let address = address.trim();
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    let parsed = Url::parse(&candidate)
        .ok()
        .filter(|u| u.has_host())
        .ok_or_else(|| PeerError::InvalidAddress(address.to_string()))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| PeerError::InvalidAddress(address.to_string()))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Set of known peers keyed by `(host, key)`; re-adding is a no-op.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<BTreeSet<Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` with `key`. Returns the stored peer and whether it was new.
    pub fn add_node(&self, address: &str, key: &str) -> Result<(Peer, bool), ChainError> {
        let host = network_location(address)?;
        let peer = Peer::new(host, key);
        let inserted = self.peers.write().insert(peer.clone());
        Ok((peer, inserted))
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("peer {host} answered with status {status}")]
    Status { host: String, status: u16 },
    #[error("peer {0} did not advertise a public key")]
    MissingKey(String),
}

impl From<PeerError> for ChainError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::InvalidAddress(_) => ChainError::MalformedRequest(err.to_string()),
            other => ChainError::PeerUnreachable(other.to_string()),
        }
    }
}

/// `GET /blockchain` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
    pub length: usize,
}

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    public_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnnounceRequest<'a> {
    nodes: [&'a str; 1],
}

/// HTTP client for peer calls. Every call is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::ConfigError(format!("cannot build http client: {}", e)))?;
        Ok(Self { http })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, host: &str, url: String) -> Result<T, PeerError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(PeerError::Status {
                host: host.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn fetch_chain(&self, peer: &Peer) -> Result<ChainResponse, PeerError> {
        self.get_json(&peer.host, format!("{}/blockchain", peer.base_url())).await
    }

    /// Asks the node at `address` for its public key.
    pub async fn fetch_public_key(&self, address: &str) -> Result<String, PeerError> {
        let base = address.trim().trim_end_matches('/');
        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };
        let body: PublicKeyResponse = self.get_json(address, format!("{}/getPublicKey", base)).await?;
        body.public_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PeerError::MissingKey(address.to_string()))
    }

    /// Tells `peer` about this node so it can pull our chain.
    pub async fn announce(&self, peer: &Peer, own_url: &str) -> Result<(), PeerError> {
        let response = self
            .http
            .post(format!("{}/nodes/add_nodes", peer.base_url()))
            .json(&AnnounceRequest { nodes: [own_url] })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PeerError::Status {
                host: peer.host.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Asks `peer` to run its own chain sync.
    pub async fn request_sync(&self, peer: &Peer) -> Result<(), PeerError> {
        let _: serde_json::Value = self
            .get_json(&peer.host, format!("{}/nodes/sync", peer.base_url()))
            .await?;
        Ok(())
    }
}
