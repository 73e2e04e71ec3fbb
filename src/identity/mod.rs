//! Per-caller identifiers derived from connection metadata.
//!
//! An identity is the caller's source address joined with a short digest of a
//! coarse client signature (by default the `User-Agent`). It is not a
//! credential: callers sharing an address and signature share a quota.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

/// Substituted when the source address is missing or empty
pub const UNKNOWN_SOURCE: &str = "unknown";

const SIGNATURE_DIGEST_BYTES: usize = 6;

/// Opaque, deterministic caller identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the identity for a source address and client signature.
///
/// Never fails; an absent address collapses to [`UNKNOWN_SOURCE`].
pub fn resolve(source_address: Option<&str>, client_signature: &str) -> ClientIdentity {
    let source = source_address
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SOURCE);

    let digest = Sha256::digest(client_signature.as_bytes());
    let signature: String = digest[..SIGNATURE_DIGEST_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    ClientIdentity(format!("{}-{}", source, signature))
}

/// Identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Use the first `X-Forwarded-For` hop as the source address
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Headers concatenated into the client signature
    #[serde(default = "default_signature_headers")]
    pub signature_headers: Vec<String>,
}

fn default_signature_headers() -> Vec<String> {
    vec!["user-agent".to_string()]
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_for: false,
            signature_headers: default_signature_headers(),
        }
    }
}

/// Extracts identities from request metadata
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    /// Resolve the identity of a request
    pub fn resolve_request(
        &self,
        peer: Option<SocketAddr>,
        headers: &HeaderMap,
    ) -> ClientIdentity {
        let source = self.source_address(peer, headers);
        let signature = self.client_signature(headers);
        resolve(source.as_deref(), &signature)
    }

    fn source_address(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> Option<String> {
        if self.config.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());

            if let Some(addr) = forwarded {
                return Some(addr.to_string());
            }
        }

        peer.map(|addr| addr.ip().to_string())
    }

    fn client_signature(&self, headers: &HeaderMap) -> String {
        self.config
            .signature_headers
            .iter()
            .map(|name| {
                headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
