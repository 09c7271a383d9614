//! Rate key generation and client identity derivation.

use std::net::IpAddr;

/// Identity used when neither a forwarded address nor a peer address is known.
///
/// Every such client shares one bucket.
pub const UNKNOWN_CLIENT: &str = "0.0.0.0";

/// A key that uniquely identifies one rate limit window.
///
/// The key pairs the client identity with the resource it requested. Both
/// halves are compared exactly; there is no wildcard matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    /// Client identity, usually an IP address
    pub client: String,
    /// Normalized request path
    pub resource: String,
}

impl RateKey {
    /// Create a new rate key from a client and resource identity.
    pub fn new(client: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            resource: resource.into(),
        }
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.client, self.resource)
    }
}

/// Derive the client identity for a request.
///
/// Prefers the first entry of an `X-Forwarded-For` value, then the transport
/// peer address, then [`UNKNOWN_CLIENT`]. The forwarded header is trusted as-is,
/// so a client that can set it can pick its own bucket.
pub fn client_identity(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> String {
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (forwarded, peer) {
        (Some(forwarded), _) => forwarded.to_string(),
        (None, Some(peer)) => peer.to_string(),
        (None, None) => UNKNOWN_CLIENT.to_string(),
    }
}
