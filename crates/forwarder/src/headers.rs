//! Header filtering shared by the forwarder and the proxy relay

/// Hop-by-hop headers (RFC 2616 Section 13.5.1), never forwarded either way
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Caller-supplied headers the transport computes itself
const TRANSPORT_MANAGED: &[&str] = &["host", "content-length"];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

pub(crate) fn is_transport_managed(name: &str) -> bool {
    is_hop_by_hop(name)
        || TRANSPORT_MANAGED
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
}
