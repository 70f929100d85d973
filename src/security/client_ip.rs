//! Client identity resolution from proxy headers and the socket address.

use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// The address a request is attributed to for rate limiting and lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    ip: Option<IpAddr>,
}

impl ClientIdentity {
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip.to_canonical()),
        }
    }

    pub fn unknown() -> Self {
        Self { ip: None }
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_some_and(|ip| ip.is_loopback())
    }

    /// Key used by the per-identity stores
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{}", ip),
            None => f.write_str("unknown"),
        }
    }
}

/// Resolve the client address.
///
/// Precedence: first hop of `X-Forwarded-For`, then `X-Real-IP`, then the
/// socket address. Header values that do not parse as an IP are skipped.
pub fn resolve_client_identity(headers: &HeaderMap, socket_addr: Option<SocketAddr>) -> ClientIdentity {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first_hop| first_hop.trim().parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| socket_addr.map(|addr| addr.ip()))
        .map(ClientIdentity::from_ip)
        .unwrap_or_else(ClientIdentity::unknown)
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let socket_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(resolve_client_identity(&parts.headers, socket_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn socket() -> Option<SocketAddr> {
        Some("10.0.0.9:5555".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "198.51.100.4"),
        ]);
        assert_eq!(resolve_client_identity(&h, socket()).key(), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_used_without_forwarded_for() {
        let h = headers(&[("x-real-ip", " 198.51.100.4 ")]);
        assert_eq!(resolve_client_identity(&h, socket()).key(), "198.51.100.4");
    }

    #[test]
    fn test_garbage_header_falls_through_to_socket() {
        let h = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(resolve_client_identity(&h, socket()).key(), "10.0.0.9");
    }

    #[test]
    fn test_unknown_without_any_source() {
        let identity = resolve_client_identity(&HeaderMap::new(), None);
        assert_eq!(identity.key(), "unknown");
        assert!(!identity.is_loopback());
    }

    #[test]
    fn test_mapped_ipv6_loopback_is_loopback() {
        let h = headers(&[("x-forwarded-for", "::ffff:127.0.0.1")]);
        let identity = resolve_client_identity(&h, None);
        assert_eq!(identity.key(), "127.0.0.1");
        assert!(identity.is_loopback());
    }
}
