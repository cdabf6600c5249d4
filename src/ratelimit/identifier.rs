//! Rate-limit identifier resolution
//!
//! Authenticated requests are counted per principal, everything else per
//! network origin. Routes can override this with their own function.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;

/// Authenticated caller, inserted into request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// Maps a request to the identifier its quota is counted under.
pub type IdentifierFn = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// `user:<id>` for authenticated requests, otherwise [`network_origin`].
pub fn resolve_identifier(parts: &Parts) -> String {
    match parts.extensions.get::<Principal>() {
        Some(Principal(id)) => format!("user:{}", id),
        None => network_origin(parts),
    }
}

/// `ip:<addr>` from the first `X-Forwarded-For` hop, `X-Real-IP`, or the
/// socket peer address, in that order.
pub fn network_origin(parts: &Parts) -> String {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        parts
            .headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let peer = || {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };

    match forwarded.or_else(real_ip) {
        Some(ip) => format!("ip:{}", ip),
        None => match peer() {
            Some(ip) => format!("ip:{}", ip),
            None => "ip:unknown".to_string(),
        },
    }
}

/// Identifier function that ignores the principal, for login endpoints
/// where attempts must be limited per source regardless of claimed identity.
pub fn by_network_origin() -> IdentifierFn {
    Arc::new(network_origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_principal_wins() {
        let mut parts = parts(Request::builder().header("x-forwarded-for", "10.0.0.1"));
        parts.extensions.insert(Principal("42".to_string()));

        assert_eq!(resolve_identifier(&parts), "user:42");
        assert_eq!(by_network_origin()(&parts), "ip:10.0.0.1");
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let parts = parts(
            Request::builder().header("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(resolve_identifier(&parts), "ip:203.0.113.7");
    }

    #[test]
    fn test_real_ip_then_peer() {
        let parts_real = parts(Request::builder().header("x-real-ip", "198.51.100.2"));
        assert_eq!(network_origin(&parts_real), "ip:198.51.100.2");

        let mut parts_peer = parts(Request::builder());
        let addr: SocketAddr = "192.0.2.9:5000".parse().unwrap();
        parts_peer.extensions.insert(ConnectInfo(addr));
        assert_eq!(network_origin(&parts_peer), "ip:192.0.2.9");
    }

    #[test]
    fn test_unknown_origin() {
        assert_eq!(network_origin(&parts(Request::builder())), "ip:unknown");
    }
}
