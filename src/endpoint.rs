//! Signaling endpoint derivation.
//!
//! Users configure the plain HTTP(S) address of the signaling server. The
//! WebSocket endpoint is derived from it: `http` maps to `ws`, `https` to
//! `wss`, trailing slashes are dropped and [`ENDPOINT_SUFFIX`] is appended.

use std::fmt;

use url::Url;

use crate::error::{Result, SessionError};

/// Path appended to the base address to reach the signaling socket.
pub const ENDPOINT_SUFFIX: &str = "/ws";

/// Base address of a signaling server.
///
/// Construct with [`ConnectionTarget::parse`]; a parsed target always yields a
/// well-formed endpoint.
///
/// ```
/// use room_session_client::ConnectionTarget;
///
/// let target = ConnectionTarget::parse("https://signal.example.com/").unwrap();
/// assert_eq!(target.endpoint(), "wss://signal.example.com/ws");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    secure: bool,
    /// Host, optional port and optional path, without trailing slashes.
    authority: String,
}

impl ConnectionTarget {
    /// Parse a base address such as `http://localhost:5000`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidEndpoint`] if the address is not a valid
    /// URL, uses a scheme other than `http`/`https`, has no host, or carries
    /// credentials, a query or a fragment.
    pub fn parse(base: &str) -> Result<Self> {
        let base = base.trim();
        let invalid = |reason: &str| SessionError::InvalidEndpoint(format!("{base:?}: {reason}"));

        let url = Url::parse(base).map_err(|e| invalid(&e.to_string()))?;

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(invalid(&format!(
                    "unsupported scheme {other:?} (expected http or https)"
                )))
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(invalid("missing host")),
        };
        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("credentials are not allowed"));
        }
        if url.query().is_some() {
            return Err(invalid("query strings are not allowed"));
        }
        if url.fragment().is_some() {
            return Err(invalid("fragments are not allowed"));
        }

        let path = url.path().trim_end_matches('/');
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}{path}"),
            None => format!("{host}{path}"),
        };

        Ok(Self { secure, authority })
    }

    /// The WebSocket endpoint for this server.
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}{ENDPOINT_SUFFIX}", self.authority)
    }

    /// Whether the endpoint uses TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.authority)
    }
}

impl std::str::FromStr for ConnectionTarget {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn endpoint(base: &str) -> String {
        ConnectionTarget::parse(base).unwrap().endpoint()
    }

    #[test]
    fn http_maps_to_ws() {
        assert_eq!(endpoint("http://localhost:5000"), "ws://localhost:5000/ws");
    }

    #[test]
    fn https_maps_to_wss() {
        assert_eq!(
            endpoint("https://signalingserverdomain.download"),
            "wss://signalingserverdomain.download/ws"
        );
    }

    #[test]
    fn trailing_slashes_are_stripped() {
        assert_eq!(endpoint("http://host//"), "ws://host/ws");
        assert_eq!(endpoint("https://host/base/"), "wss://host/base/ws");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        assert_eq!(endpoint("HTTPS://host"), "wss://host/ws");
    }

    #[test]
    fn derivation_is_repeatable() {
        for base in ["http://a", "https://b:8443/", "http://c/d/e/"] {
            let target = ConnectionTarget::parse(base).unwrap();
            assert_eq!(target.endpoint(), target.endpoint());
            assert_eq!(
                ConnectionTarget::parse(base).unwrap().endpoint(),
                target.endpoint()
            );
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let target = ConnectionTarget::parse("https://host:1/x/").unwrap();
        assert_eq!(target.to_string(), "https://host:1/x");
        let again: ConnectionTarget = target.to_string().parse().unwrap();
        assert_eq!(again, target);
    }

    #[test]
    fn malformed_addresses_fail_fast() {
        for bad in [
            "",
            "localhost:5000",
            "ftp://host",
            "ws://host",
            "http://",
            "http://bad host",
            "http://host?x=1",
            "http://host/?",
            "http://host#frag",
            "http://host:notaport",
            "http://host:99999",
            "http://user:pw@host",
        ] {
            let err = ConnectionTarget::parse(bad).unwrap_err();
            assert!(
                matches!(err, SessionError::InvalidEndpoint(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn ports_and_ipv6_hosts_survive() {
        assert_eq!(endpoint("http://[::1]:5000/"), "ws://[::1]:5000/ws");
        assert_eq!(endpoint("https://host:8443/a/b"), "wss://host:8443/a/b/ws");
        // Default ports are normalized away.
        assert_eq!(endpoint("http://host:80"), "ws://host/ws");
    }
}
