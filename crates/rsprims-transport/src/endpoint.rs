use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// A transport address a connection can be opened on.
///
/// Accepted forms:
/// - `tcp://host:port` (any trailing path is ignored)
/// - `unix:///absolute/path.sock` or `unix:relative.sock`
///
/// `ws://` and `wss://` are recognized but rejected with
/// [`TransportError::UnsupportedScheme`]: message transports are adapted by the
/// caller and handed to the connection layer directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once("://")
            .or_else(|| input.split_once(':'))
            .ok_or_else(|| TransportError::InvalidEndpoint {
                input: input.to_string(),
                reason: "missing scheme (expected tcp:// or unix://)".to_string(),
            })?;

        match scheme {
            "tcp" => parse_tcp(input, rest),
            "unix" => {
                if rest.is_empty() {
                    return Err(TransportError::InvalidEndpoint {
                        input: input.to_string(),
                        reason: "empty socket path".to_string(),
                    });
                }
                Ok(Self::Unix(PathBuf::from(rest)))
            }
            "ws" | "wss" => Err(TransportError::UnsupportedScheme(scheme.to_string())),
            other => Err(TransportError::InvalidEndpoint {
                input: input.to_string(),
                reason: format!("unknown scheme '{other}'"),
            }),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Unix(_) => "unix-domain-socket",
        }
    }
}

fn parse_tcp(input: &str, rest: &str) -> Result<Endpoint> {
    let authority = rest.split('/').next().unwrap_or_default();
    let invalid = |reason: &str| TransportError::InvalidEndpoint {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    port.parse::<u16>().map_err(|_| invalid("port is not a number in 0..=65535"))?;

    Ok(Endpoint::Tcp(authority.to_string()))
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_endpoint() {
        let endpoint = Endpoint::parse("tcp://localhost:1337").unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("localhost:1337".to_string()));
        assert_eq!(endpoint.to_string(), "tcp://localhost:1337");
    }

    #[test]
    fn tcp_trailing_path_is_ignored() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:9000/bench").unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:9000".to_string()));
    }

    #[test]
    fn parses_unix_endpoint() {
        let endpoint = Endpoint::parse("unix:///tmp/rs.sock").unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/tmp/rs.sock")));

        let relative: Endpoint = "unix:rs.sock".parse().unwrap();
        assert_eq!(relative, Endpoint::Unix(PathBuf::from("rs.sock")));
    }

    #[test]
    fn rejects_missing_port() {
        let err = Endpoint::parse("tcp://localhost").unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));

        let err = Endpoint::parse("tcp://localhost:http").unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
    }

    #[test]
    fn websocket_scheme_is_unsupported() {
        let err = Endpoint::parse("ws://localhost:1337").unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedScheme(s) if s == "ws"));
    }

    #[test]
    fn rejects_unknown_or_missing_scheme() {
        assert!(matches!(
            Endpoint::parse("udp://localhost:1"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            Endpoint::parse("localhost"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }
}
