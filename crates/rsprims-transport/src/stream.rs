use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A connected duplex byte stream implementing `AsyncRead + AsyncWrite`.
///
/// This is the fundamental I/O type returned by transport operations. Bytes are
/// delivered undelimited; frame boundaries are recovered by the layer above.
pub struct RsStream {
    inner: RsStreamInner,
}

enum RsStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

/// Connect to a listening endpoint.
pub async fn connect(endpoint: &Endpoint) -> Result<RsStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await.map_err(|source| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            stream.set_nodelay(true)?;
            debug!(%endpoint, "connected over tcp");
            Ok(RsStream::from_tcp(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await.map_err(|source| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            debug!(?path, "connected to unix domain socket");
            Ok(RsStream::from_unix(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(TransportError::UnsupportedScheme("unix".to_string())),
    }
}

impl RsStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: RsStreamInner::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: RsStreamInner::Unix(stream),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            RsStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            RsStreamInner::Unix(_) => "unix-domain-socket",
        }
    }

    /// Human-readable description of the remote side.
    pub fn peer_description(&self) -> String {
        match &self.inner {
            RsStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:<unknown>".to_string()),
            #[cfg(unix)]
            RsStreamInner::Unix(stream) => match stream.peer_cred() {
                Ok(cred) => format!(
                    "uid={} gid={} pid={}",
                    cred.uid(),
                    cred.gid(),
                    cred.pid().map_or_else(|| "?".to_string(), |p| p.to_string())
                ),
                Err(_) => "unix:<unknown>".to_string(),
            },
        }
    }
}

impl AsyncRead for RsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RsStreamInner::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            RsStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            RsStreamInner::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            RsStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RsStreamInner::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            RsStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RsStreamInner::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            RsStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for RsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
