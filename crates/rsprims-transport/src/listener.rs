#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::RsStream;

/// Listens for and accepts byte-stream connections on an [`Endpoint`].
///
/// Unix domain socket paths are created with mode `0600`, stale sockets are
/// removed before binding, and the socket file is cleaned up on `Drop` as long
/// as it is still the one this listener created.
pub struct RsListener {
    inner: ListenerInner,
    endpoint: Endpoint,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
        created_inode: Option<(u64, u64)>,
    },
}

impl RsListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on an endpoint.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await.map_err(|source| {
                    TransportError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                // Resolve port 0 to the port actually bound.
                let local = listener.local_addr()?;
                let endpoint = Endpoint::Tcp(local.to_string());
                info!(%endpoint, "listening on tcp");
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                    endpoint,
                })
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Self::bind_unix(path, Self::DEFAULT_SOCKET_MODE),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::UnsupportedScheme("unix".to_string())),
        }
    }

    #[cfg(unix)]
    fn bind_unix(path: &Path, mode: u32) -> Result<Self> {
        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let path = path.to_path_buf();
        let bind_err = |source: std::io::Error| TransportError::Bind {
            endpoint: format!("unix://{}", path.display()),
            source,
        };

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            } else {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = tokio::net::UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            endpoint: Endpoint::Unix(path.clone()),
            inner: ListenerInner::Unix {
                listener,
                path,
                created_inode: Some((created.dev(), created.ino())),
            },
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<RsStream> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(TransportError::Accept)?;
                stream.set_nodelay(true)?;
                debug!(%addr, "accepted tcp connection");
                Ok(RsStream::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerInner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!("accepted unix connection");
                Ok(RsStream::from_unix(stream))
            }
        }
    }

    /// The endpoint this listener is bound to (TCP port 0 resolved).
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl RsListener {
    #[cfg(unix)]
    fn cleanup_socket_file(&self) {
        let ListenerInner::Unix {
            path,
            created_inode: Some((expected_dev, expected_ino)),
            ..
        } = &self.inner
        else {
            return;
        };

        if let Ok(metadata) = std::fs::symlink_metadata(path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == *expected_dev
                && metadata.ino() == *expected_ino
            {
                debug!(?path, "cleaning up socket file");
                let _ = std::fs::remove_file(path);
            } else {
                debug!(?path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

impl Drop for RsListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.cleanup_socket_file();
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::stream::connect;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rsprims-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tcp_bind_accept_connect() {
        let listener = RsListener::bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let endpoint = listener.endpoint().clone();
        assert!(matches!(&endpoint, Endpoint::Tcp(addr) if !addr.ends_with(":0")));

        let client = tokio::spawn(async move {
            let mut stream = connect(&endpoint).await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(server.transport_name(), "tcp");

        client.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_accept_connect_and_cleanup() {
        let dir = temp_dir("uds");
        let sock_path = dir.join("test.sock");
        let endpoint = Endpoint::Unix(sock_path.clone());

        let listener = RsListener::bind(&endpoint).await.unwrap();
        assert!(sock_path.exists());
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let client_endpoint = endpoint.clone();
        let client = tokio::spawn(async move {
            let mut stream = connect(&client_endpoint).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = RsListener::bind(&Endpoint::Unix(PathBuf::from(long_path))).await;
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("uds-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = RsListener::bind(&Endpoint::Unix(sock_path.clone())).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn connect_refused_is_reported() {
        let listener = RsListener::bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let endpoint = listener.endpoint().clone();
        drop(listener);

        let err = connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
