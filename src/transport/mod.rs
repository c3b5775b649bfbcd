//! Stream transport underneath the publish/subscribe sockets.
//!
//! Supports:
//! - IPC: Unix domain sockets addressed as `ipc:///path/to/socket`
//! - TCP: network sockets addressed as `tcp://host:port`
//!
//! Every message travels as one length-delimited frame (4-byte big-endian
//! length, then the body). The transport never looks inside a body.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// Largest frame accepted on any connection.
pub const MAX_FRAME_LENGTH: usize = 10 * 1024 * 1024;

const IPC_SCHEME: &str = "ipc://";
const TCP_SCHEME: &str = "tcp://";

/// Read half of a framed connection.
pub type FrameReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, LengthDelimitedCodec>;
/// Write half of a framed connection.
pub type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LengthDelimitedCodec>;

/// Error returned when a URL has no supported scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported bus url '{0}' (expected ipc://<path> or tcp://<host>:<port>)")]
pub struct UrlError(pub String);

/// Endpoint address of a bus socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BusUrl {
    /// Unix domain socket at a filesystem path.
    Ipc(PathBuf),
    /// TCP address in `host:port` form.
    Tcp(String),
}

impl BusUrl {
    /// Transport name for structured logs.
    pub fn transport(&self) -> &'static str {
        match self {
            Self::Ipc(_) => "ipc",
            Self::Tcp(_) => "tcp",
        }
    }
}

impl FromStr for BusUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix(IPC_SCHEME) {
            if path.is_empty() {
                return Err(UrlError(s.to_string()));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix(TCP_SCHEME) {
            // Require host:port with a numeric port.
            let valid = addr
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(UrlError(s.to_string()));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        Err(UrlError(s.to_string()))
    }
}

impl fmt::Display for BusUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc(path) => write!(f, "{}{}", IPC_SCHEME, path.display()),
            Self::Tcp(addr) => write!(f, "{}{}", TCP_SCHEME, addr),
        }
    }
}

impl<'de> Deserialize<'de> for BusUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

fn framed<R, W>(read: R, write: W) -> (FrameReader, FrameWriter)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let read: Box<dyn AsyncRead + Send + Unpin> = Box::new(read);
    let write: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write);
    (FramedRead::new(read, codec()), FramedWrite::new(write, codec()))
}

/// Connect to `url` and return the framed halves.
///
/// Single attempt. Retrying is the caller's decision.
pub async fn connect(url: &BusUrl) -> io::Result<(FrameReader, FrameWriter)> {
    match url {
        BusUrl::Ipc(path) => {
            let stream = UnixStream::connect(path).await?;
            debug!(path = %path.display(), transport = "ipc", "Connected");
            let (read, write) = stream.into_split();
            Ok(framed(read, write))
        }
        BusUrl::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            debug!(address = %addr, transport = "tcp", "Connected");
            let (read, write) = stream.into_split();
            Ok(framed(read, write))
        }
    }
}

/// RAII guard for cleaning up IPC socket files.
pub struct SocketFileGuard {
    path: PathBuf,
}

impl SocketFileGuard {
    /// Create a new cleanup guard for the given socket path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up IPC socket"
                );
            } else {
                debug!(path = %self.path.display(), "Cleaned up IPC socket");
            }
        }
    }
}

/// Prepare an IPC socket path for binding.
///
/// - Creates parent directories if needed
/// - Removes stale socket file if exists
/// - Returns a cleanup guard that removes the socket on drop
pub fn prepare_ipc_socket(path: &Path) -> io::Result<SocketFileGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if path.exists() {
        info!(path = %path.display(), "Removing stale IPC socket");
        std::fs::remove_file(path)?;
    }

    Ok(SocketFileGuard::new(path))
}

/// Listening socket for either transport.
pub enum BusListener {
    Ipc {
        listener: UnixListener,
        guard: SocketFileGuard,
    },
    Tcp(TcpListener),
}

impl BusListener {
    /// Bind `url`, replacing any stale IPC socket file.
    pub async fn bind(url: &BusUrl) -> io::Result<Self> {
        match url {
            BusUrl::Ipc(path) => {
                let guard = prepare_ipc_socket(path)?;
                let listener = UnixListener::bind(path)?;
                info!(path = %path.display(), transport = "ipc", "Listening");
                Ok(Self::Ipc { listener, guard })
            }
            BusUrl::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                info!(address = %listener.local_addr()?, transport = "tcp", "Listening");
                Ok(Self::Tcp(listener))
            }
        }
    }

    /// Address actually bound (resolves TCP port 0).
    pub fn local_url(&self) -> io::Result<BusUrl> {
        match self {
            Self::Ipc { guard, .. } => Ok(BusUrl::Ipc(guard.path().to_path_buf())),
            Self::Tcp(listener) => Ok(BusUrl::Tcp(listener.local_addr()?.to_string())),
        }
    }

    /// Accept one connection, returning the framed halves and a peer label.
    pub async fn accept(&self) -> io::Result<(FrameReader, FrameWriter, String)> {
        match self {
            Self::Ipc { listener, guard } => {
                let (stream, _) = listener.accept().await?;
                let (read, write) = stream.into_split();
                let (reader, writer) = framed(read, write);
                Ok((reader, writer, guard.path().display().to_string()))
            }
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (read, write) = stream.into_split();
                let (reader, writer) = framed(read, write);
                Ok((reader, writer, peer.to_string()))
            }
        }
    }
}
