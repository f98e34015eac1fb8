//! Listening socket creation.
//!
//! # Responsibilities
//! - Resolve and bind a `host:port` pair, or a unix-domain socket path
//! - Prepare externally supplied sockets for async use
//!
//! # Design Decisions
//! - Sockets are plain `std` listeners so a server can clone them for every
//!   serve attempt and keep the binding across restarts
//! - `SO_REUSEADDR` so a restarted process can rebind while old
//!   connections sit in `TIME_WAIT`

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::Path;
use std::path::PathBuf;

use socket2::{Domain, Protocol, Type};

use crate::error::{Error, Result};

const BACKLOG: i32 = 1024;

/// A bound listening socket owned by one server.
#[derive(Debug)]
pub enum Socket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Socket {
    /// Duplicate the handle for one serve attempt; the binding is shared.
    pub fn try_clone(&self) -> io::Result<Socket> {
        match self {
            Socket::Tcp(listener) => listener.try_clone().map(Socket::Tcp),
            #[cfg(unix)]
            Socket::Unix(listener) => listener.try_clone().map(Socket::Unix),
        }
    }

    pub fn address(&self) -> io::Result<Address> {
        match self {
            Socket::Tcp(listener) => listener.local_addr().map(Address::Tcp),
            #[cfg(unix)]
            Socket::Unix(listener) => {
                let addr = listener.local_addr()?;
                Ok(Address::Unix(addr.as_pathname().map(Path::to_path_buf).unwrap_or_default()))
            }
        }
    }
}

/// Where a server can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl Address {
    pub fn tcp(&self) -> Option<SocketAddr> {
        match self {
            Address::Tcp(addr) => Some(*addr),
            Address::Unix(_) => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "{addr}"),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Bind a listening socket on `host:port`. An empty host binds all IPv4
/// interfaces; port 0 picks an ephemeral port.
pub fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let address = join_host_port(host, port);
    let addr = resolve(&address)?;

    let bind_error = |source| Error::Bind {
        address: address.clone(),
        source,
    };
    let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(BACKLOG).map_err(bind_error)?;

    let listener: TcpListener = socket.into();
    tracing::debug!(address = %address, local = ?listener.local_addr().ok(), "Socket bound");
    Ok(listener)
}

/// Bind a unix-domain stream socket at `path`. A socket file left behind
/// by an earlier process is removed first; any other file is an error.
#[cfg(unix)]
pub fn bind_unix(path: &Path) -> Result<UnixListener> {
    use std::os::unix::fs::FileTypeExt;

    let bind_error = |source| Error::Bind {
        address: format!("unix:{}", path.display()),
        source,
    };
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if !meta.file_type().is_socket() {
            return Err(bind_error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a socket",
            )));
        }
        std::fs::remove_file(path).map_err(bind_error)?;
    }

    let addr = socket2::SockAddr::unix(path).map_err(bind_error)?;
    let socket = socket2::Socket::new(Domain::UNIX, Type::STREAM, None).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr).map_err(bind_error)?;
    socket.listen(BACKLOG).map_err(bind_error)?;

    tracing::debug!(path = %path.display(), "Unix socket bound");
    Ok(socket.into())
}

/// Make an externally supplied socket usable by the async accept loops.
pub fn adopt(listener: TcpListener) -> Result<TcpListener> {
    listener.set_nonblocking(true).map_err(|source| Error::Bind {
        address: listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string()),
        source,
    })?;
    Ok(listener)
}

pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    match host {
        "" => format!("0.0.0.0:{port}"),
        h if h.contains(':') && !h.starts_with('[') => format!("[{h}]:{port}"),
        h => format!("{h}:{port}"),
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    let bind_error = |source| Error::Bind {
        address: address.to_string(),
        source,
    };
    address
        .to_socket_addrs()
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address resolved to nothing",
            ))
        })
}
