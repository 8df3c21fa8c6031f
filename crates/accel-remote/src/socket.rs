//! # Socket Binding
//!
//! Framed request/response calls to an [`Agent`](crate::agent::Agent) over a
//! stream socket. Every call opens a fresh connection.
//!
//! ## Addresses
//!
//! | Form | Socket |
//! |------|--------|
//! | `unix:///run/accel.sock` | Unix domain |
//! | `tcp://127.0.0.1:2048` | TCP |
//! | `vsock://2:2048` | `AF_VSOCK` (Linux guests and hosts) |
//!
//! A vsock cid of `-1` or an empty cid means any context, for listening.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use accel_core::{AccelError, Arg, Id, PluginFlags, Result};
use tracing::{debug, warn};

use crate::protocol::{self, remote_error, Request, Response, WireFile};
use crate::transport::{write_back, ResourceSpec, Transport};

/// Any local context id, for listeners.
pub const VMADDR_CID_ANY: u32 = u32::MAX;
/// The local host, reachable without a hypervisor.
pub const VMADDR_CID_LOCAL: u32 = 1;

/// Parsed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Unix(PathBuf),
    Tcp(String),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for Address {
    type Err = AccelError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AccelError::InvalidArgument(format!("bad address {s:?}"));
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "unix" => Ok(Address::Unix(PathBuf::from(rest))),
            "tcp" => {
                if !rest.contains(':') {
                    return Err(invalid());
                }
                Ok(Address::Tcp(rest.to_string()))
            }
            "vsock" => {
                let (cid, port) = rest.split_once(':').ok_or_else(invalid)?;
                let cid = match cid {
                    "" | "-1" => VMADDR_CID_ANY,
                    cid => cid.parse().map_err(|_| invalid())?,
                };
                Ok(Address::Vsock {
                    cid,
                    port: port.parse().map_err(|_| invalid())?,
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "unix://{}", path.display()),
            Address::Tcp(host) => write!(f, "tcp://{host}"),
            Address::Vsock { cid, port } => write!(f, "vsock://{cid}:{port}"),
        }
    }
}

/// An open stream to the agent.
pub(crate) enum Connection {
    /// Unix domain and vsock sockets.
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Connection {
    pub(crate) fn open(address: &Address) -> io::Result<Self> {
        match address {
            Address::Unix(path) => UnixStream::connect(path).map(Connection::Unix),
            Address::Tcp(host) => TcpStream::connect(host.as_str()).map(Connection::Tcp),
            Address::Vsock { cid, port } => vsock::connect(*cid, *port).map(Connection::Unix),
        }
    }

    pub(crate) fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Connection::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            Connection::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Unix(s) => s.read(buf),
            Connection::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Unix(s) => s.write(buf),
            Connection::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Unix(s) => s.flush(),
            Connection::Tcp(s) => s.flush(),
        }
    }
}

#[cfg(target_os = "linux")]
pub(crate) mod vsock {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::os::unix::net::UnixStream;

    use nix::sys::socket::{
        accept4, bind, connect as connect_to, listen as listen_on, socket, AddressFamily,
        Backlog, SockFlag, SockType, VsockAddr,
    };

    fn stream() -> io::Result<OwnedFd> {
        Ok(socket(
            AddressFamily::Vsock,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?)
    }

    pub(crate) fn connect(cid: u32, port: u32) -> io::Result<UnixStream> {
        let fd = stream()?;
        connect_to(fd.as_raw_fd(), &VsockAddr::new(cid, port))?;
        // Stream I/O and timeouts work on any connected stream socket
        Ok(UnixStream::from(fd))
    }

    pub(crate) fn listen(cid: u32, port: u32) -> io::Result<OwnedFd> {
        let fd = stream()?;
        bind(fd.as_raw_fd(), &VsockAddr::new(cid, port))?;
        listen_on(&fd, Backlog::new(128)?)?;
        Ok(fd)
    }

    /// `UnixListener::accept` rejects peers outside `AF_UNIX`, so vsock
    /// connections are accepted here.
    pub(crate) fn accept(listener: &OwnedFd) -> io::Result<UnixStream> {
        let raw = accept4(listener.as_raw_fd(), SockFlag::SOCK_CLOEXEC)?;
        // SAFETY: `raw` was just returned by accept4 and nothing else owns it.
        Ok(UnixStream::from(unsafe { OwnedFd::from_raw_fd(raw) }))
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) mod vsock {
    use std::io;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "vsock needs Linux")
    }

    pub(crate) fn connect(_cid: u32, _port: u32) -> io::Result<UnixStream> {
        Err(unsupported())
    }

    pub(crate) fn listen(_cid: u32, _port: u32) -> io::Result<OwnedFd> {
        Err(unsupported())
    }

    pub(crate) fn accept(_listener: &OwnedFd) -> io::Result<UnixStream> {
        Err(unsupported())
    }
}

/// Socket transport. The address is parsed on every call, so a bad address
/// surfaces as `InvalidArgument` from the first operation.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    address: String,
    timeout: Duration,
}

impl SocketTransport {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        let address = address.into();
        if let Err(e) = address.parse::<Address>() {
            warn!("[Remote] {}", e);
        }
        Self { address, timeout }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// One request, one response, one connection.
    pub fn call(&self, request: &Request) -> Result<Response> {
        let address: Address = self.address.parse()?;
        let mut conn = Connection::open(&address)
            .map_err(|e| AccelError::ConnectionReset(format!("{address}: {e}")))?;
        conn.set_timeout(Some(self.timeout))
            .map_err(|e| AccelError::ConnectionReset(format!("{address}: {e}")))?;

        debug!("[Remote] {} -> {}", request.kind(), address);
        protocol::write_frame(&mut conn, request)?;
        let response: Response = protocol::read_frame(&mut conn)?;
        match response {
            Response::Error { code, message } => Err(remote_error(code, &message)),
            other => Ok(other),
        }
    }

    fn call_ok(&self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(request, &other)),
        }
    }

    fn call_id(&self, request: &Request) -> Result<Id> {
        match self.call(request)? {
            Response::Id(id) if id != 0 => Ok(id),
            other => Err(unexpected(request, &other)),
        }
    }

    fn call_args(&self, request: &Request, write: &mut [Arg]) -> Result<()> {
        match self.call(request)? {
            Response::Args(outputs) => write_back(write, protocol::from_wire(outputs)),
            other => Err(unexpected(request, &other)),
        }
    }
}

fn unexpected(request: &Request, response: &Response) -> AccelError {
    AccelError::Protocol(format!("unexpected reply to {}: {:?}", request.kind(), response))
}

impl Transport for SocketTransport {
    fn name(&self) -> &str {
        "socket"
    }

    fn session_create(&self, hint: PluginFlags) -> Result<Id> {
        self.call_id(&Request::SessionCreate { flags: hint.bits() })
    }

    fn session_update(&self, session: Id, hint: PluginFlags) -> Result<()> {
        self.call_ok(&Request::SessionUpdate {
            session,
            flags: hint.bits(),
        })
    }

    fn session_destroy(&self, session: Id) -> Result<()> {
        self.call_ok(&Request::SessionDestroy { session })
    }

    fn resource_create(&self, spec: &ResourceSpec) -> Result<Id> {
        self.call_id(&Request::ResourceCreate {
            rtype: spec.rtype as u32,
            files: spec.files.clone(),
            deps: spec.deps.clone(),
        })
    }

    fn resource_destroy(&self, resource: Id) -> Result<()> {
        self.call_ok(&Request::ResourceDestroy { resource })
    }

    fn resource_register(&self, resource: Id, session: Id) -> Result<()> {
        self.call_ok(&Request::ResourceRegister { resource, session })
    }

    fn resource_unregister(&self, resource: Id, session: Id) -> Result<()> {
        self.call_ok(&Request::ResourceUnregister { resource, session })
    }

    fn resource_sync(&self, resource: Id) -> Result<Vec<WireFile>> {
        let request = Request::ResourceSync { resource };
        match self.call(&request)? {
            Response::Files(files) => Ok(files),
            other => Err(unexpected(&request, &other)),
        }
    }

    fn do_op(&self, session: Id, read: &mut [Arg], write: &mut [Arg]) -> Result<()> {
        let request = Request::Genop {
            session,
            read: protocol::to_wire(read),
            write: protocol::to_wire(write),
        };
        self.call_args(&request, write)
    }

    fn exec(
        &self,
        session: Id,
        library: &str,
        symbol: &str,
        read: &[Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        let request = Request::Exec {
            session,
            library: library.to_string(),
            symbol: symbol.to_string(),
            read: protocol::to_wire(read),
            write: protocol::to_wire(write),
        };
        self.call_args(&request, write)
    }
}
