//! # Agent
//!
//! Serves the socket binding against a local [`Runtime`]. Sessions and
//! resources created through the agent are tracked per agent, so a client
//! can only reach what it created. Generic exec-with-resource calls are
//! further limited to resources registered with the calling session.
//!
//! ## Server Model
//!
//! ```text
//! listener thread ──accept──► connection thread ──► Agent::handle ──► Runtime
//!        ▲                        (frames until EOF)
//!        └── stop(): clear flag, self-connect to wake accept, join
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::TcpListener;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use accel_core::{
    AccelError, Arg, BufferFile, Id, OpType, Persistence, PluginFlags, Resource, ResourceType,
    Result, Runtime, Session,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::protocol::{self, FrameError, Request, Response, WireFile};
use crate::socket::{vsock, Address, Connection, VMADDR_CID_ANY, VMADDR_CID_LOCAL};

/// Idle time after which a connection thread gives up on its client.
const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Request handler over a local runtime.
pub struct Agent {
    runtime: Arc<Runtime>,
    sessions: Mutex<HashMap<Id, Session>>,
    resources: Mutex<HashMap<Id, Resource>>,
}

impl Agent {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            sessions: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Answer one request. Failures become `Response::Error`.
    pub fn handle(&self, request: Request) -> Response {
        let kind = request.kind();
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                debug!("[Agent] {} failed: {}", kind, e);
                Response::from_error(&e)
            }
        }
    }

    fn session(&self, id: Id) -> Result<Session> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AccelError::NotFound(format!("session {id}")))
    }

    fn resource(&self, id: Id) -> Result<Resource> {
        self.resources
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AccelError::NotFound(format!("resource {id}")))
    }

    /// An exec-with-resource envelope may only name a resource this agent
    /// created and the session registered.
    fn check_genop_resource(&self, session: &Session, read: &[Arg]) -> Result<()> {
        let [tag, id, ..] = read else {
            return Ok(());
        };
        if tag.as_u32()? != OpType::ExecWithResource.as_u32() {
            return Ok(());
        }
        let resource = self.resource(id.as_u32()?)?;
        if !self.runtime.sessions().has_resource(session, &resource) {
            return Err(AccelError::PermissionDenied(format!(
                "resource {} is not registered with session {}",
                resource.id(),
                session.id()
            )));
        }
        Ok(())
    }

    fn dispatch(&self, request: Request) -> Result<Response> {
        let rt = &self.runtime;
        match request {
            Request::SessionCreate { flags } => {
                let session = rt.sessions().init(local_hint(flags))?;
                let id = session.id();
                self.sessions.lock().insert(id, session);
                Ok(Response::Id(id))
            }
            Request::SessionUpdate { session, flags } => {
                rt.sessions().update(&self.session(session)?, local_hint(flags))?;
                Ok(Response::Ok)
            }
            Request::SessionDestroy { session } => {
                let handle = self.session(session)?;
                self.sessions.lock().remove(&session);
                rt.sessions().release(&handle)?;
                Ok(Response::Ok)
            }
            Request::ResourceCreate { rtype, files, deps } => {
                let rtype = ResourceType::try_from(rtype)?;
                let deps = deps
                    .into_iter()
                    .map(|id| self.resource(id))
                    .collect::<Result<Vec<_>>>()?;
                let bufs = files
                    .into_iter()
                    .map(|f| BufferFile::new(f.name, f.data))
                    .collect();

                let resource = rt.resources().from_bufs(rtype, bufs, Persistence::Lazy)?;
                if let Err(e) = rt.resources().aggregate(&resource, &deps) {
                    if let Err(undo) = rt.resources().destroy(&resource) {
                        warn!("[Agent] Could not drop resource {}: {}", resource.id(), undo);
                    }
                    return Err(e);
                }
                let id = resource.id();
                self.resources.lock().insert(id, resource);
                Ok(Response::Id(id))
            }
            Request::ResourceDestroy { resource } => {
                let handle = self.resource(resource)?;
                rt.resources().destroy(&handle)?;
                self.resources.lock().remove(&resource);
                Ok(Response::Ok)
            }
            Request::ResourceRegister { resource, session } => {
                rt.sessions()
                    .register_resource(&self.session(session)?, &self.resource(resource)?)?;
                Ok(Response::Ok)
            }
            Request::ResourceUnregister { resource, session } => {
                rt.sessions()
                    .unregister_resource(&self.session(session)?, &self.resource(resource)?)?;
                Ok(Response::Ok)
            }
            Request::ResourceSync { resource } => {
                let handle = self.resource(resource)?;
                if !handle.paths().is_empty() {
                    handle.sync()?;
                }
                let files = handle
                    .files()
                    .into_iter()
                    .map(|f| WireFile {
                        name: f.name().to_string(),
                        data: f.data().map(|d| d.to_vec()).unwrap_or_default(),
                    })
                    .collect();
                Ok(Response::Files(files))
            }
            Request::Genop {
                session,
                read,
                write,
            } => {
                let handle = self.session(session)?;
                let mut read = protocol::from_wire(read);
                let mut write = protocol::from_wire(write);
                self.check_genop_resource(&handle, &read)?;
                rt.genop(&handle, &mut read, &mut write)?;
                Ok(Response::Args(protocol::to_wire(&write)))
            }
            Request::Exec {
                session,
                library,
                symbol,
                read,
                write,
            } => {
                let handle = self.session(session)?;
                let mut read = protocol::from_wire(read);
                let mut write = protocol::from_wire(write);
                rt.exec(&handle, &library, &symbol, &mut read, &mut write)?;
                Ok(Response::Args(protocol::to_wire(&write)))
            }
        }
    }

    /// Release every session and destroy every resource this agent created.
    pub fn close(&self) -> Result<()> {
        let mut first = Ok(());

        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(e) = self.runtime.sessions().release(&session) {
                warn!("[Agent] Could not release session {}: {}", session.id(), e);
                first = first.and(Err(e));
            }
        }

        // Dependents before their dependencies
        let mut pending: Vec<Resource> = self.resources.lock().drain().map(|(_, r)| r).collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut pinned = Vec::new();
            for resource in pending {
                match self.runtime.release_resource(&resource) {
                    Ok(()) => {}
                    Err(AccelError::Busy(_)) if resource.dependents() > 0 => pinned.push(resource),
                    Err(e) => {
                        warn!("[Agent] Could not destroy resource {}: {}", resource.id(), e);
                        first = first.and(Err(e));
                    }
                }
            }
            if pinned.len() == before {
                for resource in pinned {
                    warn!("[Agent] Resource {} is pinned by a foreign aggregate", resource.id());
                    first = first.and(Err(AccelError::Busy(format!(
                        "resource {} is still pinned",
                        resource.id()
                    ))));
                }
                break;
            }
            pending = pinned;
        }
        first
    }
}

/// Peer hints are meant for this runtime's local plugins.
fn local_hint(flags: u32) -> PluginFlags {
    PluginFlags::from_bits(flags).without(PluginFlags::REMOTE)
}

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
    Vsock(OwnedFd),
}

impl Listener {
    fn bind(address: &Address) -> Result<(Self, Address)> {
        match address {
            Address::Unix(path) => {
                let listener = UnixListener::bind(path)?;
                Ok((Listener::Unix(listener), address.clone()))
            }
            Address::Tcp(host) => {
                let listener = TcpListener::bind(host.as_str())?;
                let bound = Address::Tcp(listener.local_addr()?.to_string());
                Ok((Listener::Tcp(listener), bound))
            }
            Address::Vsock { cid, port } => {
                let listener = vsock::listen(*cid, *port)?;
                Ok((Listener::Vsock(listener), address.clone()))
            }
        }
    }

    fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Unix(l) => l.accept().map(|(s, _)| Connection::Unix(s)),
            Listener::Tcp(l) => l.accept().map(|(s, _)| Connection::Tcp(s)),
            Listener::Vsock(l) => vsock::accept(l).map(Connection::Unix),
        }
    }
}

/// Where to connect to wake a listener bound at `address`.
fn wake_address(address: &Address) -> Address {
    match address {
        Address::Vsock { cid, port } if *cid == VMADDR_CID_ANY => Address::Vsock {
            cid: VMADDR_CID_LOCAL,
            port: *port,
        },
        other => other.clone(),
    }
}

/// Background server for an [`Agent`].
pub struct AgentServer {
    agent: Arc<Agent>,
    address: Address,
    running: Arc<AtomicBool>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentServer {
    /// Bind `address` and start accepting in a background thread.
    pub fn start(agent: Arc<Agent>, address: &Address) -> Result<Self> {
        let (listener, bound) = Listener::bind(address)?;
        let running = Arc::new(AtomicBool::new(true));
        info!("[Agent] Listening on {}", bound);

        let handle = {
            let agent = Arc::clone(&agent);
            let running = Arc::clone(&running);
            thread::spawn(move || accept_loop(listener, agent, running))
        };

        Ok(Self {
            agent,
            address: bound,
            running,
            listener_handle: Mutex::new(Some(handle)),
        })
    }

    /// Bound address. For `tcp://host:0` this carries the chosen port.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting and wait for the listener thread. In-flight
    /// connections finish on their own threads.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake accept()
        let woken = Connection::open(&wake_address(&self.address));

        if let Some(handle) = self.listener_handle.lock().take() {
            match woken {
                Ok(_) => {
                    if handle.join().is_err() {
                        error!("[Agent] Listener thread panicked");
                    }
                }
                Err(e) => warn!(
                    "[Agent] Could not wake listener on {}: {}; leaving it detached",
                    self.address, e
                ),
            }
        }
        if let Address::Unix(path) = &self.address {
            let _ = fs::remove_file(path);
        }
        info!("[Agent] Stopped listening on {}", self.address);
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: Listener, agent: Arc<Agent>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok(conn) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let agent = Arc::clone(&agent);
                thread::spawn(move || {
                    if let Err(e) = serve_connection(conn, &agent) {
                        warn!("[Agent] Client error: {}", e);
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("[Agent] Accept error: {}", e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
}

fn serve_connection(mut conn: Connection, agent: &Agent) -> std::result::Result<(), FrameError> {
    conn.set_timeout(Some(CONNECTION_IDLE_TIMEOUT))?;
    loop {
        let request: Request = match protocol::read_frame(&mut conn) {
            Ok(request) => request,
            Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = agent.handle(request);
        protocol::write_frame(&mut conn, &response)?;
    }
}

/// Socket path helper for tests and local deployments.
pub fn unix_address(path: impl Into<PathBuf>) -> Address {
    Address::Unix(path.into())
}
