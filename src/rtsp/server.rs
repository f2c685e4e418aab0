//! Connection-accepting request/response server.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::rtsp::message::{read_request, write_response, Method, Request, Response, CSEQ};
use crate::{netif, BridgeError, ProtocolError};

/// Per-connection state, owned by the connection's task.
#[derive(Debug, Clone)]
pub struct ProtocolSession {
    /// Unique for the lifetime of the server.
    pub id: u64,
    /// Our end of the connection.
    pub local: SocketAddr,
    /// The peer.
    pub remote: SocketAddr,
    /// Protocol/version token of the last request.
    pub protocol: Option<String>,
    /// Correlation header of the last request.
    pub last_cseq: Option<String>,
    /// Requests read so far, including the current one.
    pub request_count: u64,
}

/// Handles one method.
///
/// The response passed in already echoes the request's protocol token and
/// `CSeq` with a `200 OK` status; handlers only add what is specific to
/// their method.
///
/// Plain closures implement this trait:
///
/// ```
/// use stream_bridge::rtsp::{Method, ProtocolServer, Request, Response, ProtocolSession};
///
/// let mut server = ProtocolServer::new(5000);
/// server.add_handler(Method::Options, |_: &Request, res: &mut Response, _: &ProtocolSession| {
///     res.headers.set("Public", "OPTIONS");
/// });
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Fills in `response` for `request`.
    async fn handle(&self, request: &Request, response: &mut Response, session: &ProtocolSession);
}

#[async_trait]
impl<F> RequestHandler for F
where
    F: Fn(&Request, &mut Response, &ProtocolSession) + Send + Sync,
{
    async fn handle(&self, request: &Request, response: &mut Response, session: &ProtocolSession) {
        self(request, response, session);
    }
}

/// Called once when a connection closes, for whatever reason.
pub type CloseCallback = Arc<dyn Fn(&ProtocolSession) + Send + Sync>;

type HandlerMap = HashMap<Method, Arc<dyn RequestHandler>>;

/// Live view of the peers connected to a running server.
#[derive(Debug, Clone, Default)]
pub struct ConnectedClients(Arc<Mutex<HashMap<u64, SocketAddr>>>);

impl ConnectedClients {
    /// Remote addresses of open connections, sorted.
    pub fn list(&self) -> Vec<SocketAddr> {
        let mut clients: Vec<_> = self.0.lock().values().copied().collect();
        clients.sort();
        clients
    }

    fn insert(&self, id: u64, remote: SocketAddr) {
        self.0.lock().insert(id, remote);
    }

    fn remove(&self, id: u64) {
        self.0.lock().remove(&id);
    }
}

/// A request/response server bound to one TCP port.
///
/// Handlers are registered before [`start`](Self::start); each accepted
/// connection then runs on its own task so a stalled client never blocks
/// another.
pub struct ProtocolServer {
    port: u16,
    bind_address: Option<IpAddr>,
    handlers: HandlerMap,
    on_close: Option<CloseCallback>,
}

impl ProtocolServer {
    /// Creates a server for `port`. Port 0 picks a free port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bind_address: None,
            handlers: HashMap::new(),
            on_close: None,
        }
    }

    /// Binds to `ip` instead of the outbound interface address.
    pub fn with_bind_address(mut self, ip: IpAddr) -> Self {
        self.bind_address = Some(ip);
        self
    }

    /// Registers the handler for `method`, replacing any previous one.
    pub fn add_handler<H>(&mut self, method: Method, handler: H)
    where
        H: RequestHandler + 'static,
    {
        if self.handlers.insert(method.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(%method, "handler replaced");
        }
    }

    /// Sets a callback invoked when a connection closes.
    pub fn on_close<F>(&mut self, callback: F)
    where
        F: Fn(&ProtocolSession) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns a backend error if no usable local address can be found or
    /// the port cannot be bound.
    pub async fn start(self, verbose: bool) -> Result<RunningServer, BridgeError> {
        let ip = match self.bind_address {
            Some(ip) => ip,
            None => netif::outbound_ip().inspect_err(|e| {
                tracing::error!("protocol server not started: {e}");
            })?,
        };

        let listener = TcpListener::bind((ip, self.port))
            .await
            .map_err(|e| BridgeError::backend("protocol server", format!("bind {ip}:{}: {e}", self.port)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::backend("protocol server", e))?;
        tracing::info!(%local_addr, "protocol server listening");

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let clients = ConnectedClients::default();

        let acceptor = Acceptor {
            listener,
            handlers: Arc::new(self.handlers),
            on_close: self.on_close,
            clients: clients.clone(),
            tracker: tracker.clone(),
            cancel: cancel.clone(),
            next_id: AtomicU64::new(1),
            verbose,
        };
        let accept_task = tokio::spawn(acceptor.run());

        Ok(RunningServer {
            local_addr,
            cancel,
            accept_task,
            tracker,
            clients,
        })
    }
}

/// Handle to a started [`ProtocolServer`].
pub struct RunningServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    tracker: TaskTracker,
    clients: ConnectedClients,
}

impl RunningServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote addresses of open connections.
    pub fn clients(&self) -> Vec<SocketAddr> {
        self.clients.list()
    }

    /// A handle that keeps reporting connected peers while the server runs.
    pub fn connected_clients(&self) -> ConnectedClients {
        self.clients.clone()
    }

    /// Stops accepting, lets in-flight requests finish, and waits for every
    /// connection task to exit.
    ///
    /// Idle connections are closed. The listener socket is released before
    /// this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.accept_task.await {
            tracing::error!("accept loop failed: {e}");
        }
        tracing::debug!(addr = %self.local_addr, "listener released");

        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(addr = %self.local_addr, "protocol server stopped");
    }
}

struct Acceptor {
    listener: TcpListener,
    handlers: Arc<HandlerMap>,
    on_close: Option<CloseCallback>,
    clients: ConnectedClients,
    tracker: TaskTracker,
    cancel: CancellationToken,
    next_id: AtomicU64,
    verbose: bool,
}

impl Acceptor {
    async fn run(self) {
        loop {
            let accepted = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, remote) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                }
            };
            let local = match stream.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!(%remote, "dropping connection: {e}");
                    continue;
                }
            };

            let session = ProtocolSession {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                local,
                remote,
                protocol: None,
                last_cseq: None,
                request_count: 0,
            };
            self.clients.insert(session.id, remote);
            tracing::info!(%remote, session = session.id, "connection accepted");

            let connection = Connection {
                session,
                handlers: self.handlers.clone(),
                cancel: self.cancel.child_token(),
                verbose: self.verbose,
            };
            let clients = self.clients.clone();
            let on_close = self.on_close.clone();
            self.tracker.spawn(async move {
                let session = connection.run(stream).await;
                clients.remove(session.id);
                if let Some(callback) = on_close {
                    callback(&session);
                }
            });
        }
    }
}

struct Connection {
    session: ProtocolSession,
    handlers: Arc<HandlerMap>,
    cancel: CancellationToken,
    verbose: bool,
}

impl Connection {
    fn dump(&self, what: &str, wire: &[u8]) {
        let text = String::from_utf8_lossy(wire);
        if self.verbose {
            tracing::info!(remote = %self.session.remote, "{what}:\n{text}");
        } else {
            tracing::trace!(remote = %self.session.remote, "{what}:\n{text}");
        }
    }

    /// Serves requests until the peer leaves, a request is malformed, or
    /// the server stops. Returns the final session state.
    async fn run(mut self, stream: TcpStream) -> ProtocolSession {
        let remote = self.session.remote;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let request = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                request = read_request(&mut reader) => request,
            };

            let request = match request {
                Ok(request) => request,
                Err(ProtocolError::Eof) => {
                    tracing::debug!(%remote, "peer closed connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(%remote, "closing connection: {e}");
                    break;
                }
            };

            self.session.request_count += 1;
            self.session.protocol = Some(request.protocol.clone());
            self.session.last_cseq = request.cseq().map(str::to_string);
            self.dump("request", &request.to_bytes());

            let Some(handler) = self.handlers.get(&request.method).cloned() else {
                tracing::warn!(%remote, method = %request.method, "no handler registered, ignoring");
                continue;
            };

            let mut response = Response::for_request(&request);
            handler.handle(&request, &mut response, &self.session).await;
            if let Some(cseq) = request.cseq() {
                response.headers.set(CSEQ, cseq);
            }

            let wire = response.to_bytes();
            self.dump("response", &wire);
            if let Err(e) = write_response(&mut write_half, &response).await {
                tracing::warn!(%remote, "write failed: {e}");
                break;
            }
        }

        tracing::info!(%remote, requests = self.session.request_count, "connection closed");
        self.session
    }
}
