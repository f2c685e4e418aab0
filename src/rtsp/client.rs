//! Client side of the session protocol, used by the sender output.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::rtsp::message::{read_response, write_request, Method, Request, Response, CSEQ};
use crate::{BridgeError, ProtocolError};

/// Protocol token sent with every request.
pub const PROTOCOL: &str = "RTSP/1.0";

/// A persistent connection to a speaker's protocol server.
///
/// Requests are strictly sequential: each call to [`send`](Self::send)
/// writes one request and waits for the response carrying the same `CSeq`,
/// at most `timeout` per exchange.
pub struct RtspClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local: SocketAddr,
    remote: SocketAddr,
    timeout: Duration,
    cseq: u32,
    session: Option<String>,
    verbose: bool,
}

impl RtspClient {
    /// Connects to `remote`, giving up after `timeout`.
    pub async fn connect(
        remote: SocketAddr,
        timeout: Duration,
        verbose: bool,
    ) -> Result<Self, BridgeError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(remote))
            .await
            .map_err(|_| BridgeError::backend("sender", format!("connect {remote}: timed out after {timeout:?}")))?
            .map_err(|e| BridgeError::backend("sender", format!("connect {remote}: {e}")))?;
        let local = stream
            .local_addr()
            .map_err(|e| BridgeError::backend("sender", e))?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            local,
            remote,
            timeout,
            cseq: 0,
            session: None,
            verbose,
        })
    }

    /// Our address on the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// The server's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Session id handed out by the server's `SETUP` response.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Builds a request for `target` with the client's protocol token.
    pub fn request(&self, method: Method, target: impl Into<String>) -> Request {
        Request::new(method, target, PROTOCOL)
    }

    /// Sends a request and waits for its response.
    ///
    /// Sets `CSeq` (and `Session` once known). Fails on a mismatched
    /// `CSeq`, a non-2xx status or no answer within the client's timeout.
    pub async fn send(&mut self, mut request: Request) -> Result<Response, ProtocolError> {
        self.cseq += 1;
        let cseq = self.cseq.to_string();
        request.headers.set(CSEQ, cseq.clone());
        if let Some(ref session) = self.session {
            if request.headers.get("Session").is_none() {
                request.headers.set("Session", session.clone());
            }
        }

        if self.verbose {
            tracing::info!(remote = %self.remote, "request:\n{}", String::from_utf8_lossy(&request.to_bytes()));
        }
        let timeout = self.timeout;
        let (writer, reader) = (&mut self.writer, &mut self.reader);
        let exchange = async {
            write_request(writer, &request).await?;
            read_response(reader).await
        };
        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => response?,
            Err(_) => {
                tracing::warn!(remote = %self.remote, method = %request.method, "no response within {timeout:?}");
                return Err(ProtocolError::Timeout(timeout));
            }
        };
        if self.verbose {
            tracing::info!(remote = %self.remote, "response:\n{}", String::from_utf8_lossy(&response.to_bytes()));
        }

        let got = response.headers.get(CSEQ);
        if got != Some(cseq.as_str()) {
            return Err(ProtocolError::CorrelationMismatch {
                expected: cseq,
                got: got.map(str::to_string),
            });
        }
        if !response.is_success() {
            return Err(ProtocolError::Status {
                code: response.code,
                reason: response.reason.clone(),
            });
        }

        if let Some(session) = response.headers.get("Session") {
            // "Session: 1234;timeout=60"
            let id = session.split(';').next().unwrap_or(session).trim();
            self.session = Some(id.to_string());
        }
        Ok(response)
    }
}
