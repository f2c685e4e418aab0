//! Textual request/response messages and their wire codec.
//!
//! ```text
//! METHOD <target> <protocol>/<version>\r\n
//! Key: Value\r\n
//! ...
//! \r\n
//! <body of Content-Length bytes>
//! ```
//!
//! Header keys are case-sensitive and keep their wire order.

use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;

/// Header carrying the per-connection sequence number.
pub const CSEQ: &str = "CSeq";

/// Header carrying the body length.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Upper bound on the request/status line plus headers.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a message body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Ordered header map with case-sensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value for `key`, or appends it if absent.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Appends without checking for an existing key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Removes every value for `key`, returning the first.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let first = self.get(key).map(str::to_string);
        self.entries.retain(|(k, _)| k != key);
        first
    }

    /// Iterates in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn content_length(&self) -> Result<usize, ProtocolError> {
        match self.get(CONTENT_LENGTH) {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string())),
        }
    }
}

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Method {
    Options,
    Announce,
    Setup,
    Record,
    Play,
    Pause,
    Flush,
    Teardown,
    GetParameter,
    SetParameter,
    Post,
    Get,
    /// Any other token.
    Other(String),
}

impl Method {
    /// The wire token.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Flush => "FLUSH",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
            Self::Post => "POST",
            Self::Get => "GET",
            Self::Other(token) => token,
        }
    }
}

impl From<&str> for Method {
    fn from(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "ANNOUNCE" => Self::Announce,
            "SETUP" => Self::Setup,
            "RECORD" => Self::Record,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "FLUSH" => Self::Flush,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            "SET_PARAMETER" => Self::SetParameter,
            "POST" => Self::Post,
            "GET" => Self::Get,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound or outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Request target, usually a URL or `*`.
    pub target: String,
    /// Protocol/version token, e.g. `RTSP/1.0`.
    pub protocol: String,
    /// Header lines in wire order.
    pub headers: Headers,
    /// Body, possibly empty.
    pub body: Bytes,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, target: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            protocol: protocol.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// The correlation header, if present.
    pub fn cseq(&self) -> Option<&str> {
        self.headers.get(CSEQ)
    }

    /// Serializes to the wire format. Sets `Content-Length` when there is a body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!("{} {} {}\r\n", self.method, self.target, self.protocol);
        encode(head, &self.headers, &self.body)
    }
}

/// A response to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Protocol/version token, echoed from the request.
    pub protocol: String,
    /// Status code.
    pub code: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header lines in wire order.
    pub headers: Headers,
    /// Body, possibly empty.
    pub body: Bytes,
}

impl Response {
    /// `200 OK` echoing the request's protocol token and `CSeq`.
    pub fn for_request(request: &Request) -> Self {
        let mut headers = Headers::new();
        if let Some(cseq) = request.cseq() {
            headers.set(CSEQ, cseq);
        }
        Self {
            protocol: request.protocol.clone(),
            code: 200,
            reason: "OK".to_string(),
            headers,
            body: Bytes::new(),
        }
    }

    /// Sets the status line.
    pub fn set_status(&mut self, code: u16, reason: impl Into<String>) {
        self.code = code;
        self.reason = reason.into();
    }

    /// Returns `true` for 2xx codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Serializes to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!("{} {} {}\r\n", self.protocol, self.code, self.reason);
        encode(head, &self.headers, &self.body)
    }
}

/// `Content-Length` always matches the body. It is written for a
/// non-empty body, or for an empty one when the caller set the header.
fn encode(mut head: String, headers: &Headers, body: &[u8]) -> Vec<u8> {
    let explicit_length = headers.get(CONTENT_LENGTH).is_some();
    for (key, value) in headers.iter() {
        if key == CONTENT_LENGTH {
            continue;
        }
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !body.is_empty() || explicit_length {
        head.push_str(&format!("{CONTENT_LENGTH}: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Reads one line without its terminator, enforcing the head budget.
async fn read_line<R>(reader: &mut R, budget: &mut usize) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let read = (&mut *reader)
        .take(*budget as u64 + 1)
        .read_until(b'\n', &mut raw)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if read > *budget {
        return Err(ProtocolError::TooLarge {
            size: read,
            limit: MAX_HEAD_BYTES,
        });
    }
    *budget -= read;

    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

/// Reads the first non-blank line plus the header block.
async fn read_head<R>(reader: &mut R) -> Result<(String, Headers), ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;

    let first = loop {
        match read_line(reader, &mut budget).await? {
            None => return Err(ProtocolError::Eof),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut headers = Headers::new();
    loop {
        let line = read_line(reader, &mut budget)
            .await?
            .ok_or(ProtocolError::Eof)?;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.clone()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProtocolError::MalformedHeader(line.clone()));
        }
        headers.append(key, value.trim());
    }
    Ok((first, headers))
}

async fn read_body<R>(reader: &mut R, headers: &Headers) -> Result<Bytes, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let length = headers.content_length()?;
    if length > MAX_BODY_BYTES {
        return Err(ProtocolError::TooLarge {
            size: length,
            limit: MAX_BODY_BYTES,
        });
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Eof
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Bytes::from(body))
}

fn is_protocol_token(token: &str) -> bool {
    token
        .split_once('/')
        .is_some_and(|(name, version)| !name.is_empty() && !version.is_empty())
}

/// Reads one request.
///
/// Leading blank lines are skipped. A clean close before the first byte
/// yields [`ProtocolError::Eof`].
pub async fn read_request<R>(reader: &mut R) -> Result<Request, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let (line, headers) = read_head(reader).await?;

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(protocol), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::MalformedRequestLine(line));
    };
    if !is_protocol_token(protocol) {
        return Err(ProtocolError::MalformedRequestLine(line));
    }
    let method = Method::from(method);
    let target = target.to_string();
    let protocol = protocol.to_string();

    let body = read_body(reader, &headers).await?;
    Ok(Request {
        method,
        target,
        protocol,
        headers,
        body,
    })
}

/// Reads one response.
pub async fn read_response<R>(reader: &mut R) -> Result<Response, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let (line, headers) = read_head(reader).await?;

    let mut parts = line.splitn(3, ' ');
    let protocol = parts.next().unwrap_or_default();
    let code = parts.next().and_then(|c| c.parse::<u16>().ok());
    let reason = parts.next().unwrap_or_default();
    let Some(code) = code.filter(|_| is_protocol_token(protocol)) else {
        return Err(ProtocolError::MalformedStatusLine(line));
    };
    let protocol = protocol.to_string();
    let reason = reason.to_string();

    let body = read_body(reader, &headers).await?;
    Ok(Response {
        protocol,
        code,
        reason,
        headers,
        body,
    })
}

/// Writes a request and flushes.
pub async fn write_request<W>(writer: &mut W, request: &Request) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&request.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes a response and flushes.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&response.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
