//! Session protocol used by the receiver input and the sender output.
//!
//! A textual, line-and-header based request/response protocol carried on
//! one persistent TCP connection per peer. The server side dispatches each
//! request to the handler registered for its method; the client side is a
//! strictly sequential request/response pipe.

mod client;
pub mod message;
mod sdp;
mod server;

pub use client::{RtspClient, PROTOCOL};
pub use message::{Headers, Method, Request, Response, CSEQ};
pub use sdp::{Encoding, StreamFormat};
pub use server::{
    CloseCallback, ConnectedClients, ProtocolServer, ProtocolSession, RequestHandler, RunningServer,
};
