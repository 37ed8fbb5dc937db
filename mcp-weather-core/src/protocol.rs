//! Line-delimited JSON tool protocol spoken between the worker process and
//! its caller over a byte stream.
//!
//! The server writes one readiness line, then answers each request with
//! exactly one response before reading the next, so at most one request is
//! ever in flight.

pub mod client;
pub mod message;
pub mod server;
pub mod transport;

pub use client::{ServerProcess, ToolClient};
pub use message::{
    ArgumentDescriptor, ErrorEnvelope, ReadyLine, RequestId, ToolCall, ToolDescriptor,
    ToolRequest, ToolResponse,
};
pub use server::{ServerError, ToolServer, serve_stdio};
pub use transport::{JsonlTransport, TransportError};
