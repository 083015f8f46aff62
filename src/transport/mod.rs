//! Transports that carry envelopes between callers and the dispatcher
//!
//! `stdio` serves a single caller over a newline-delimited stream; `http`
//! parks many concurrent callers and correlates their responses by id.

pub mod http;
pub mod stdio;

use std::{fmt, str::FromStr};

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::mcp::rpc::{Request, Response};

pub use http::{HttpTransport, HttpTransportConfig};
pub use stdio::StdioTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        })
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            other => Err(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn start(&mut self) -> Result<(), TransportError>;

    /// Waits for the next request. `Ok(None)` means no further requests will
    /// arrive.
    async fn read_request(&mut self) -> Result<Option<Request>, TransportError>;

    async fn write_response(&mut self, response: Response) -> Result<(), TransportError>;

    async fn shutdown(&mut self) -> Result<(), TransportError>;
}
