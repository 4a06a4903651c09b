//! Transport abstraction for broker connections.
//!
//! The engine only depends on this trait: an ordered byte stream it can
//! write frames to, plus connect/close. Alternative transports plug in
//! without touching the engine.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod tcp;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Trait for broker connection transports.
///
/// Implementations must provide an ordered, reliable byte stream via
/// `AsyncRead`/`AsyncWrite`; the engine splits the stream into reader and
/// writer halves and performs its own framing.
#[async_trait]
pub trait Transport: AsyncRead + AsyncWrite + Send + Sync + Unpin {
    /// Connect to the given `host:port` address.
    async fn connect(addr: &str) -> Result<Self, TransportError>
    where
        Self: Sized;

    /// Gracefully close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Peer address as a string.
    fn peer_addr(&self) -> Result<String, TransportError>;

    /// Local address as a string.
    fn local_addr(&self) -> Result<String, TransportError>;

    /// Set TCP_NODELAY. No-op for transports without the concept.
    fn set_nodelay(&self, _nodelay: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Boxed transport for dynamic dispatch.
pub type BoxedTransport = Box<dyn Transport>;

pub use tcp::TcpTransport;
