//! Transport seam between the session runner and the network.
//!
//! A transport is an ordered, reliable, message-oriented duplex channel. The
//! shipped implementation frames JSON messages one per line over TCP.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::error::TransportError;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Orderly shutdown. The runner stops without reconnecting.
    Normal,
    /// The connection broke. The runner reconnects with backoff.
    Abnormal,
}

/// One inbound item from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    Closed(CloseKind),
}

/// An open connection.
pub trait Transport: Send {
    fn send(&mut self, frame: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound item. Must be cancel-safe; the runner polls it inside `select!`.
    fn recv(&mut self) -> impl Future<Output = Inbound> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens fresh connections, once per (re)connect attempt.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// Connects to a relay speaking newline-delimited JSON over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub const fn new(addr: String) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> Result<TcpTransport, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.addr)))?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(TcpTransport {
            lines: BufReader::new(read).lines(),
            write,
        })
    }
}

/// TCP connection. A clean EOF from the relay counts as a normal close; a read
/// error counts as abnormal.
#[derive(Debug)]
pub struct TcpTransport {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Transport for TcpTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let mut line = frame.into_bytes();
        line.push(b'\n');
        self.write
            .write_all(&line)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Inbound {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => return Inbound::Frame(line),
                Ok(None) => return Inbound::Closed(CloseKind::Normal),
                Err(e) => {
                    debug!(error = %e, "Relay connection read failed");
                    return Inbound::Closed(CloseKind::Abnormal);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.shutdown().await {
            debug!(error = %e, "Error shutting down relay connection");
        }
    }
}
