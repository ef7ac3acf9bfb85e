//! Tunnel client for connecting a session to the relay.
//!
//! Provides the transport seam, a TCP transport, and the reconnecting runner
//! that owns one fresh session per connection.

pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use client::{ClientEvent, ClientHandle, ClientIo, TunnelClient, client_channels};
pub use config::{ReconnectPolicy, TunnelConfig};
pub use error::{TransportError, TunnelClientError};
pub use transport::{CloseKind, Connector, Inbound, TcpConnector, TcpTransport, Transport};
