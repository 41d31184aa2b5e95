//! Multi-hub real-time connection manager.
//!
//! Keeps at most one SignalR connection per configured hub, retries the
//! initial connect with exponential backoff, routes server pushes to
//! registered event handlers and invokes hub methods.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod handlers;
pub mod manager;
pub(crate) mod negotiate;
pub(crate) mod reconnection;
pub mod registry;
pub(crate) mod retry;
pub(crate) mod session;
pub(crate) mod transport;
pub mod types;

pub(crate) mod pumps {
    pub(crate) mod ping;
    pub(crate) mod read;
    pub(crate) mod write;
}

#[cfg(test)]
pub(crate) mod testing;

pub use client::{HubClient, SignalRConnector};
pub use config::HubConfig;
pub use connection::{ConnectOptions, Connector, HubConnection};
pub use error::{ClientError, HubError};
pub use manager::HubManager;
pub use registry::ConnectionRegistry;
pub use types::{
    CloseCallback, ConnectionEvent, ConnectionInfo, ConnectionState, EventHandler,
    ReconnectPolicy, Registration, RetryConfig, TokenSupplier,
};
