#![forbid(unsafe_code)]

//! `acp_bridge`: an Agent Client Protocol client library.
//!
//! Attach an [`AcpClient`] to any duplex byte stream connected to an ACP
//! agent, perform the handshake, and drive sessions through typed events.

pub mod acp;
pub mod config;
pub mod errors;

pub use acp::client::{AcpClient, ClientOptions, ConnectionState};
pub use config::BridgeConfig;
pub use errors::{AppError, Result};
