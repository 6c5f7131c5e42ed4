//! Transport-client capability: the piece that actually holds a session
//! with the chat network.
//!
//! The gateway core only sees [`Transport`] and the [`TransportEvent`]s it
//! emits. [`bridge::BridgeTransport`] is the production implementation: it
//! drives a sidecar process over newline-delimited JSON on stdio.

pub mod bridge;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;

pub use {
    bridge::{BridgeFactory, BridgeTransport},
    error::TransportError,
    event::{ClientInfo, RemoteState, TransportEvent},
    transport::{Transport, TransportContext, TransportFactory},
};
