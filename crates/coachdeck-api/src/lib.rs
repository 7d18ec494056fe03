//! Async transport layer for the coach control-bus bridge daemon.
//!
//! The bridge daemon decodes the coach's control bus into device entities
//! and exposes two surfaces that this crate wraps:
//!
//! - **[`channel`]** — the push channel: a WebSocket stream of JSON frames
//!   with fixed-interval auto-reconnect, frame broadcast, and scoped
//!   teardown. One socket per [`channel::PushChannelHandle`]; handles are
//!   never shared between consumers.
//!
//! - **[`rest`]** — the request/response surface: entity control commands
//!   and the three independent status snapshot endpoints, over a shared
//!   [`transport::TransportConfig`]-built `reqwest` client.
//!
//! Higher layers (`coachdeck-core`) own validation and reconciliation;
//! this crate moves bytes and reports failures through [`Error`].

pub mod channel;
pub mod error;
pub mod rest;
pub mod transport;

pub use channel::{ChannelConfig, ChannelState, PushChannelHandle, PushFrame};
pub use error::Error;
pub use rest::{
    BusInterface, ControlAck, ControlRequest, DaemonClient, HealthCounters, InterfaceCounters,
    ServerStatus,
};
pub use transport::TransportConfig;
