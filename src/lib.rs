//! Signaling relay and per-client call state machine for two-party
//! browser calls. Media itself stays behind [`media::MediaTransport`].

pub mod channel;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod media;
pub mod protocol;
pub mod relay;

pub use client::CallClient;
pub use config::{ClientConfig, RelayConfig, RoutingMode};
pub use controller::{CallController, CallSnapshot, CallState, ControllerEvent, SignalSink};
pub use error::CallError;
pub use identity::IdentityStore;
pub use media::{LinkEvents, LinkId, LinkState, MediaTransport};
pub use protocol::{ClientId, IceCandidate, SessionDescription, SignalingMessage};
pub use relay::RelayState;
