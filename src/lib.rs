//! cabridge: control-channel bridge between two conditional-access peers.
//!
//! A digital-TV receiver stack splits card sharing across two peers: a
//! UDP-based "gbox" peer that supplies decrypted control words and PID
//! filter requests, and a TCP-based "oscam" peer that supplies demuxed
//! program tables (PMT) and consumes filter and control-word commands.
//! This crate relays messages between the two.
//!
//! # Architecture
//!
//! ```text
//!  gbox peer                                          oscam peer
//!     │ UDP :8003                                 TCP :2000 │
//!     ▼                                                     ▼
//! ┌─────────────┐  OscamPeer capability           ┌──────────────┐
//! │ GboxChannel │────────────────────────────────►│ OscamChannel │
//! │  (UDP loop) │◄────────────────────────────────│  (TCP loop)  │
//! └─────────────┘           GboxPeer capability   └──────────────┘
//!     │ UDP :8004
//!     ▼
//!  relayed PMT tables
//! ```
//!
//! Each channel runs its own polling thread and parses its peer's binary
//! envelopes; decoded commands are dispatched through the opposite
//! channel's capability trait ([`peer::GboxPeer`] / [`peer::OscamPeer`]),
//! registered exactly once at wiring time via [`bridge::bind_peers`].
//!
//! The bridge frames and relays messages only: no descrambling, no
//! entitlement checking, no multi-client fan-out.

pub mod bridge;
pub mod channel;
pub mod net;
pub mod peer;
pub mod proto;
mod trace;

pub use bridge::bind_peers;
pub use channel::{ChannelError, GboxChannel, GboxConfig, OscamChannel, OscamConfig};
pub use peer::{GboxPeer, OscamPeer, RegisterError};
pub use trace::init_tracing;
