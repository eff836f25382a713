//! The two control channels and their polling loops.
//!
//! Each channel owns its sockets and one dedicated worker thread; there
//! is no shared queue and no pool. A loop blocks only inside its bounded
//! poll; parsing and capability dispatch are synchronous, so a slow
//! handler stalls further intake on that channel only. Within a channel,
//! messages are handled strictly in arrival order; across channels there
//! is no ordering guarantee.
//!
//! Shutdown is cooperative: a shared flag is checked on every poll
//! timeout and re-checked after every wakeup before dispatching, so a
//! shutdown request is observed within one second without cutting an
//! in-flight dispatch short.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::net::Endpoint;

pub mod gbox;
pub mod oscam;

pub use gbox::{GboxChannel, GboxConfig};
pub use oscam::{OscamChannel, OscamConfig};

/// Bounded wait per loop iteration; also the worst-case shutdown latency.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum practical size of a single control message on either channel.
pub(crate) const MAX_MESSAGE_SIZE: usize = 4096;

/// Errors constructing a control channel.
///
/// All of these are setup failures: permanent, surfaced once, never
/// retried internally. A channel that failed to spawn does not exist.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A socket could not be bound (e.g. address in use).
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// The endpoint the bind was attempted on.
        endpoint: Endpoint,
        /// The underlying I/O error.
        source: io::Error,
    },
    /// The readiness poller could not be set up.
    #[error("failed to set up poller: {0}")]
    Poll(#[source] io::Error),
    /// The worker thread could not be spawned.
    #[error("failed to spawn channel thread: {0}")]
    Spawn(#[source] io::Error),
}
