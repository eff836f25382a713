//! gbox control channel: UDP polling loop and PMT relay.
//!
//! Responsibilities:
//! - Receive gbox command datagrams on the well-known command-in port.
//! - Decode and dispatch each datagram to the oscam-side capability.
//! - Relay PMT tables, re-enveloped, to the well-known table-out port.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::{Events, Interest, Poll, Token};

use crate::net::{Endpoint, UdpSocket};
use crate::peer::{GboxPeer, OscamPeer, PeerSlot, RegisterError};
use crate::proto::gbox::{self, GboxCommand};
use crate::proto::{DecodeError, Hex};
use crate::trace::{debug, error, info, trace, warn};

use super::{ChannelError, MAX_MESSAGE_SIZE, POLL_TIMEOUT};

/// Port the gbox peer sends command datagrams to.
pub const GBOX_CMD_IN_PORT: u16 = 8003;
/// Port the gbox peer expects relayed tables on.
pub const GBOX_TABLE_OUT_PORT: u16 = 8004;

const CMD_IN: Token = Token(0);

/// Configuration for the gbox channel.
#[derive(Debug, Clone, Copy)]
pub struct GboxConfig {
    /// Endpoint to receive command datagrams on.
    pub cmd_in: Endpoint,
    /// Endpoint relayed tables are sent to.
    pub table_out: Endpoint,
}

impl Default for GboxConfig {
    fn default() -> Self {
        Self {
            cmd_in: Endpoint::localhost(GBOX_CMD_IN_PORT),
            table_out: Endpoint::localhost(GBOX_TABLE_OUT_PORT),
        }
    }
}

/// Handle to a running gbox control channel.
///
/// Dropping the handle signals the loop to exit without waiting for it;
/// use [`GboxChannel::shutdown`] for graceful shutdown with join.
pub struct GboxChannel {
    inner: Arc<GboxInner>,
    cmd_in: Endpoint,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GboxChannel {
    /// Binds the channel sockets and spawns the polling loop.
    ///
    /// # Errors
    ///
    /// Returns an error if a socket cannot be bound or the worker thread
    /// cannot be spawned. Setup failures are permanent: the caller gets
    /// no channel and nothing is retried internally.
    pub fn spawn(config: GboxConfig) -> Result<Self, ChannelError> {
        let mut socket = UdpSocket::bind(config.cmd_in).map_err(|e| ChannelError::Bind {
            endpoint: config.cmd_in,
            source: e,
        })?;
        let cmd_in = socket.local_addr().map_err(|e| ChannelError::Bind {
            endpoint: config.cmd_in,
            source: e,
        })?;

        // Dedicated ephemeral socket for table output.
        let relay_from = Endpoint::localhost(0);
        let relay = UdpSocket::bind(relay_from).map_err(|e| ChannelError::Bind {
            endpoint: relay_from,
            source: e,
        })?;

        let poll = Poll::new().map_err(ChannelError::Poll)?;
        poll.registry()
            .register(&mut socket, CMD_IN, Interest::READABLE)
            .map_err(ChannelError::Poll)?;

        let inner = Arc::new(GboxInner {
            relay,
            table_out: config.table_out,
            oscam: PeerSlot::new(),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let inner = Arc::clone(&inner);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("cabridge-gbox".into())
                .spawn(move || {
                    info!("gbox control channel started");
                    let mut control = GboxLoop {
                        poll,
                        events: Events::with_capacity(8),
                        socket,
                        buf: vec![0u8; MAX_MESSAGE_SIZE],
                        inner,
                        shutdown,
                    };
                    control.run();
                    info!("gbox control channel exiting");
                })
                .map_err(ChannelError::Spawn)?
        };

        info!(cmd_in = %cmd_in, table_out = %config.table_out, "gbox channel ready");

        Ok(Self {
            inner,
            cmd_in,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Registers the oscam-side capability this channel dispatches to.
    ///
    /// # Errors
    ///
    /// Fails if a capability was already registered; the original stays
    /// in place.
    pub fn register_oscam(&self, peer: Arc<dyn OscamPeer>) -> Result<(), RegisterError> {
        self.inner.oscam.register(peer)
    }

    /// Returns this channel's own capability for the oscam side to invoke.
    #[must_use]
    pub fn peer(&self) -> Arc<dyn GboxPeer> {
        Arc::clone(&self.inner) as Arc<dyn GboxPeer>
    }

    /// Relays a PMT table to the table-out port.
    ///
    /// The first two bytes are rewritten to the table/PMT tag pair; the
    /// rest of the buffer goes out unchanged, as one datagram. Failures
    /// (partial send, socket error) are logged and not retried.
    pub fn relay_pmt(&self, table: &[u8]) -> bool {
        self.inner.relay_pmt(table)
    }

    /// The endpoint the channel actually receives command datagrams on.
    #[must_use]
    pub fn cmd_in_addr(&self) -> Endpoint {
        self.cmd_in
    }

    /// Signals the polling loop to exit and waits for it to terminate.
    ///
    /// The loop observes the signal within one poll timeout; an in-flight
    /// dispatch finishes first. Consuming `self` releases the sockets.
    pub fn shutdown(mut self) {
        info!("gbox channel shutdown initiated");
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("gbox channel shutdown complete");
    }
}

impl Drop for GboxChannel {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// State shared between the polling loop and the capability surface.
struct GboxInner {
    /// Socket used for sending relayed tables.
    relay: UdpSocket,
    /// Destination for relayed tables.
    table_out: Endpoint,
    /// Capability of the oscam side, registered once at wiring time.
    oscam: PeerSlot<dyn OscamPeer>,
}

impl GboxInner {
    fn dispatch(&self, payload: &[u8]) {
        let Some(oscam) = self.oscam.get() else {
            warn!("oscam capability not registered, dropping gbox message");
            return;
        };

        trace!(payload = %Hex(payload), "gbox datagram");

        match gbox::decode_command(payload) {
            Ok(GboxCommand::ControlWords(pair)) => {
                oscam.process_control_words(&pair.even, &pair.odd);
            }
            Ok(GboxCommand::NeedPids(pids)) => {
                for pid in pids {
                    oscam.set_filter(pid);
                }
            }
            Err(e @ DecodeError::UnknownTag(_)) => {
                debug!(error = %e, "ignoring gbox message");
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed gbox message");
            }
        }
    }

    fn relay_pmt(&self, table: &[u8]) -> bool {
        let frame = match gbox::relay_frame(table) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "cannot relay PMT");
                return false;
            }
        };

        match self.relay.try_send_to(&frame, self.table_out) {
            Ok(Some(n)) if n == frame.len() => true,
            Ok(Some(n)) => {
                warn!(sent = n, len = frame.len(), "partial PMT send");
                false
            }
            Ok(None) => {
                warn!("PMT send would block, dropping table");
                false
            }
            Err(e) => {
                warn!(error = %e, "PMT send failed");
                false
            }
        }
    }
}

impl GboxPeer for GboxInner {
    fn process_pmt(&self, table: &[u8]) {
        debug!(table = %Hex(table), "PMT table");
        self.relay_pmt(table);
    }

    fn process_cat(&self, table: &[u8]) {
        debug!(table = %Hex(table), "CAT table");
    }

    fn process_emm(&self, table: &[u8]) {
        debug!(table = %Hex(table), "EMM");
    }

    fn process_ecm(&self, table: &[u8]) {
        debug!(table = %Hex(table), "ECM");
    }
}

/// The channel's polling loop state.
struct GboxLoop {
    poll: Poll,
    events: Events,
    socket: UdpSocket,
    buf: Vec<u8>,
    inner: Arc<GboxInner>,
    shutdown: Arc<AtomicBool>,
}

impl GboxLoop {
    fn run(&mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // TODO: rebind the socket and restart the loop; for now
                    // the channel fail-stops and needs an external restart.
                    error!(error = %e, "gbox poll failed, channel stopping");
                    break;
                }
            }

            // Re-check termination before touching a just-arrived message.
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            if self.events.is_empty() {
                continue; // poll timeout
            }

            self.drain();
        }
    }

    /// Receives every queued datagram, dispatching one at a time.
    ///
    /// The socket is edge-triggered: readiness fires on arrival edges, so
    /// the queue must be drained to `WouldBlock` before the next wait.
    fn drain(&mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.socket.try_recv_from(&mut self.buf) {
                Ok(Some((len, _from))) => self.inner.dispatch(&self.buf[..len]),
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "gbox recv failed");
                    return;
                }
            }
        }
    }
}
