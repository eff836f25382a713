//! Peer capability interfaces and their one-shot registration slot.
//!
//! Each control channel invokes the opposite side through a narrow,
//! method-only trait rather than a concrete channel type, which keeps the
//! two loops independently testable with mock peers. The reference is
//! injected after construction and set at most once for the lifetime of
//! the process; until then the holding channel drops inbound traffic with
//! a diagnostic ("not ready" is a valid permanent state, not transient).

use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::proto::gbox::CONTROL_WORD_LEN;

/// Capability exposed by the gbox side, consumed by the oscam channel.
///
/// Table buffers are borrowed for the duration of the call; implementors
/// copy what they need and must not retain the slice.
pub trait GboxPeer: Send + Sync {
    /// Handle a program map table.
    fn process_pmt(&self, table: &[u8]);
    /// Handle a conditional-access table.
    fn process_cat(&self, table: &[u8]);
    /// Handle an entitlement management message.
    fn process_emm(&self, table: &[u8]);
    /// Handle an entitlement control message.
    fn process_ecm(&self, table: &[u8]);
}

/// Capability exposed by the oscam side, consumed by the gbox channel.
pub trait OscamPeer: Send + Sync {
    /// Deliver a decrypted even/odd control word pair.
    fn process_control_words(
        &self,
        even: &[u8; CONTROL_WORD_LEN],
        odd: &[u8; CONTROL_WORD_LEN],
    );
    /// Request a demux filter for a PID.
    fn set_filter(&self, pid: u16);
}

/// Error registering a peer capability.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// A capability was already registered; the original stays in place.
    #[error("peer capability already registered")]
    AlreadyRegistered,
}

/// Write-once holder for the opposite peer's capability.
///
/// First writer wins; later attempts fail loudly and leave the existing
/// reference intact. Reads after a successful write need no further
/// locking, which makes the cross-channel handoff safe as long as
/// registration happens before traffic is expected to be handled.
pub struct PeerSlot<P: ?Sized> {
    slot: OnceLock<Arc<P>>,
}

impl<P: ?Sized> PeerSlot<P> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Registers the peer capability.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] if a capability is
    /// already present; the stored reference is not replaced.
    pub fn register(&self, peer: Arc<P>) -> Result<(), RegisterError> {
        self.slot
            .set(peer)
            .map_err(|_| RegisterError::AlreadyRegistered)
    }

    /// Returns the registered capability, if any.
    #[must_use]
    pub fn get(&self) -> Option<&Arc<P>> {
        self.slot.get()
    }
}

impl<P: ?Sized> Default for PeerSlot<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPeer {
        calls: AtomicUsize,
    }

    impl OscamPeer for CountingPeer {
        fn process_control_words(&self, _even: &[u8; 8], _odd: &[u8; 8]) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }

        fn set_filter(&self, _pid: u16) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counting_peer() -> Arc<CountingPeer> {
        Arc::new(CountingPeer {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn slot_empty_until_registered() {
        let slot: PeerSlot<dyn OscamPeer> = PeerSlot::new();
        assert!(slot.get().is_none());

        slot.register(counting_peer()).unwrap();
        assert!(slot.get().is_some());
    }

    #[test]
    fn second_registration_fails_and_keeps_first() {
        let slot: PeerSlot<dyn OscamPeer> = PeerSlot::new();

        let first = counting_peer();
        let second = counting_peer();

        slot.register(Arc::clone(&first) as Arc<dyn OscamPeer>)
            .unwrap();
        assert_eq!(
            slot.register(Arc::clone(&second) as Arc<dyn OscamPeer>),
            Err(RegisterError::AlreadyRegistered)
        );

        // Only the first-registered peer is ever invoked.
        slot.get().unwrap().set_filter(0x0010);
        assert_eq!(first.calls.load(Ordering::Relaxed), 1);
        assert_eq!(second.calls.load(Ordering::Relaxed), 0);
    }
}
