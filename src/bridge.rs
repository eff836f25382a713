//! Mutual capability registration between the two channels.

use crate::channel::{GboxChannel, OscamChannel};
use crate::peer::RegisterError;
use crate::trace::info;

/// Wires the two control channels together.
///
/// Registers each channel's capability with the other, exactly once.
/// Call this before traffic is expected: either loop drops messages that
/// arrive while its peer slot is still empty. Intended as a single wiring
/// step; on failure the partially completed registration is left in
/// place, like any other first-writer-wins outcome.
///
/// # Errors
///
/// Fails if either channel already has a peer registered.
pub fn bind_peers(gbox: &GboxChannel, oscam: &OscamChannel) -> Result<(), RegisterError> {
    gbox.register_oscam(oscam.peer())?;
    oscam.register_gbox(gbox.peer())?;
    info!("bridge peers registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{GboxConfig, OscamConfig};
    use crate::net::Endpoint;

    fn local_pair() -> (GboxChannel, OscamChannel) {
        let gbox = GboxChannel::spawn(GboxConfig {
            cmd_in: Endpoint::localhost(0),
            table_out: Endpoint::localhost(0),
        })
        .unwrap();
        let oscam = OscamChannel::spawn(OscamConfig {
            listen: Endpoint::localhost(0),
        })
        .unwrap();
        (gbox, oscam)
    }

    #[test]
    fn bind_peers_is_one_shot() {
        let (gbox, oscam) = local_pair();

        bind_peers(&gbox, &oscam).unwrap();
        assert_eq!(
            bind_peers(&gbox, &oscam),
            Err(RegisterError::AlreadyRegistered)
        );

        gbox.shutdown();
        oscam.shutdown();
    }
}
