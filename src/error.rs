/// Error taxonomy for the SLAC matching engine.
///
/// Propagation policy (see DESIGN.md / SPEC_FULL.md §7): `Timeout`,
/// `MalformedFrame` and `ProtocolMismatch` are handled locally by the state
/// machine, which resets the session to `Unmatched` and returns `Ok(())`.
/// `Io` is the one variant that bubbles out of the matching routine to the
/// supervisor, which may choose to recreate the Ethernet port.
#[derive(Debug, thiserror::Error)]
pub enum SlacError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(&'static str),

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key provisioning failed: {0}")]
    KeyProvisioningFailed(&'static str),
}

pub type SlacResult<T> = Result<T, SlacError>;
