//! Error taxonomy: [`DispatchError`] covers every non-fatal rejection in
//! the message dispatcher (§7 of the design — logged and discarded, the
//! peer's persistent state is left untouched); [`BootstrapError`] covers
//! the fatal failures that abort the process before the event loop starts.

use std::io;

use rustyguard_crypto::CryptoError;

/// Non-fatal: the calling loop logs this at `warn` and moves on to the
/// next message. Never causes the process to exit.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("frame shorter than expected or unrecognised message type")]
    Framing,
    #[error("mac1 did not verify")]
    Mac1Mismatch,
    #[error("unknown peer")]
    UnknownPeer,
    #[error("unknown interface id {0}")]
    UnknownInterface(u32),
    #[error("unknown session id {0}")]
    UnknownSessionId(u32),
    #[error("handshake decryption failed: {0:?}")]
    Decryption(CryptoError),
    #[error("timestamp is not strictly greater than the last accepted one")]
    Replay,
    #[error("decrypted static key resolves to a different peer than asserted")]
    CrossPeerViolation,
}

impl From<CryptoError> for DispatchError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Rejected => DispatchError::Mac1Mismatch,
            other => DispatchError::Decryption(other),
        }
    }
}

/// Fatal: the process logs this at `error` and exits. None of these are
/// recoverable — they all represent a broken precondition for running at
/// all (bad descriptors, an isolation step that didn't take, configuration
/// that overflows the static tables it's meant to populate).
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("descriptor hygiene check failed: {0}")]
    DescriptorHygiene(String),
    #[error("failed to apply resource limit: {0}")]
    ResourceLimit(#[source] nix::Error),
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),
    #[error("failed to drop privileges: {0}")]
    PrivilegeDrop(#[source] nix::Error),
    #[error("failed to chroot: {0}")]
    Chroot(#[source] nix::Error),
    #[error("configuration exceeds static maxima: {0}")]
    ConfigOverflow(String),
    #[error("malformed configuration message: {0}")]
    ConfigFraming(String),
    #[error("i/o error on sibling descriptor: {0}")]
    Io(#[source] io::Error),
}
