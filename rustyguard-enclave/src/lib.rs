//! The Enclave: the privilege-separated process holding every long-term
//! private key, the sole entity permitted to run a Diffie-Hellman
//! operation or the Noise KDF chain. This crate owns the peer/interface
//! registry, the handshake state machine built on `rustyguard-crypto`,
//! the intra-daemon control framing, the message dispatcher, and the
//! bootstrap/isolation sequence that runs before any of it is trusted
//! with a descriptor from either sibling.

pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod framing;
pub mod handshake;
pub mod model;
pub mod registry;
pub mod signals;

pub use error::{BootstrapError, DispatchError};
pub use registry::Registry;
