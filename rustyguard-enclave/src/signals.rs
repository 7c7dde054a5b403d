//! Signal-driven flags (§5, §9): the only two signals the core recognises
//! are "report statistics" and "terminate". Handlers do no work beyond
//! flag-setting — here that's delegated entirely to `signal-hook`, whose
//! self-pipe trick also guarantees a blocked `mio::Poll::poll` wakes up
//! when a signal arrives, rather than only setting an `AtomicBool` no one
//! is polling.

use mio::{Interest, Registry, Token};
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook_mio::v1_0::Signals as MioSignals;

use crate::error::BootstrapError;

pub struct Signals {
    inner: MioSignals,
}

impl Signals {
    pub fn install() -> Result<Self, BootstrapError> {
        let inner =
            MioSignals::new([SIGTERM, SIGINT, SIGUSR1]).map_err(BootstrapError::SignalHandler)?;
        Ok(Self { inner })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> Result<(), BootstrapError> {
        registry
            .register(&mut self.inner, token, Interest::READABLE)
            .map_err(BootstrapError::SignalHandler)
    }

    /// Drains every signal delivered since the last call, returning
    /// `(terminate, report_stats)`. The loop observes this once at the
    /// top of each iteration; handlers never run application code.
    pub fn drain(&mut self) -> (bool, bool) {
        let mut terminate = false;
        let mut report_stats = false;
        for signal in self.inner.pending() {
            match signal {
                SIGTERM | SIGINT => terminate = true,
                SIGUSR1 => report_stats = true,
                _ => {}
            }
        }
        (terminate, report_stats)
    }
}
