//! Entry point: read configuration from the inherited parent descriptor,
//! apply resource limits and descriptor hygiene checks, drop privileges
//! and chroot, then hand off to the event loop. Any failure before the
//! loop starts is fatal (§7); once inside the loop, only the loop's own
//! I/O errors on an expected reply are.

use std::os::fd::{FromRawFd, RawFd};
use std::path::Path;
use std::process::ExitCode;

use mio::net::UnixDatagram as MioUnixDatagram;
use nix::unistd::{Gid, Uid};
use tracing::error;
use tracing_subscriber::EnvFilter;

use rustyguard_enclave::{bootstrap, config, event_loop::EventLoop, signals::Signals};

/// The Enclave inherits exactly this descriptor from the Master at exec
/// time; everything else (the proxy socket, each interface's port) is
/// granted over it via `SCM_RIGHTS` during configuration.
const PARENT_FD: RawFd = 3;

fn run() -> Result<(), rustyguard_enclave::BootstrapError> {
    bootstrap::check_descriptor_hygiene(&[0, 1, 2, PARENT_FD])?;

    let (sinit, registry, port_fds) = config::recv_config(PARENT_FD)?;

    let max_data_bytes = registry
        .interfaces
        .iter()
        .map(|(_, iface)| {
            1024 + iface.peers.len() as u64 * 512
        })
        .sum::<u64>()
        .max(1 << 20);
    let fd_ceiling = (port_fds.len() + 4) as u64;
    bootstrap::apply_resource_limits(max_data_bytes, fd_ceiling)?;

    let signals = Signals::install()?;

    bootstrap::chroot_to_empty_dir(Path::new("/var/empty"))?;
    bootstrap::drop_privileges(Uid::from_raw(sinit.uid), Gid::from_raw(sinit.gid))?;

    // Safety: `sinit.proxy_fd` and every entry of `port_fds` were just
    // received as `SCM_RIGHTS` descriptors we exclusively own.
    let proxy = unsafe { std::os::unix::net::UnixDatagram::from_raw_fd(sinit.proxy_fd) };
    proxy
        .set_nonblocking(true)
        .map_err(rustyguard_enclave::BootstrapError::Io)?;
    let proxy = MioUnixDatagram::from_std(proxy);

    let interfaces_io = port_fds
        .into_iter()
        .map(|fd| {
            let sock = unsafe { std::os::unix::net::UnixDatagram::from_raw_fd(fd) };
            sock.set_nonblocking(true)
                .map_err(rustyguard_enclave::BootstrapError::Io)?;
            Ok(MioUnixDatagram::from_std(sock))
        })
        .collect::<Result<Vec<_>, rustyguard_enclave::BootstrapError>>()?;

    let mut event_loop = EventLoop::new(signals, proxy, interfaces_io, registry)?;
    event_loop.run()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "enclave exiting after a fatal error");
            ExitCode::FAILURE
        }
    }
}
