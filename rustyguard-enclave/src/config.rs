//! Configuration intake (§6.3, §12): `recvconfig` in the original source,
//! reborn as a small state machine over `SInit`/`SIfn`/`SPeer`/`SEos`
//! frames read from the parent descriptor. Each interface's derived
//! hashes and each peer's `dhsecret` are computed here, once, exactly as
//! the data model's invariants require.

use std::os::fd::RawFd;

use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, RecvMsg, UnixAddr};
use rustyguard_crypto::{PublicKey, StaticInitiatorConfig, StaticPeerConfig, StaticSecret};
use zerocopy::FromBytes;

use crate::error::BootstrapError;
use crate::framing::{ControlTag, SEos, SIfn, SInit, SPeer, IFNAMSIZ};
use crate::model::Interface;
use crate::registry::Registry;

const MAX_FRAME: usize = 128;

/// Reads one frame from `fd`, returning its bytes and, if the kernel
/// delivered one, a single `SCM_RIGHTS` descriptor alongside it. The
/// source passes exactly one descriptor per config message that needs
/// one (`proxy_fd` on `SInit`, `port_fd` on each `SIfn`); anything more
/// is a framing error by construction since we only read one cmsg slot.
fn recv_frame_with_fd(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Option<RawFd>), BootstrapError> {
    let mut cmsg_buf = nix::cmsg_space!(RawFd);
    let mut iov = [std::io::IoSliceMut::new(buf)];
    let msg: RecvMsg<UnixAddr> = recvmsg(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
        .map_err(|e| BootstrapError::Io(std::io::Error::from(e)))?;

    let fd_passed = msg.cmsgs().find_map(|cmsg| match cmsg {
        ControlMessageOwned::ScmRights(fds) => fds.first().copied(),
        _ => None,
    });

    Ok((msg.bytes, fd_passed))
}

fn read_tagged(fd: RawFd) -> Result<(ControlTag, usize, [u8; MAX_FRAME], Option<RawFd>), BootstrapError> {
    let mut buf = [0u8; MAX_FRAME];
    let (n, passed_fd) = recv_frame_with_fd(fd, &mut buf)?;
    if n == 0 {
        return Err(BootstrapError::ConfigFraming(
            "parent descriptor closed mid-configuration".into(),
        ));
    }
    let tag = ControlTag::from_u8(buf[0])
        .ok_or_else(|| BootstrapError::ConfigFraming(format!("unknown config tag {}", buf[0])))?;
    Ok((tag, n - 1, buf, passed_fd))
}

pub struct SInitConfig {
    pub background: bool,
    pub verbose: i32,
    pub uid: u32,
    pub gid: u32,
    pub proxy_fd: RawFd,
    pub n_interfaces: u32,
}

/// Runs the whole `SInit` → (`SIfn` → `SPeer`*)* → `SEos` sequence,
/// returning the populated registry plus each interface's port
/// descriptor in receive order (so the caller can hand them to the event
/// loop without a second lookup).
pub fn recv_config(parent_fd: RawFd) -> Result<(SInitConfig, Registry, Vec<RawFd>), BootstrapError> {
    let (tag, n, buf, proxy_fd) = read_tagged(parent_fd)?;
    if tag != ControlTag::SInit {
        return Err(BootstrapError::ConfigFraming(
            "expected SInit as the first configuration frame".into(),
        ));
    }
    let sinit = SInit::read_from(&buf[1..1 + n])
        .ok_or_else(|| BootstrapError::ConfigFraming("malformed SInit payload".into()))?;
    let proxy_fd =
        proxy_fd.ok_or_else(|| BootstrapError::ConfigFraming("SInit carried no proxy descriptor".into()))?;

    let sinit_config = SInitConfig {
        background: sinit.background != 0,
        verbose: sinit.verbose.get(),
        uid: sinit.uid.get(),
        gid: sinit.gid.get(),
        proxy_fd,
        n_interfaces: sinit.n_interfaces.get(),
    };

    let mut registry = Registry::new();
    let mut port_fds = Vec::new();

    for expected_id in 0..sinit_config.n_interfaces {
        let (tag, n, buf, port_fd) = read_tagged(parent_fd)?;
        if tag != ControlTag::SIfn {
            return Err(BootstrapError::ConfigFraming(format!(
                "expected SIfn for interface {expected_id}"
            )));
        }
        let sifn = SIfn::read_from(&buf[1..1 + n])
            .ok_or_else(|| BootstrapError::ConfigFraming("malformed SIfn payload".into()))?;
        if sifn.interface_id.get() != expected_id {
            return Err(BootstrapError::ConfigFraming(format!(
                "SIfn interface_id {} does not match receive order {expected_id}",
                sifn.interface_id.get()
            )));
        }
        let port_fd = port_fd
            .ok_or_else(|| BootstrapError::ConfigFraming("SIfn carried no port descriptor".into()))?;

        let private_key = StaticSecret::from(sifn.private_key);
        let iface = Interface {
            id: expected_id,
            name: decode_ifname(&sifn.name),
            port: port_fd,
            config: StaticInitiatorConfig::new(private_key),
            peers: rustyguard_utils::Arena::new(),
            peer_by_pubkey: rustyguard_utils::Index::new(),
            peer_by_sessid: rustyguard_utils::Index::new(),
        };
        let interface_id = registry.interfaces.push(iface);
        debug_assert_eq!(interface_id, expected_id);
        port_fds.push(port_fd);

        for _ in 0..sifn.n_peers.get() {
            let (tag, n, buf, _) = read_tagged(parent_fd)?;
            if tag != ControlTag::SPeer {
                return Err(BootstrapError::ConfigFraming(format!(
                    "expected SPeer for interface {expected_id}"
                )));
            }
            let speer = SPeer::read_from(&buf[1..1 + n])
                .ok_or_else(|| BootstrapError::ConfigFraming("malformed SPeer payload".into()))?;
            if speer.interface_id.get() != interface_id {
                return Err(BootstrapError::ConfigFraming(
                    "SPeer interface_id does not match its owning SIfn".into(),
                ));
            }
            let peer_pub = PublicKey::from(speer.peer_public_key);
            let psk = if speer.psk == [0u8; 32] {
                None
            } else {
                Some(speer.psk.into())
            };
            let config = StaticPeerConfig::new(peer_pub, psk);
            let iface = registry
                .interfaces
                .get_mut(interface_id)
                .expect("just inserted");
            let peer_id = iface.add_peer(config);
            debug_assert_eq!(peer_id, speer.peer_id.get());
        }
    }

    let (tag, _, _, _) = read_tagged(parent_fd)?;
    if tag != ControlTag::SEos {
        return Err(BootstrapError::ConfigFraming(
            "expected SEos after the last interface's peers".into(),
        ));
    }
    let _ = SEos::read_from(&[] as &[u8]);

    Ok((sinit_config, registry, port_fds))
}

fn decode_ifname(raw: &[u8; IFNAMSIZ]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
