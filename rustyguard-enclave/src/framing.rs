//! Intra-daemon control framing (§6.2, supplemented by §12): the
//! configuration messages the Master sends once at startup (`SInit`,
//! `SIfn`, `SPeer`, `SEos`) and the tagged control protocol exchanged with
//! the Interface and Proxy siblings for the rest of the process lifetime.
//!
//! Every payload is a fixed-size, `zerocopy`-castable struct so a frame
//! read off a descriptor never needs an intermediate parse step — the
//! same discipline `rustyguard-types` uses for the wire handshake
//! messages. Descriptors themselves (the proxy socket, each interface's
//! port, a forwarded UDP socket for `MSGCONNREQ`) travel as `SCM_RIGHTS`
//! ancillary data alongside the frame, never embedded in it.

use std::net::SocketAddr;

use rustyguard_types::{HandshakeInit, HandshakeResp};
use zerocopy::{little_endian, AsBytes, FromBytes, FromZeroes, Unaligned};

pub const IFNAMSIZ: usize = 16;

/// Tag byte for every intra-daemon frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlTag {
    SInit = 1,
    SIfn = 2,
    SPeer = 3,
    SEos = 4,
    MsgWgInit = 5,
    MsgWgResp = 6,
    MsgReqWgInit = 7,
    MsgConnReq = 8,
    MsgSessKeys = 9,
}

impl ControlTag {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::SInit,
            2 => Self::SIfn,
            3 => Self::SPeer,
            4 => Self::SEos,
            5 => Self::MsgWgInit,
            6 => Self::MsgWgResp,
            7 => Self::MsgReqWgInit,
            8 => Self::MsgConnReq,
            9 => Self::MsgSessKeys,
            _ => return None,
        })
    }
}

/// One per daemon start. `proxy_fd` arrives as `SCM_RIGHTS` alongside this
/// frame, not as a field of it.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct SInit {
    pub background: u8,
    pub _pad: [u8; 3],
    pub verbose: little_endian::I32,
    pub uid: little_endian::U32,
    pub gid: little_endian::U32,
    pub n_interfaces: little_endian::U32,
}

/// One per Interface, received in order: `interface_id` must equal the
/// receive count (enforced by the caller, mirroring `enclave.c`'s
/// `assert(n == smsg.ifn.ifnid)`). `port_fd` arrives as `SCM_RIGHTS`.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct SIfn {
    pub interface_id: little_endian::U32,
    pub name: [u8; IFNAMSIZ],
    pub private_key: [u8; 32],
    pub n_peers: little_endian::U32,
}

/// One per Peer, received immediately after its owning `SIfn` and before
/// the next `SIfn`. `dhsecret` and both identity hashes are derived on
/// receipt (see [`crate::model::Interface::add_peer`]) and never
/// transmitted.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct SPeer {
    pub interface_id: little_endian::U32,
    pub peer_id: little_endian::U32,
    pub psk: [u8; 32],
    pub peer_public_key: [u8; 32],
}

/// Zero-size end-of-configuration sentinel. Anything else in its slot is
/// a fatal framing error.
#[derive(Clone, Copy, Default, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct SEos;

/// A handshake-init frame as relayed by the Interface: the peer id is
/// asserted by the Interface (it arrived on a connected socket), so the
/// decrypted static key must resolve to exactly this peer.
pub struct InterfaceWgInit {
    pub peer_id: u32,
    pub msg: HandshakeInit,
}

pub struct InterfaceWgResp {
    pub peer_id: u32,
    pub msg: HandshakeResp,
}

/// A request from the Interface to originate a new initiation for a peer
/// it already knows by id (e.g. a rekey timer firing).
pub struct ReqWgInit {
    pub peer_id: u32,
}

/// A handshake frame as relayed by the Proxy: the peer is not yet known,
/// only the interface and the two socket addresses needed to set up a
/// connected UDP socket once the peer resolves.
pub struct ProxyWgInit {
    pub interface_id: u32,
    pub local_addr: SocketAddr,
    pub foreign_addr: SocketAddr,
    pub msg: HandshakeInit,
}

pub struct ProxyWgResp {
    pub interface_id: u32,
    pub local_addr: SocketAddr,
    pub foreign_addr: SocketAddr,
    pub msg: HandshakeResp,
}

/// Emitted to the Interface named by `peer.interface` so it can install a
/// connected UDP socket for this peer, only when the triggering handshake
/// arrived via the Proxy.
pub struct ConnReq {
    pub peer_id: u32,
    pub local_addr: SocketAddr,
    pub foreign_addr: SocketAddr,
}

/// Emitted to the Interface after a successful handshake completion.
/// Zeroised by the caller immediately after the frame is sent.
pub struct SessKeys {
    pub peer_id: u32,
    pub local_sessid: u32,
    pub remote_sessid: u32,
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
}

impl Drop for SessKeys {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.send_key.zeroize();
        self.recv_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tag_round_trips_through_its_byte() {
        for tag in [
            ControlTag::SInit,
            ControlTag::SIfn,
            ControlTag::SPeer,
            ControlTag::SEos,
            ControlTag::MsgWgInit,
            ControlTag::MsgWgResp,
            ControlTag::MsgReqWgInit,
            ControlTag::MsgConnReq,
            ControlTag::MsgSessKeys,
        ] {
            assert_eq!(ControlTag::from_u8(tag as u8), Some(tag));
        }
        assert_eq!(ControlTag::from_u8(0), None);
        assert_eq!(ControlTag::from_u8(10), None);
    }

    #[test]
    fn sifn_is_a_fixed_size_frame() {
        assert_eq!(
            core::mem::size_of::<SIfn>(),
            4 + IFNAMSIZ + 32 + 4
        );
    }
}
