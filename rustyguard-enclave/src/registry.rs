//! The top-level interface table: a flat, dense-indexed `Arena<Interface>`
//! populated once at startup from `SIFN`/`SPEER` and never mutated again
//! except for each peer's handshake state and `recvts`.

use rustyguard_utils::Arena;

use crate::model::{Interface, Peer, SessionId};

#[derive(Default)]
pub struct Registry {
    pub interfaces: Arena<Interface>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            interfaces: Arena::new(),
        }
    }

    pub fn interface(&self, id: u32) -> Option<&Interface> {
        self.interfaces.get(id)
    }

    pub fn interface_mut(&mut self, id: u32) -> Option<&mut Interface> {
        self.interfaces.get_mut(id)
    }

    pub fn peer(&self, interface_id: u32, peer_id: u32) -> Option<&Peer> {
        self.interface(interface_id)?.peers.get(peer_id)
    }

    pub fn peer_mut(&mut self, interface_id: u32, peer_id: u32) -> Option<&mut Peer> {
        self.interface_mut(interface_id)?.peers.get_mut(peer_id)
    }

    /// `ifnid >= interfaces.len()` is rejected, the strict form: the
    /// source's `ifnid > ifnvsize` guard is off by one.
    pub fn valid_interface_id(&self, id: u32) -> bool {
        (id as usize) < self.interfaces.len()
    }

    pub fn find_peer_by_session(&self, interface_id: u32, sessid: SessionId) -> Option<u32> {
        self.interface(interface_id)?.find_peer_by_sessid(sessid)
    }
}
