//! Data model: the fixed-width value types from §3 and the `Interface` /
//! `Peer` / `HandshakeState` entities, wired together with dense integer
//! ids instead of the source's cyclic pointers (see the workspace design
//! notes on arenas).

use std::os::fd::RawFd;

use rustyguard_crypto::{PublicKey, StaticInitiatorConfig, StaticPeerConfig, StaticSecret};
use rustyguard_utils::{Arena, Index};
use zeroize::Zeroize;

pub type Key = [u8; 32];
pub type Hash = [u8; 32];
pub type Tag = [u8; 16];
pub type SessionId = u32;
pub type Timestamp = [u8; 12];

/// Per-peer handshake transcript. Lives for the lifetime of the peer and
/// is fully overwritten by each new `create_init`/`consume_init`, never
/// torn down in between handshakes.
#[derive(Default)]
pub struct HandshakeState {
    /// Locally-chosen session id for the in-flight handshake.
    pub sessid: SessionId,
    /// The peer's session id for the in-flight handshake.
    pub peersessid: SessionId,
    /// Retained on the responder side between `consume_init` and
    /// `create_response`: the initiator's ephemeral public key.
    pub initiator_ephemeral: Option<PublicKey>,
    /// The local ephemeral secret, generated fresh by whichever side just
    /// called `create_init` or `create_response`, and retained until the
    /// matching `consume_*` call on this side completes (an initiator
    /// needs it again in `consume_response`).
    pub ephemeral_secret: Option<StaticSecret>,
    pub chain: Hash,
    pub hash: Hash,
}

impl HandshakeState {
    /// Commits a freshly-authenticated `(chain, hash)` pair. Called only
    /// after a handshake step has fully verified — per §4.3, failing
    /// authentication never reaches this point.
    pub fn commit(&mut self, chain: Hash, hash: Hash) {
        self.chain = chain;
        self.hash = hash;
    }
}

/// A remote peer, keyed within its interface by a dense integer id and
/// indexed globally (within the interface) by static public key and by
/// active local session id.
pub struct Peer {
    pub id: u32,
    pub interface_id: u32,
    pub config: StaticPeerConfig,
    /// `X25519(interface.S_priv, peer.R_pub)`, computed once at
    /// configuration time and reused for every handshake with this peer.
    pub dhsecret: Key,
    pub hs: HandshakeState,
    /// Last accepted TAI64N timestamp from this peer; all-zero until the
    /// first successful `consume_init`.
    pub recvts: Timestamp,
}

impl Peer {
    pub fn static_key(&self) -> &PublicKey {
        &self.config.key
    }
}

/// A local Interface sibling: one per `SIFN` message received at startup,
/// persistent for the life of the process.
pub struct Interface {
    pub id: u32,
    pub name: String,
    pub port: RawFd,
    pub config: StaticInitiatorConfig,
    pub peers: Arena<Peer>,
    pub peer_by_pubkey: Index<[u8; 32]>,
    pub peer_by_sessid: Index<SessionId>,
}

impl Interface {
    pub fn public_key(&self) -> &PublicKey {
        &self.config.public_key
    }

    pub fn add_peer(&mut self, config: StaticPeerConfig) -> u32 {
        let dhsecret = *self.config.private_key.diffie_hellman(&config.key).as_bytes();
        let pubkey_bytes = config.key.to_bytes();
        let peer = Peer {
            id: 0,
            interface_id: self.id,
            config,
            dhsecret,
            hs: HandshakeState::default(),
            recvts: [0; 12],
        };
        let id = self.peers.push(peer);
        self.peers[id].id = id;
        self.peer_by_pubkey.insert(pubkey_bytes, id);
        id
    }

    pub fn find_peer_by_pubkey(&self, pk: &PublicKey) -> Option<u32> {
        self.peer_by_pubkey.get(&pk.to_bytes())
    }

    pub fn find_peer_by_sessid(&self, sessid: SessionId) -> Option<u32> {
        self.peer_by_sessid.get(&sessid)
    }

    pub fn bind_sessid(&mut self, sessid: SessionId, peer_id: u32) {
        self.peer_by_sessid.insert(sessid, peer_id);
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.dhsecret.zeroize();
    }
}
