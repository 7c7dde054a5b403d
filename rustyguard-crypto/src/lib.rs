#![no_std]

//! The Enclave's crypto layer: BLAKE2s/X25519/ChaCha20-Poly1305 primitives
//! (`prim`) plus the four Noise handshake operations the enclave's
//! handshake state machine calls into (`create_init`/`consume_init`/
//! `create_response`/`consume_response`, named here `encrypt_handshake_init`
//! etc. to mirror which side performs the AEAD seal vs. open).
//!
//! This crate never touches a descriptor, never allocates, and is the only
//! place in the workspace that computes a Diffie-Hellman operation or runs
//! the KDF chain. `rustyguard-enclave` owns everything stateful (peer
//! tables, session ids, timestamps) and calls in here with borrowed keys.

pub use prim::{mac, DecryptionKey, EncryptionKey, HandshakeState, Key, Mac};
pub use x25519_dalek::{PublicKey, StaticSecret};

use prim::{hash, LABEL_COOKIE, LABEL_MAC1};
use rustyguard_types::{HandshakeInit, HandshakeResp, MSG_FIRST, MSG_SECOND};
use tai64::Tai64N;
use zerocopy::{little_endian, AsBytes};

mod prim;

#[derive(Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// An AEAD tag or keyed MAC did not verify.
    DecryptionError,
    /// A Diffie-Hellman output was the all-zero (identity) point.
    DhFailed,
    /// A MAC1 check against a caller-supplied recipient key failed.
    Rejected,
}

pub fn mac1_key(spk: &PublicKey) -> Key {
    hash([&LABEL_MAC1, spk.as_bytes()]).into()
}

/// Computed but not consumed inside this crate: the cookie (DoS
/// mitigation) machinery lives entirely in the Proxy, outside the
/// Enclave's trust boundary. Kept because the Interface/Peer data model
/// names it as a precomputed, never-recomputed attribute of `S_pub`.
pub fn cookie_key(spk: &PublicKey) -> Key {
    hash([&LABEL_COOKIE, spk.as_bytes()]).into()
}

/// `Hash(Hash(Construction) || Identifier)`, the seed every `pubkeyhash`
/// is built from.
pub fn identifier_hash() -> [u8; 32] {
    let construction = hash([b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s"]);
    hash([&construction, b"WireGuard v1 zx2c4 Jason@zx2c4.com"])
}

/// Long-term configuration of a local Interface: the static keypair and
/// its precomputed, pure-function-of-`S_pub` hashes.
pub struct StaticInitiatorConfig {
    pub private_key: StaticSecret,
    pub public_key: PublicKey,
    pub pubkeyhash: [u8; 32],
    pub mac1_key: Key,
    pub cookie_key: Key,
}

impl StaticInitiatorConfig {
    pub fn new(private_key: StaticSecret) -> Self {
        let public_key = PublicKey::from(&private_key);
        let pubkeyhash = hash([&identifier_hash(), public_key.as_bytes()]);
        Self {
            mac1_key: mac1_key(&public_key),
            cookie_key: cookie_key(&public_key),
            pubkeyhash,
            public_key,
            private_key,
        }
    }
}

/// Long-term configuration of a remote Peer: its static public key, the
/// initiator-role identity hash, and the optional PSK (zero when absent).
pub struct StaticPeerConfig {
    pub key: PublicKey,
    pub preshared_key: Key,
    pub pubkeyhash: [u8; 32],
    pub mac1_key: Key,
}

impl StaticPeerConfig {
    pub fn new(key: PublicKey, preshared_key: Option<Key>) -> Self {
        let pubkeyhash = hash([&identifier_hash(), key.as_bytes()]);
        Self {
            mac1_key: mac1_key(&key),
            pubkeyhash,
            key,
            preshared_key: preshared_key.unwrap_or_default(),
        }
    }
}

/// A `HandshakeInit` that has passed `consume_init` and may now be used to
/// build a response. Carries the initiator's ephemeral and static public
/// keys, already authenticated, plus the in-flight transcript state.
pub struct DecryptedHandshakeInit {
    pub sender: u32,
    pub initiator_ephemeral: PublicKey,
    pub initiator_static: PublicKey,
    pub timestamp: [u8; 12],
    chain: [u8; 32],
    hash: [u8; 32],
}

impl DecryptedHandshakeInit {
    pub fn chain(&self) -> &[u8; 32] {
        &self.chain
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Rebuilds a `DecryptedHandshakeInit` from state the caller committed
    /// after an earlier `decrypt_handshake_init`/`finish_decrypt_handshake_init`
    /// pair, so `encrypt_handshake_resp` can run in a later dispatcher turn.
    pub fn from_committed(
        sender: u32,
        initiator_ephemeral: PublicKey,
        initiator_static: PublicKey,
        timestamp: [u8; 12],
        chain: [u8; 32],
        hash: [u8; 32],
    ) -> Self {
        Self {
            sender,
            initiator_ephemeral,
            initiator_static,
            timestamp,
            chain,
            hash,
        }
    }
}

fn compute_mac1(bytes_up_to_mac1: &[u8], mac1_key: &Key) -> [u8; 16] {
    mac(mac1_key, bytes_up_to_mac1)
}

/// Verify `msg`'s `mac1` against the recipient's `mac1_key`. This is the
/// only MAC check the Enclave performs: `mac2`/cookie verification is the
/// Proxy's responsibility (see `cookie_key` above).
pub fn verify_mac1_init(msg: &HandshakeInit, mac1_key: &Key) -> Result<(), CryptoError> {
    let offset = core::mem::offset_of!(HandshakeInit, mac1);
    let actual = compute_mac1(&msg.as_bytes()[..offset], mac1_key);
    if actual == msg.mac1.0 {
        Ok(())
    } else {
        Err(CryptoError::Rejected)
    }
}

pub fn verify_mac1_resp(msg: &HandshakeResp, mac1_key: &Key) -> Result<(), CryptoError> {
    let offset = core::mem::offset_of!(HandshakeResp, mac1);
    let actual = compute_mac1(&msg.as_bytes()[..offset], mac1_key);
    if actual == msg.mac1.0 {
        Ok(())
    } else {
        Err(CryptoError::Rejected)
    }
}

// ---- Noise IKpsk2 ---- //
// WireGuard makes use of a slightly modified Noise IKpsk2 handshake.
//
// <- s
// -> e, es, s, ss
// <- e, ee, se, psk
//
// The initiator is expected to know the responder's static public key
// ahead of time. The initiator sends an ephemeral public key and their
// encrypted static public key; the responder sends an ephemeral public key
// and completes the handshake with an empty authenticated payload.

/// Initiator — `create_init`. Advances a fresh transcript through the
/// `e, es, s, ss` steps and emits a ready-to-send `HandshakeInit`, along
/// with the chaining key/hash the caller must retain for
/// `consume_response`.
pub fn encrypt_handshake_init(
    initiator: &StaticInitiatorConfig,
    peer: &StaticPeerConfig,
    esk_i: &StaticSecret,
    now: Tai64N,
    sender: u32,
) -> Result<(HandshakeInit, [u8; 32], [u8; 32]), CryptoError> {
    let mut hs = HandshakeState::default();

    let epk_i = PublicKey::from(esk_i);
    hs.mix_hash(peer.key.as_bytes());

    // WireGuard goes off-spec here with mix-chain before mix-hash for `e`.
    hs.mix_chain(epk_i.as_bytes());
    hs.mix_hash(epk_i.as_bytes());

    let k = hs.mix_key_dh(esk_i, &peer.key)?;
    let static_key = prim::seal_static_key(initiator.public_key.to_bytes(), &mut hs, &k);

    let k = hs.mix_key_dh(&initiator.private_key, &peer.key)?;
    let timestamp = prim::seal_timestamp(now.to_bytes(), &mut hs, &k);

    let mut msg = HandshakeInit {
        _type: little_endian::U32::new(MSG_FIRST),
        sender: little_endian::U32::new(sender),
        ephemeral_key: epk_i.to_bytes(),
        static_key,
        timestamp,
        mac1: Default::default(),
        mac2: Default::default(),
    };
    let offset = core::mem::offset_of!(HandshakeInit, mac1);
    msg.mac1.0 = compute_mac1(&msg.as_bytes()[..offset], &peer.mac1_key);
    // mac2 stays zero: cookie-signed handshakes are produced outside the enclave.

    Ok((msg, *hs.chain(), *hs.hash()))
}

/// Responder — first half of `consume_init`. Verifies `mac1` and decrypts
/// the initiator's static key, returning it so the caller can look the
/// peer up (by static key, and by equality against any caller-asserted
/// peer) before the second half decrypts the replay-sensitive timestamp.
pub fn decrypt_handshake_init(
    receiver: &StaticInitiatorConfig,
    msg: &HandshakeInit,
) -> Result<DecryptedHandshakeInit, CryptoError> {
    verify_mac1_init(msg, &receiver.mac1_key)?;

    let mut hs = HandshakeState::default();
    hs.mix_hash(receiver.public_key.as_bytes());

    hs.mix_chain(&msg.ephemeral_key);
    hs.mix_hash(&msg.ephemeral_key);

    let epk_i = PublicKey::from(msg.ephemeral_key);
    let k = hs.mix_key_dh(&receiver.private_key, &epk_i)?;

    let mut static_key = msg.static_key;
    prim::open_static_key(&mut static_key, &mut hs, &k)?;
    let spk_i = PublicKey::from(static_key.msg);

    Ok(DecryptedHandshakeInit {
        sender: msg.sender.get(),
        initiator_ephemeral: epk_i,
        initiator_static: spk_i,
        timestamp: [0; 12],
        chain: *hs.chain(),
        hash: *hs.hash(),
    })
}

/// Second half of `consume_init`: decrypts the timestamp using the peer's
/// precomputed `dhsecret = X25519(S_priv, R_pub)`. Callers must apply the
/// strictly-greater replay check against the returned timestamp themselves
/// before trusting this handshake (see `rustyguard-enclave`'s
/// `consume_init`) — this function only performs the decryption.
pub fn finish_decrypt_handshake_init(
    decrypted: &mut DecryptedHandshakeInit,
    msg: &HandshakeInit,
    dhsecret: &[u8; 32],
) -> Result<(), CryptoError> {
    let mut hs = HandshakeState::restore(decrypted.chain, decrypted.hash);

    let k = hs.mix_key_dh_raw(dhsecret);
    let mut timestamp = msg.timestamp;
    prim::open_timestamp(&mut timestamp, &mut hs, &k)?;

    decrypted.timestamp = timestamp.msg;
    decrypted.chain = *hs.chain();
    decrypted.hash = *hs.hash();
    Ok(())
}

/// Responder — `create_response`. Consumes a successfully-authenticated
/// `DecryptedHandshakeInit`, generates a new ephemeral keypair, and
/// completes the Noise transcript through `e, ee, se, psk`.
pub fn encrypt_handshake_resp(
    data: &DecryptedHandshakeInit,
    esk_r: &StaticSecret,
    peer: &StaticPeerConfig,
    sender: u32,
) -> Result<(HandshakeResp, [u8; 32]), CryptoError> {
    let mut hs = HandshakeState::restore(data.chain, data.hash);

    let epk_r = PublicKey::from(esk_r);
    hs.mix_chain(epk_r.as_bytes());
    hs.mix_hash(epk_r.as_bytes());

    hs.mix_dh(esk_r, &data.initiator_ephemeral)?;
    hs.mix_dh(esk_r, &data.initiator_static)?;

    let k = hs.mix_key_and_hash(&peer.preshared_key);
    let empty = prim::seal_empty([], &mut hs, &k);

    let mut msg = HandshakeResp {
        _type: little_endian::U32::new(MSG_SECOND),
        sender: little_endian::U32::new(sender),
        receiver: little_endian::U32::new(data.sender),
        ephemeral_key: epk_r.to_bytes(),
        empty,
        mac1: Default::default(),
        mac2: Default::default(),
    };
    let offset = core::mem::offset_of!(HandshakeResp, mac1);
    msg.mac1.0 = compute_mac1(&msg.as_bytes()[..offset], &peer.mac1_key);

    Ok((msg, *hs.chain()))
}

/// Initiator — `consume_response`. Symmetric to `create_response`, using
/// `esk_i` and the local static key for the two DHs. On success returns
/// the final chaining key for the caller to commit and split.
pub fn decrypt_handshake_resp(
    msg: &HandshakeResp,
    chain: [u8; 32],
    hash_: [u8; 32],
    initiator: &StaticInitiatorConfig,
    peer: &StaticPeerConfig,
    esk_i: &StaticSecret,
) -> Result<[u8; 32], CryptoError> {
    verify_mac1_resp(msg, &initiator.mac1_key)?;

    let mut hs = HandshakeState::restore(chain, hash_);

    let epk_r = PublicKey::from(msg.ephemeral_key);
    hs.mix_chain(epk_r.as_bytes());
    hs.mix_hash(epk_r.as_bytes());

    hs.mix_dh(esk_i, &epk_r)?;
    hs.mix_dh(&initiator.private_key, &epk_r)?;

    let k = hs.mix_key_and_hash(&peer.preshared_key);
    let mut empty = msg.empty;
    prim::open_empty(&mut empty, &mut hs, &k)?;

    Ok(*hs.chain())
}

/// `KDF_2(empty, c)`: the final transport-key split, handed to the
/// Interface and then forgotten by the Enclave. `responder` selects which
/// of the two KDF outputs is `send` vs. `recv`.
pub fn split_session_keys(chain: [u8; 32], responder: bool) -> (Key, Key) {
    let hs = HandshakeState::restore(chain, [0; 32]);
    let (a, b) = hs.split();
    if responder {
        (b, a)
    } else {
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> (StaticSecret, PublicKey) {
        let sk = StaticSecret::random_from_rng(OsRng);
        let pk = PublicKey::from(&sk);
        (sk, pk)
    }

    fn run_handshake() -> ([u8; 32], [u8; 32]) {
        let (i_priv, i_pub) = keypair();
        let (r_priv, r_pub) = keypair();

        let initiator_cfg = StaticInitiatorConfig::new(i_priv);
        let responder_cfg = StaticInitiatorConfig::new(r_priv);

        let peer_of_responder = StaticPeerConfig::new(r_pub, None);
        let peer_of_initiator = StaticPeerConfig::new(i_pub, None);

        let esk_i = StaticSecret::random_from_rng(OsRng);
        let esk_r = StaticSecret::random_from_rng(OsRng);

        let (init_msg, i_chain_after_init, i_hash_after_init) =
            encrypt_handshake_init(&initiator_cfg, &peer_of_responder, &esk_i, Tai64N::now(), 42)
                .unwrap();

        let mut decrypted = decrypt_handshake_init(&responder_cfg, &init_msg).unwrap();
        assert_eq!(decrypted.initiator_static.as_bytes(), i_pub.as_bytes());

        let dhsecret = *responder_cfg.private_key.diffie_hellman(&i_pub).as_bytes();
        finish_decrypt_handshake_init(&mut decrypted, &init_msg, &dhsecret).unwrap();

        let (resp_msg, r_chain_final) =
            encrypt_handshake_resp(&decrypted, &esk_r, &peer_of_initiator, 99).unwrap();

        let i_chain_final = decrypt_handshake_resp(
            &resp_msg,
            i_chain_after_init,
            i_hash_after_init,
            &initiator_cfg,
            &peer_of_responder,
            &esk_i,
        )
        .unwrap();

        (i_chain_final, r_chain_final)
    }

    #[test]
    fn full_handshake_round_trip_yields_matching_session_keys() {
        let (i_chain_final, r_chain_final) = run_handshake();

        let (i_send, i_recv) = split_session_keys(i_chain_final, false);
        let (r_recv, r_send) = split_session_keys(r_chain_final, true);

        assert_eq!(i_send, r_recv);
        assert_eq!(i_recv, r_send);
    }

    #[test]
    fn tampered_mac1_is_rejected() {
        let (i_priv, _i_pub) = keypair();
        let (_r_priv, r_pub) = keypair();
        let initiator_cfg = StaticInitiatorConfig::new(i_priv);
        let peer = StaticPeerConfig::new(r_pub, None);
        let esk_i = StaticSecret::random_from_rng(OsRng);

        let (mut msg, ..) =
            encrypt_handshake_init(&initiator_cfg, &peer, &esk_i, Tai64N::now(), 1).unwrap();
        msg.mac1.0[0] ^= 1;

        assert_eq!(
            verify_mac1_init(&msg, &peer.mac1_key),
            Err(CryptoError::Rejected)
        );
    }

    #[test]
    fn wrong_responder_key_rejects_the_static_key_envelope() {
        let (i_priv, _i_pub) = keypair();
        let (_r_priv, r_pub) = keypair();
        let (junk_priv, _junk_pub) = keypair();
        let initiator_cfg = StaticInitiatorConfig::new(i_priv);
        let responder_cfg = StaticInitiatorConfig::new(junk_priv);
        let peer = StaticPeerConfig::new(r_pub, None);
        let esk_i = StaticSecret::random_from_rng(OsRng);

        let (msg, ..) =
            encrypt_handshake_init(&initiator_cfg, &peer, &esk_i, Tai64N::now(), 1).unwrap();

        // responder_cfg holds the wrong private key: `es` DH mismatches,
        // so opening `enc_static` must fail rather than silently decrypt
        // garbage.
        assert!(decrypt_handshake_init(&responder_cfg, &msg).is_err());
    }
}
