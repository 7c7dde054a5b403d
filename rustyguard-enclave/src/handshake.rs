//! The four handshake operations from §4.3, lifted from `rustyguard-crypto`'s
//! stateless primitives onto the stateful `Interface`/`Peer` model: session
//! id bookkeeping, the replay check, and the rule that a failing
//! authentication never mutates a peer's persistent fields.

use rand_core::{OsRng, RngCore};
use rustyguard_crypto::{DecryptedHandshakeInit, StaticSecret};
use rustyguard_types::{HandshakeInit, HandshakeResp};
use tai64::Tai64N;

use crate::error::DispatchError;
use crate::model::{Interface, Key, SessionId};

fn key_bytes(k: &rustyguard_crypto::Key) -> Key {
    let mut out = [0u8; 32];
    out.copy_from_slice(k);
    out
}

/// Initiator — `create_init`. Mutates `peer.hs` only on success: a fresh
/// ephemeral keypair and session id are generated and the peer's
/// handshake transcript is overwritten.
pub fn create_init(iface: &mut Interface, peer_id: u32) -> Result<HandshakeInit, DispatchError> {
    let esk_i = StaticSecret::random_from_rng(OsRng);
    let sessid: SessionId = OsRng.next_u32();

    let peer = iface.peers.get(peer_id).ok_or(DispatchError::UnknownPeer)?;
    let (msg, chain, hash) = rustyguard_crypto::encrypt_handshake_init(
        &iface.config,
        &peer.config,
        &esk_i,
        Tai64N::now(),
        sessid,
    )?;

    let peer = &mut iface.peers[peer_id];
    peer.hs.sessid = sessid;
    peer.hs.ephemeral_secret = Some(esk_i);
    peer.hs.commit(chain, hash);
    iface.bind_sessid(sessid, peer_id);

    Ok(msg)
}

/// Responder — first half of `consume_init` (§4.3 steps 1-5): verifies
/// `mac1`, decrypts the ephemeral and static keys, and resolves the peer.
/// Does not yet touch `recvts` or commit any state — the caller must call
/// [`consume_init_finish`] next, after resolving `dhsecret` for the peer
/// this decrypted to.
pub fn consume_init_start(
    iface: &Interface,
    msg: &HandshakeInit,
    asserted_peer_id: Option<u32>,
) -> Result<(u32, DecryptedHandshakeInit), DispatchError> {
    let decrypted = rustyguard_crypto::decrypt_handshake_init(&iface.config, msg)?;

    let peer_id = iface
        .find_peer_by_pubkey(&decrypted.initiator_static)
        .ok_or(DispatchError::UnknownPeer)?;

    if let Some(asserted) = asserted_peer_id {
        if asserted != peer_id {
            return Err(DispatchError::CrossPeerViolation);
        }
    }

    Ok((peer_id, decrypted))
}

/// Second half of `consume_init` (§4.3 steps 6-8): decrypts the timestamp
/// using the peer's precomputed `dhsecret`, enforces the strictly-greater
/// replay check, and — only on success — commits `recvts`, `peersessid`
/// and `initiator_ephemeral` into the peer's handshake state.
pub fn consume_init_finish(
    iface: &mut Interface,
    peer_id: u32,
    msg: &HandshakeInit,
    mut decrypted: DecryptedHandshakeInit,
) -> Result<(), DispatchError> {
    let dhsecret = iface.peers.get(peer_id).ok_or(DispatchError::UnknownPeer)?.dhsecret;
    rustyguard_crypto::finish_decrypt_handshake_init(&mut decrypted, msg, &dhsecret)?;

    let peer = &mut iface.peers[peer_id];
    if decrypted.timestamp <= peer.recvts {
        return Err(DispatchError::Replay);
    }

    peer.recvts = decrypted.timestamp;
    peer.hs.peersessid = decrypted.sender;
    peer.hs.initiator_ephemeral = Some(decrypted.initiator_ephemeral);
    peer.hs.commit(*decrypted.chain(), *decrypted.hash());
    Ok(())
}

/// Responder — `create_response`. Requires a peer whose handshake state
/// was just advanced by [`consume_init_finish`].
pub fn create_response(iface: &mut Interface, peer_id: u32) -> Result<HandshakeResp, DispatchError> {
    let esk_r = StaticSecret::random_from_rng(OsRng);
    let sessid: SessionId = OsRng.next_u32();

    let peer = iface.peers.get(peer_id).ok_or(DispatchError::UnknownPeer)?;
    let initiator_ephemeral = peer
        .hs
        .initiator_ephemeral
        .ok_or(DispatchError::Framing)?;

    let decrypted = DecryptedHandshakeInit::from_committed(
        peer.hs.peersessid,
        initiator_ephemeral,
        *peer.static_key(),
        peer.recvts,
        peer.hs.chain,
        peer.hs.hash,
    );

    let (msg, chain) =
        rustyguard_crypto::encrypt_handshake_resp(&decrypted, &esk_r, &peer.config, sessid)?;

    let peer = &mut iface.peers[peer_id];
    peer.hs.sessid = sessid;
    peer.hs.ephemeral_secret = Some(esk_r);
    peer.hs.chain = chain;
    iface.bind_sessid(sessid, peer_id);

    Ok(msg)
}

/// Initiator — `consume_response`, symmetric to `create_response`. The
/// caller looks `peer_id` up by `msg.receiver` before calling this.
pub fn consume_response(iface: &mut Interface, peer_id: u32, msg: &HandshakeResp) -> Result<(), DispatchError> {
    let peer = iface.peers.get(peer_id).ok_or(DispatchError::UnknownPeer)?;
    let esk_i = peer
        .hs
        .ephemeral_secret
        .as_ref()
        .ok_or(DispatchError::Framing)?
        .clone();

    let chain = rustyguard_crypto::decrypt_handshake_resp(
        msg,
        peer.hs.chain,
        peer.hs.hash,
        &iface.config,
        &peer.config,
        &esk_i,
    )?;

    let peer = &mut iface.peers[peer_id];
    peer.hs.chain = chain;
    Ok(())
}

/// §4.4: `(K_send, K_recv) = KDF_2(empty, c)`, role-dependent order.
pub fn session_keys(iface: &Interface, peer_id: u32, responder: bool) -> Result<(Key, Key), DispatchError> {
    let peer = iface.peers.get(peer_id).ok_or(DispatchError::UnknownPeer)?;
    let (a, b) = rustyguard_crypto::split_session_keys(peer.hs.chain, responder);
    Ok((key_bytes(&a), key_bytes(&b)))
}
