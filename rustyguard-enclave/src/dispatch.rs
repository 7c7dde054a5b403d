//! The message dispatcher (§4.5): dispatches framed messages from an
//! Interface descriptor or the Proxy descriptor by subtype, driving the
//! handshake state machine and collecting the reply frames to send back.

use tracing::warn;

use crate::error::DispatchError;
use crate::framing::{ConnReq, InterfaceWgInit, InterfaceWgResp, ProxyWgInit, ProxyWgResp, ReqWgInit, SessKeys};
use crate::handshake;
use crate::registry::Registry;

/// Replies the dispatcher wants sent back to the named Interface, in
/// order. `peer_id` addresses which Interface (via `registry`) the reply
/// belongs to is carried by the caller, not this type.
pub enum Reply {
    WgInit(rustyguard_types::HandshakeInit),
    WgResp(rustyguard_types::HandshakeResp),
    ConnReq(ConnReq),
    SessKeys(SessKeys),
}

/// `MSGWGINIT` / `MSGWGRESP` / `MSGREQWGINIT` arriving from an Interface.
pub fn handle_interface_wg_init(
    registry: &mut Registry,
    interface_id: u32,
    frame: InterfaceWgInit,
) -> Result<Vec<Reply>, DispatchError> {
    let iface = registry
        .interface(interface_id)
        .ok_or(DispatchError::UnknownInterface(interface_id))?;
    let (peer_id, decrypted) =
        handshake::consume_init_start(iface, &frame.msg, Some(frame.peer_id))?;

    let iface = registry
        .interface_mut(interface_id)
        .ok_or(DispatchError::UnknownInterface(interface_id))?;
    if let Err(e) = handshake::consume_init_finish(iface, peer_id, &frame.msg, decrypted) {
        warn!(interface_id, peer_id, error = ?e, "rejected handshake init from interface");
        return Err(e);
    }

    let resp = handshake::create_response(iface, peer_id)?;
    let (send, recv) = handshake::session_keys(iface, peer_id, true)?;
    let peer = iface.peers.get(peer_id).expect("peer_id just resolved");

    Ok(vec![
        Reply::SessKeys(SessKeys {
            peer_id,
            local_sessid: peer.hs.sessid,
            remote_sessid: peer.hs.peersessid,
            send_key: send,
            recv_key: recv,
        }),
        Reply::WgResp(resp),
    ])
}

pub fn handle_interface_wg_resp(
    registry: &mut Registry,
    interface_id: u32,
    frame: InterfaceWgResp,
) -> Result<Vec<Reply>, DispatchError> {
    let iface = registry
        .interface_mut(interface_id)
        .ok_or(DispatchError::UnknownInterface(interface_id))?;

    let peer_id = iface
        .find_peer_by_sessid(frame.msg.receiver.get())
        .ok_or(DispatchError::UnknownSessionId(frame.msg.receiver.get()))?;

    handshake::consume_response(iface, peer_id, &frame.msg)?;
    let (send, recv) = handshake::session_keys(iface, peer_id, false)?;
    let peer = iface.peers.get(peer_id).expect("peer_id just resolved");

    Ok(vec![Reply::SessKeys(SessKeys {
        peer_id,
        local_sessid: peer.hs.sessid,
        remote_sessid: peer.hs.peersessid,
        send_key: send,
        recv_key: recv,
    })])
}

pub fn handle_req_wg_init(
    registry: &mut Registry,
    interface_id: u32,
    frame: ReqWgInit,
) -> Result<Vec<Reply>, DispatchError> {
    let iface = registry
        .interface_mut(interface_id)
        .ok_or(DispatchError::UnknownInterface(interface_id))?;
    let msg = handshake::create_init(iface, frame.peer_id)?;
    Ok(vec![Reply::WgInit(msg)])
}

/// A handshake init relayed by the Proxy: the peer is unknown until the
/// static key decrypts, so every rejection here happens before any
/// `peer_id` exists to log against.
pub fn handle_proxy_wg_init(
    registry: &mut Registry,
    frame: ProxyWgInit,
) -> Result<Vec<Reply>, DispatchError> {
    if !registry.valid_interface_id(frame.interface_id) {
        return Err(DispatchError::UnknownInterface(frame.interface_id));
    }

    let iface = registry.interface(frame.interface_id).expect("checked above");
    let (peer_id, decrypted) = handshake::consume_init_start(iface, &frame.msg, None)?;

    let iface = registry.interface_mut(frame.interface_id).expect("checked above");
    handshake::consume_init_finish(iface, peer_id, &frame.msg, decrypted)?;

    let resp = handshake::create_response(iface, peer_id)?;
    let (send, recv) = handshake::session_keys(iface, peer_id, true)?;
    let peer = iface.peers.get(peer_id).expect("peer_id just resolved");

    Ok(vec![
        Reply::ConnReq(ConnReq {
            peer_id,
            local_addr: frame.local_addr,
            foreign_addr: frame.foreign_addr,
        }),
        Reply::SessKeys(SessKeys {
            peer_id,
            local_sessid: peer.hs.sessid,
            remote_sessid: peer.hs.peersessid,
            send_key: send,
            recv_key: recv,
        }),
        Reply::WgResp(resp),
    ])
}

pub fn handle_proxy_wg_resp(
    registry: &mut Registry,
    frame: ProxyWgResp,
) -> Result<Vec<Reply>, DispatchError> {
    if !registry.valid_interface_id(frame.interface_id) {
        return Err(DispatchError::UnknownInterface(frame.interface_id));
    }

    let iface = registry
        .interface_mut(frame.interface_id)
        .expect("checked above");
    let peer_id = iface
        .find_peer_by_sessid(frame.msg.receiver.get())
        .ok_or(DispatchError::UnknownSessionId(frame.msg.receiver.get()))?;

    handshake::consume_response(iface, peer_id, &frame.msg)?;
    let (send, recv) = handshake::session_keys(iface, peer_id, false)?;
    let peer = iface.peers.get(peer_id).expect("peer_id just resolved");

    Ok(vec![
        Reply::ConnReq(ConnReq {
            peer_id,
            local_addr: frame.local_addr,
            foreign_addr: frame.foreign_addr,
        }),
        Reply::SessKeys(SessKeys {
            peer_id,
            local_sessid: peer.hs.sessid,
            remote_sessid: peer.hs.peersessid,
            send_key: send,
            recv_key: recv,
        }),
    ])
}
