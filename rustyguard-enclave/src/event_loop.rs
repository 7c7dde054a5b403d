//! The message dispatcher's event loop (§4.5, §5): single-threaded,
//! readiness-based, one `mio::net::UnixDatagram` per Interface plus one
//! for the Proxy. Every dispatched message is processed to completion,
//! including emitting every reply frame, before the next is read; an
//! `EOF`/closed descriptor drops that sibling and the loop continues
//! servicing the rest.

use std::io;
use std::net::SocketAddr;

use mio::net::UnixDatagram;
use mio::{Events, Interest, Poll, Token};
use tracing::{error, info, warn};
use zerocopy::{AsBytes, FromBytes};

use crate::dispatch::{self, Reply};
use crate::error::{BootstrapError, DispatchError};
use crate::framing::{
    ConnReq, ControlTag, InterfaceWgInit, InterfaceWgResp, ProxyWgInit, ProxyWgResp, ReqWgInit,
    SessKeys,
};
use crate::registry::Registry;
use crate::signals::Signals;

const SIGNAL_TOKEN: Token = Token(0);
const PROXY_TOKEN: Token = Token(1);
const INTERFACE_TOKEN_BASE: usize = 2;

/// Largest frame this process will ever need to hold: a `HandshakeInit`
/// (148 bytes) plus the 5-byte control header plus the widest address
/// pair a Proxy frame adds. One scratch buffer is reused across every
/// read, per §5's shared-buffer policy.
const MAX_FRAME: usize = 256;

fn encode_addr(buf: &mut [u8], addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(v4) => {
            buf[0] = 4;
            buf[1..5].copy_from_slice(&v4.ip().octets());
            buf[5..7].copy_from_slice(&v4.port().to_le_bytes());
            7
        }
        SocketAddr::V6(v6) => {
            buf[0] = 6;
            buf[1..17].copy_from_slice(&v6.ip().octets());
            buf[17..19].copy_from_slice(&v6.port().to_le_bytes());
            19
        }
    }
}

fn decode_addr(buf: &[u8]) -> Option<(SocketAddr, usize)> {
    match buf.first()? {
        4 => {
            let ip = std::net::Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
            let port = u16::from_le_bytes([buf[5], buf[6]]);
            Some((SocketAddr::from((ip, port)), 7))
        }
        6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(buf.get(1..17)?);
            let ip = std::net::Ipv6Addr::from(octets);
            let port = u16::from_le_bytes([*buf.get(17)?, *buf.get(18)?]);
            Some((SocketAddr::from((ip, port)), 19))
        }
        _ => None,
    }
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    signals: Signals,
    /// `None` once the proxy descriptor has hit EOF or a hard error and
    /// been deregistered; the loop keeps running for the remaining
    /// siblings.
    proxy: Option<UnixDatagram>,
    /// Indexed by `interface_id`, fixed in length for the process
    /// lifetime so token arithmetic stays stable; a closed interface's
    /// slot becomes `None` rather than shifting the others.
    interfaces_io: Vec<Option<UnixDatagram>>,
    registry: Registry,
}

impl EventLoop {
    pub fn new(
        mut signals: Signals,
        proxy: UnixDatagram,
        interfaces_io: Vec<UnixDatagram>,
        registry: Registry,
    ) -> Result<Self, BootstrapError> {
        let poll = Poll::new().map_err(BootstrapError::Io)?;
        signals.register(poll.registry(), SIGNAL_TOKEN)?;

        let mut proxy = proxy;
        poll.registry()
            .register(&mut proxy, PROXY_TOKEN, Interest::READABLE)
            .map_err(BootstrapError::Io)?;

        let mut interfaces_io = interfaces_io;
        for (i, sock) in interfaces_io.iter_mut().enumerate() {
            poll.registry()
                .register(sock, Token(INTERFACE_TOKEN_BASE + i), Interest::READABLE)
                .map_err(BootstrapError::Io)?;
        }

        Ok(Self {
            poll,
            events: Events::with_capacity(128),
            signals,
            proxy: Some(proxy),
            interfaces_io: interfaces_io.into_iter().map(Some).collect(),
            registry,
        })
    }

    /// Deregisters and drops the proxy descriptor so the loop's next
    /// `poll` call never reports it again.
    fn close_proxy(&mut self) {
        if let Some(mut sock) = self.proxy.take() {
            let _ = self.poll.registry().deregister(&mut sock);
        }
    }

    /// Deregisters and drops one interface's descriptor, leaving its slot
    /// `None` so the other interfaces' tokens stay valid.
    fn close_interface(&mut self, interface_id: u32) {
        if let Some(slot) = self.interfaces_io.get_mut(interface_id as usize) {
            if let Some(mut sock) = slot.take() {
                let _ = self.poll.registry().deregister(&mut sock);
            }
        }
    }

    pub fn run(&mut self) -> Result<(), BootstrapError> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BootstrapError::Io(e)),
            }

            let (terminate, report_stats) = self.signals.drain();
            if report_stats {
                info!(
                    interfaces = self.registry.interfaces.len(),
                    "statistics requested"
                );
            }
            if terminate {
                info!("termination signal received, exiting event loop");
                return Ok(());
            }

            let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in tokens {
                if token == SIGNAL_TOKEN {
                    continue;
                } else if token == PROXY_TOKEN {
                    self.service_proxy();
                } else if token.0 >= INTERFACE_TOKEN_BASE {
                    self.service_interface((token.0 - INTERFACE_TOKEN_BASE) as u32);
                }
            }
        }
    }

    fn send_replies(&mut self, interface_id: u32, replies: Vec<Reply>) {
        let Some(Some(sock)) = self.interfaces_io.get(interface_id as usize) else {
            return;
        };
        let mut buf = [0u8; MAX_FRAME];
        for reply in replies {
            let n = match &reply {
                Reply::WgInit(msg) => {
                    buf[0] = ControlTag::MsgWgInit as u8;
                    let bytes = msg.as_bytes();
                    buf[1..1 + bytes.len()].copy_from_slice(bytes);
                    1 + bytes.len()
                }
                Reply::WgResp(msg) => {
                    buf[0] = ControlTag::MsgWgResp as u8;
                    let bytes = msg.as_bytes();
                    buf[1..1 + bytes.len()].copy_from_slice(bytes);
                    1 + bytes.len()
                }
                Reply::ConnReq(ConnReq {
                    peer_id,
                    local_addr,
                    foreign_addr,
                }) => {
                    buf[0] = ControlTag::MsgConnReq as u8;
                    buf[1..5].copy_from_slice(&peer_id.to_le_bytes());
                    let mut off = 5;
                    off += encode_addr(&mut buf[off..], local_addr);
                    off += encode_addr(&mut buf[off..], foreign_addr);
                    off
                }
                Reply::SessKeys(SessKeys {
                    peer_id,
                    local_sessid,
                    remote_sessid,
                    send_key,
                    recv_key,
                }) => {
                    buf[0] = ControlTag::MsgSessKeys as u8;
                    buf[1..5].copy_from_slice(&peer_id.to_le_bytes());
                    buf[5..9].copy_from_slice(&local_sessid.to_le_bytes());
                    buf[9..13].copy_from_slice(&remote_sessid.to_le_bytes());
                    buf[13..45].copy_from_slice(send_key);
                    buf[45..77].copy_from_slice(recv_key);
                    77
                }
            };
            if let Err(e) = sock.send(&buf[..n]) {
                error!(interface_id, error = %e, "failed to send reply to interface, exiting");
            }
        }
    }

    fn service_proxy(&mut self) {
        let mut buf = [0u8; MAX_FRAME];
        loop {
            let Some(sock) = self.proxy.as_ref() else {
                return;
            };
            let result = sock.recv(&mut buf);
            match result {
                Ok(0) => {
                    warn!("proxy descriptor returned EOF, closing");
                    self.close_proxy();
                    return;
                }
                Ok(n) => self.process_proxy_frame(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!(error = %e, "error reading from proxy descriptor, closing");
                    self.close_proxy();
                    return;
                }
            }
        }
    }

    fn process_proxy_frame(&mut self, frame: &[u8]) {
        let Some((tag_byte, rest)) = frame.split_first() else {
            return;
        };
        let Some(tag) = ControlTag::from_u8(*tag_byte) else {
            warn!(tag = *tag_byte, "unrecognised proxy frame type");
            return;
        };
        if rest.len() < 4 {
            warn!("truncated proxy frame");
            return;
        }
        let interface_id = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        let Some((local_addr, used)) = decode_addr(&rest[4..]) else {
            warn!("malformed local address in proxy frame");
            return;
        };
        let Some((foreign_addr, used2)) = decode_addr(&rest[4 + used..]) else {
            warn!("malformed foreign address in proxy frame");
            return;
        };
        let payload = &rest[4 + used + used2..];

        let result = match tag {
            ControlTag::MsgWgInit => rustyguard_types::HandshakeInit::read_from(payload)
                .ok_or(DispatchError::Framing)
                .and_then(|msg| {
                    dispatch::handle_proxy_wg_init(
                        &mut self.registry,
                        ProxyWgInit {
                            interface_id,
                            local_addr,
                            foreign_addr,
                            msg,
                        },
                    )
                }),
            ControlTag::MsgWgResp => rustyguard_types::HandshakeResp::read_from(payload)
                .ok_or(DispatchError::Framing)
                .and_then(|msg| {
                    dispatch::handle_proxy_wg_resp(
                        &mut self.registry,
                        ProxyWgResp {
                            interface_id,
                            local_addr,
                            foreign_addr,
                            msg,
                        },
                    )
                }),
            _ => Err(DispatchError::Framing),
        };

        match result {
            Ok(replies) => self.send_replies(interface_id, replies),
            Err(e) => warn!(interface_id, error = ?e, "rejected proxy handshake frame"),
        }
    }

    fn service_interface(&mut self, interface_id: u32) {
        let mut buf = [0u8; MAX_FRAME];
        loop {
            let Some(Some(sock)) = self.interfaces_io.get(interface_id as usize) else {
                return;
            };
            let result = sock.recv(&mut buf);
            match result {
                Ok(0) => {
                    warn!(interface_id, "interface descriptor returned EOF, closing");
                    self.close_interface(interface_id);
                    return;
                }
                Ok(n) => self.process_interface_frame(interface_id, &buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!(interface_id, error = %e, "error reading from interface descriptor, closing");
                    self.close_interface(interface_id);
                    return;
                }
            }
        }
    }

    fn process_interface_frame(&mut self, interface_id: u32, frame: &[u8]) {
        let Some((tag_byte, rest)) = frame.split_first() else {
            return;
        };
        let Some(tag) = ControlTag::from_u8(*tag_byte) else {
            warn!(tag = *tag_byte, "unrecognised interface frame type");
            return;
        };
        if rest.len() < 4 {
            warn!("truncated interface frame");
            return;
        }
        let peer_id = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        let payload = &rest[4..];

        let result = match tag {
            ControlTag::MsgWgInit => rustyguard_types::HandshakeInit::read_from(payload)
                .ok_or(DispatchError::Framing)
                .and_then(|msg| {
                    dispatch::handle_interface_wg_init(
                        &mut self.registry,
                        interface_id,
                        InterfaceWgInit { peer_id, msg },
                    )
                }),
            ControlTag::MsgWgResp => rustyguard_types::HandshakeResp::read_from(payload)
                .ok_or(DispatchError::Framing)
                .and_then(|msg| {
                    dispatch::handle_interface_wg_resp(
                        &mut self.registry,
                        interface_id,
                        InterfaceWgResp { peer_id, msg },
                    )
                }),
            ControlTag::MsgReqWgInit => {
                dispatch::handle_req_wg_init(&mut self.registry, interface_id, ReqWgInit { peer_id })
            }
            _ => Err(DispatchError::Framing),
        };

        match result {
            Ok(replies) => self.send_replies(interface_id, replies),
            Err(e) => warn!(interface_id, peer_id, error = ?e, "rejected interface handshake frame"),
        }
    }
}
