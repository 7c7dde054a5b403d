#![no_std]

//! Fixed-width WireGuard wire structures shared by the handshake codec
//! (`rustyguard-crypto`) and the enclave's message dispatcher
//! (`rustyguard-enclave`). Every type here is `repr(C)`, `Unaligned`, and
//! zero-copy-castable: these bytes are read directly off an untrusted
//! descriptor, so there is no intermediate allocation or parsing step.

use zerocopy::{little_endian, AsBytes, FromBytes, FromZeroes, Unaligned};

pub const MSG_FIRST: u32 = 1;
pub const MSG_SECOND: u32 = 2;
pub const MSG_DATA: u32 = 3;
pub const MSG_COOKIE: u32 = 4;

/// Keyed BLAKE2s authenticator (`mac1`/`mac2` fields). Distinct from [`Tag`]
/// even though both are 16 bytes: a MAC authenticates a public prefix, an
/// AEAD tag authenticates ciphertext under a secret key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(transparent)]
pub struct Mac(pub [u8; 16]);

/// Poly1305 authenticator produced by ChaCha20-Poly1305.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(transparent)]
pub struct Tag(pub [u8; 16]);

/// Opaque DoS-mitigation cookie minted by the Proxy. The enclave never
/// computes or verifies these; the type exists so framing code can name it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(transparent)]
pub struct Cookie(pub [u8; 16]);

macro_rules! encrypted {
    ($name:ident, $n:literal) => {
        #[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
        #[repr(C)]
        pub struct $name {
            pub msg: [u8; $n],
            pub tag: Tag,
        }
    };
}

encrypted!(EncryptedPublicKey, 32);
encrypted!(EncryptedTimestamp, 12);
encrypted!(EncryptedEmpty, 0);

#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct EncryptedCookie {
    pub msg: Cookie,
    pub tag: Tag,
}

/// `MsgInit`, 148 bytes on the wire: the initiator's handshake message.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct HandshakeInit {
    pub _type: little_endian::U32,
    pub sender: little_endian::U32,
    pub ephemeral_key: [u8; 32],
    pub static_key: EncryptedPublicKey,
    pub timestamp: EncryptedTimestamp,
    pub mac1: Mac,
    pub mac2: Mac,
}

/// `MsgResp`, 92 bytes on the wire: the responder's handshake message.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct HandshakeResp {
    pub _type: little_endian::U32,
    pub sender: little_endian::U32,
    pub receiver: little_endian::U32,
    pub ephemeral_key: [u8; 32],
    pub empty: EncryptedEmpty,
    pub mac1: Mac,
    pub mac2: Mac,
}

/// `MsgCookie` reserved layout. Not processed by the enclave: the Proxy
/// mints and verifies these entirely outside the privilege boundary this
/// workspace implements. Kept only so the dispatcher can recognise and
/// ignore the wire type.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct CookieMessage {
    pub receiver: little_endian::U32,
    pub nonce: [u8; 24],
    pub cookie: EncryptedCookie,
    pub _reserved: [u8; 4],
}

/// `MsgDataHeader`, 16 bytes. Not processed by the enclave: transport-data
/// packets never cross into this process (see spec.md §1, Non-goals).
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
pub struct DataHeader {
    pub _type: little_endian::U32,
    pub receiver: little_endian::U32,
    pub counter: little_endian::U64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_sizes_match_spec() {
        assert_eq!(core::mem::size_of::<HandshakeInit>(), 148);
        assert_eq!(core::mem::size_of::<HandshakeResp>(), 92);
        assert_eq!(core::mem::size_of::<CookieMessage>(), 64);
        assert_eq!(core::mem::size_of::<DataHeader>(), 16);
    }

    #[test]
    fn mac_offsets_are_the_message_prefix() {
        // mac1 (and everything before it) is what gets MAC'd; mac2 covers
        // mac1 too. Both offsets must land right before their own field.
        assert_eq!(core::mem::offset_of!(HandshakeInit, mac1), 148 - 32);
        assert_eq!(core::mem::offset_of!(HandshakeInit, mac2), 148 - 16);
        assert_eq!(core::mem::offset_of!(HandshakeResp, mac1), 92 - 32);
        assert_eq!(core::mem::offset_of!(HandshakeResp, mac2), 92 - 16);
    }
}
