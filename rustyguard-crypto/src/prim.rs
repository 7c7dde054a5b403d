//! Noise symmetric-state algebra and the raw crypto primitives it is built
//! from: BLAKE2s hash/HMAC, the Noise `KDF_n` chain, X25519 DH, and
//! ChaCha20-Poly1305 seal/open with the fixed all-zero handshake nonce.
//!
//! Nothing here allocates. Every KDF temporary is a stack array and is
//! zeroised by `HandshakeState`'s `Drop` impl (via `ZeroizeOnDrop`) or
//! explicitly once consumed.

use blake2::digest::{Digest, Mac as _};
use blake2::{Blake2s256, Blake2sMac256};
use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};
use hmac::SimpleHmac;
use rustyguard_types::{EncryptedEmpty, EncryptedPublicKey, EncryptedTimestamp, Tag as WireTag};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

pub type Key = chacha20poly1305::Key;
pub type EncryptionKey = Key;
pub type DecryptionKey = Key;
pub type Mac = [u8; 16];

/// `Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s` construction label, hashed.
const CONSTRUCTION_HASH: [u8; 32] = [
    96, 226, 109, 174, 243, 39, 239, 192, 46, 195, 53, 226, 160, 37, 210, 208, 22, 235, 66, 6, 248,
    114, 119, 245, 45, 56, 209, 152, 139, 120, 205, 54,
];
/// `Hash(CONSTRUCTION_HASH || "WireGuard v1 zx2c4 Jason@zx2c4.com")`.
const IDENTIFIER_HASH: [u8; 32] = [
    34, 17, 179, 97, 8, 26, 197, 102, 105, 18, 67, 219, 69, 138, 213, 50, 45, 156, 108, 102, 34,
    147, 232, 183, 14, 225, 156, 101, 186, 7, 158, 243,
];
pub const LABEL_MAC1: [u8; 8] = *b"mac1----";
pub const LABEL_COOKIE: [u8; 8] = *b"cookie--";

/// The fixed all-zero nonce used for every handshake AEAD operation. The
/// data plane uses a counter nonce instead; this module never touches it.
fn zero_nonce() -> chacha20poly1305::Nonce {
    chacha20poly1305::Nonce::default()
}

pub fn hash<const M: usize>(msg: [&[u8]; M]) -> [u8; 32] {
    let mut digest = Blake2s256::default();
    for part in msg {
        digest.update(part);
    }
    digest.finalize().into()
}

pub fn mac(key: &[u8], msg: &[u8]) -> Mac {
    let mut m = Blake2sMac256::new_from_slice(key).expect("key is a valid BLAKE2s MAC key length");
    m.update(msg);
    let mut out = Mac::default();
    m.finalize_into((&mut out).into());
    out
}

fn hmac_blake2s(key: &[u8], msg: &[&[u8]]) -> [u8; 32] {
    let mut h =
        <SimpleHmac<Blake2s256> as hmac::Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    for part in msg {
        h.update(part);
    }
    h.finalize().into_bytes().into()
}

/// `KDF_n`: standard Noise HKDF-expand over BLAKE2s, producing `N` chained
/// 32-byte outputs from `key` and optional `input`. `1 <= N <= 255`.
fn kdf<const N: usize>(key: &[u8], input: &[u8]) -> [[u8; 32]; N] {
    assert!(N >= 1 && N <= 255);

    let mut t0 = hmac_blake2s(key, &[input]);
    let mut out = [[0u8; 32]; N];
    out[0] = hmac_blake2s(&t0, &[&[1]]);
    for i in 1..N {
        let ctr = [(i + 1) as u8];
        out[i] = hmac_blake2s(&t0, &[&out[i - 1], &ctr]);
    }
    t0.zeroize();
    out
}

/// Fails with [`CryptoError::DhFailed`] if the shared secret is the
/// all-zero point (a low-order/identity public key was supplied).
fn dh(sk: &StaticSecret, pk: &PublicKey) -> Result<[u8; 32], CryptoError> {
    let shared = sk.diffie_hellman(pk);
    if !shared.was_contributory() {
        return Err(CryptoError::DhFailed);
    }
    Ok(*shared.as_bytes())
}

/// The Noise symmetric state: running chaining key `c` and transcript hash
/// `h`. Reset to the construction/identifier hashes at the start of every
/// handshake; every other field of the per-peer handshake state lives in
/// `rustyguard-enclave`, outside this crate.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HandshakeState {
    chain: [u8; 32],
    hash: [u8; 32],
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self {
            chain: CONSTRUCTION_HASH,
            hash: IDENTIFIER_HASH,
        }
    }
}

impl HandshakeState {
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn chain(&self) -> &[u8; 32] {
        &self.chain
    }

    /// Restore a previously-committed `(chain, hash)` pair, e.g. when
    /// resuming a responder's state between `consume_init` and
    /// `create_response`.
    pub fn restore(chain: [u8; 32], hash: [u8; 32]) -> Self {
        Self { chain, hash }
    }

    /// `MixHash(h, data) := h <- Hash(h || data)`.
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.hash = hash([&self.hash, data]);
    }

    /// `MixKey(c, input) := c <- KDF_1(input, c)`.
    pub fn mix_chain(&mut self, input: &[u8]) {
        let [c] = kdf::<1>(&self.chain, input);
        self.chain = c;
    }

    /// `MixKey` where the input is a DH output; discards the derived key
    /// (used for the Noise `ee`/`se` steps, which only advance `c`).
    pub fn mix_dh(&mut self, sk: &StaticSecret, pk: &PublicKey) -> Result<(), CryptoError> {
        let shared = dh(sk, pk)?;
        self.mix_chain(&shared);
        Ok(())
    }

    /// DH followed by a 2-output `KDF_2`: advances `c` and returns the AEAD
    /// key (used for the Noise `es`/`ss` steps).
    pub fn mix_key_dh(&mut self, sk: &StaticSecret, pk: &PublicKey) -> Result<Key, CryptoError> {
        let shared = dh(sk, pk)?;
        let [c, k] = kdf::<2>(&self.chain, &shared);
        self.chain = c;
        Ok(k.into())
    }

    /// Like [`mix_key_dh`](Self::mix_key_dh) but the DH has already been
    /// performed (the peer's precomputed `dhsecret`, reused across every
    /// handshake with that peer rather than recomputed from the static
    /// keys each time).
    pub fn mix_key_dh_raw(&mut self, shared: &[u8; 32]) -> Key {
        let [c, k] = kdf::<2>(&self.chain, shared);
        self.chain = c;
        k.into()
    }

    /// `MixKeyAndHash`: 3-output `KDF_3` over `input` (the PSK), mixing the
    /// middle output into the transcript hash and returning the AEAD key.
    pub fn mix_key_and_hash(&mut self, input: &[u8]) -> Key {
        let [c, tau, k] = kdf::<3>(&self.chain, input);
        self.chain = c;
        self.mix_hash(&tau);
        k.into()
    }

    /// `KDF_2(empty, c)`, consuming the state: the final transport key
    /// split. Caller assigns `(out_1, out_2)` to `(send, recv)` or
    /// `(recv, send)` depending on role.
    pub fn split(mut self) -> (Key, Key) {
        let [k1, k2] = kdf::<2>(&self.chain, &[]);
        self.chain.zeroize();
        self.hash.zeroize();
        (k1.into(), k2.into())
    }
}

macro_rules! aead_envelope {
    ($ty:ident, $n:literal, $encrypt:ident, $decrypt:ident) => {
        pub fn $encrypt(mut msg: [u8; $n], hs: &mut HandshakeState, key: &EncryptionKey) -> $ty {
            let aad = hs.hash;
            let tag = ChaCha20Poly1305::new(key)
                .encrypt_in_place_detached(&zero_nonce(), &aad, &mut msg)
                .expect("handshake payload fits in a single AEAD block");
            let out = $ty {
                msg,
                tag: WireTag(tag.into()),
            };
            hs.mix_hash(zerocopy::AsBytes::as_bytes(&out));
            out
        }

        pub fn $decrypt(
            env: &mut $ty,
            hs: &mut HandshakeState,
            key: &DecryptionKey,
        ) -> Result<(), CryptoError> {
            let aad = hs.hash;
            hs.mix_hash(zerocopy::AsBytes::as_bytes(&*env));
            let tag = chacha20poly1305::Tag::from(env.tag.0);
            ChaCha20Poly1305::new(key)
                .decrypt_in_place_detached(&zero_nonce(), &aad, &mut env.msg, &tag)
                .map_err(|_| CryptoError::DecryptionError)
        }
    };
}

aead_envelope!(EncryptedPublicKey, 32, seal_static_key, open_static_key);
aead_envelope!(EncryptedTimestamp, 12, seal_timestamp, open_timestamp);
aead_envelope!(EncryptedEmpty, 0, seal_empty, open_empty);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_and_identifier_hashes() {
        let c = hash([b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s"]);
        let h = hash([&c, b"WireGuard v1 zx2c4 Jason@zx2c4.com"]);
        assert_eq!(c, CONSTRUCTION_HASH);
        assert_eq!(h, IDENTIFIER_HASH);
    }

    #[test]
    fn kdf_is_deterministic_and_chains() {
        let key = [7u8; 32];
        let out1: [[u8; 32]; 2] = kdf(&key, b"input");
        let out2: [[u8; 32]; 2] = kdf(&key, b"input");
        assert_eq!(out1, out2);
        assert_ne!(out1[0], out1[1]);
    }

    #[test]
    fn dh_rejects_the_identity_point() {
        let sk = StaticSecret::from([1u8; 32]);
        let zero_point = PublicKey::from([0u8; 32]);
        assert!(matches!(dh(&sk, &zero_point), Err(CryptoError::DhFailed)));
    }
}
