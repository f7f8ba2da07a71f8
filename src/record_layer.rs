//! Per-direction record protection.
//!
//! The teacher's `network/src/tls/record.rs` `RecordLayer`/`CipherState` pair
//! encrypts-then-authenticates with an inner content-type byte, which is
//! TLS 1.3's record shape. TLS 1.0 is the opposite order — MAC the
//! plaintext, pad, then encrypt the whole thing — and has no inner content
//! type, so this module keeps the teacher's "context holds the running
//! sequence number, encrypt/decrypt hand back fresh state" shape but
//! replaces the cipher pipeline entirely.

use crate::error::{EngineError, Result};
use crate::primitives::{zeroize_key_material, CryptoProvider, StreamCipherState};
use crate::suite::{BulkCipher, CipherSuite};
use crate::wire::ContentType;

/// The bulk-cipher half of a [`CryptoContext`]: either a running RC4
/// keystream or the 3DES-CBC key/IV pair (the chained IV, carried
/// block-to-block rather than re-derived).
enum BulkState {
    Stream(StreamCipherState),
    Block { key: Vec<u8>, iv: Vec<u8> },
}

/// Keying material and running sequence number for one direction of one
/// cipher epoch. A fresh context is installed at each ChangeCipherSpec;
/// there is exactly one live context per direction at a time.
pub struct CryptoContext {
    suite: CipherSuite,
    bulk: BulkState,
    mac_key: Vec<u8>,
    sequence: u64,
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        zeroize_key_material(&mut self.mac_key);
        if let BulkState::Block { key, .. } = &mut self.bulk {
            zeroize_key_material(key);
        }
    }
}

impl CryptoContext {
    /// Build a context from the key-block slice assigned to one direction
    /// (`mac_key`, `bulk_key`, `bulk_iv` in that order, sized per
    /// [`CipherSuite::mac_key_length`]/[`CipherSuite::key_length`]/
    /// [`CipherSuite::iv_length`]).
    pub fn new(
        provider: &dyn CryptoProvider,
        suite: CipherSuite,
        mac_key: Vec<u8>,
        bulk_key: Vec<u8>,
        bulk_iv: Vec<u8>,
    ) -> Self {
        let bulk = match suite.cipher() {
            Some(BulkCipher::Rc4) => BulkState::Stream(provider.stream_init(&bulk_key)),
            Some(BulkCipher::TripleDesEdeCbc) | None => BulkState::Block {
                key: bulk_key,
                iv: bulk_iv,
            },
        };
        CryptoContext {
            suite,
            bulk,
            mac_key,
            sequence: 0,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }
}

/// Whether a direction currently has a live cipher installed (before the
/// first ChangeCipherSpec, records travel in the clear).
pub enum CryptoState {
    None,
    Active(CryptoContext),
}

fn mac_input(seq: u64, content_type: ContentType, fragment: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(8 + 1 + 2 + 2 + fragment.len());
    input.extend_from_slice(&seq.to_be_bytes());
    input.push(content_type as u8);
    input.extend_from_slice(&crate::wire::TLS_1_0_VERSION);
    input.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
    input.extend_from_slice(fragment);
    input
}

/// Protect an outbound fragment: MAC it, pad it (block ciphers only), then
/// encrypt (RFC 2246 §6.2.3). Returns the ciphertext fragment to place in
/// the outbound record.
pub fn encrypt(
    provider: &dyn CryptoProvider,
    state: &mut CryptoState,
    content_type: ContentType,
    fragment: &[u8],
) -> Result<Vec<u8>> {
    let ctx = match state {
        CryptoState::None => return Ok(fragment.to_vec()),
        CryptoState::Active(ctx) => ctx,
    };

    let seq = ctx.next_sequence();
    let mac = provider.hmac_sha1(&ctx.mac_key, &mac_input(seq, content_type, fragment));

    let mut plaintext = Vec::with_capacity(fragment.len() + mac.len() + 1);
    plaintext.extend_from_slice(fragment);
    plaintext.extend_from_slice(&mac);

    match &mut ctx.bulk {
        BulkState::Stream(stream) => {
            provider.stream_apply(stream, &mut plaintext);
            Ok(plaintext)
        }
        BulkState::Block { key, iv } => {
            // TLS block padding: pad_length repeated (pad_length + 1) times,
            // chosen so the total length is a multiple of the block size.
            const BLOCK_SIZE: usize = 8;
            let pad_len = BLOCK_SIZE - 1 - (plaintext.len() % BLOCK_SIZE);
            plaintext.extend(std::iter::repeat(pad_len as u8).take(pad_len + 1));

            let (ciphertext, new_iv) = provider.block_encrypt(key, iv, &plaintext)?;
            *iv = new_iv;
            Ok(ciphertext)
        }
    }
}

/// Unprotect an inbound fragment: decrypt, strip and validate padding
/// (block ciphers only), split off and verify the MAC. On any mismatch
/// returns [`EngineError::BadMac`] without distinguishing *why* (padding
/// vs MAC).
pub fn decrypt(
    provider: &dyn CryptoProvider,
    state: &mut CryptoState,
    content_type: ContentType,
    fragment: &[u8],
) -> Result<Vec<u8>> {
    let ctx = match state {
        CryptoState::None => return Ok(fragment.to_vec()),
        CryptoState::Active(ctx) => ctx,
    };

    let seq = ctx.next_sequence();
    let mac_len = ctx.suite.mac_key_length();

    let mut plaintext = match &mut ctx.bulk {
        BulkState::Stream(stream) => {
            let mut buf = fragment.to_vec();
            provider.stream_apply(stream, &mut buf);
            buf
        }
        BulkState::Block { key, iv } => {
            const BLOCK_SIZE: usize = 8;
            if fragment.is_empty() || fragment.len() % BLOCK_SIZE != 0 {
                return Err(EngineError::BadMac);
            }
            let (mut buf, new_iv) = provider.block_decrypt(key, iv, fragment)?;
            *iv = new_iv;

            let pad_len = *buf.last().ok_or(EngineError::BadMac)? as usize;
            if pad_len + 1 > buf.len() {
                return Err(EngineError::BadMac);
            }
            let pad_start = buf.len() - pad_len - 1;
            if !buf[pad_start..].iter().all(|&b| b as usize == pad_len) {
                return Err(EngineError::BadMac);
            }
            buf.truncate(pad_start);
            buf
        }
    };

    if plaintext.len() < mac_len {
        return Err(EngineError::BadMac);
    }
    let split_at = plaintext.len() - mac_len;
    let received_mac = plaintext.split_off(split_at);

    let expected_mac = provider.hmac_sha1(&ctx.mac_key, &mac_input(seq, content_type, &plaintext));
    if !constant_time_eq(&expected_mac, &received_mac) {
        return Err(EngineError::BadMac);
    }

    Ok(plaintext)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::RustCryptoProvider;

    fn active_pair(suite: CipherSuite, provider: &RustCryptoProvider) -> (CryptoState, CryptoState) {
        let mac_key = vec![1u8; suite.mac_key_length()];
        let bulk_key = vec![2u8; suite.key_length()];
        let bulk_iv = vec![3u8; suite.iv_length().max(0)];
        let enc = CryptoContext::new(provider, suite, mac_key.clone(), bulk_key.clone(), bulk_iv.clone());
        let dec = CryptoContext::new(provider, suite, mac_key, bulk_key, bulk_iv);
        (CryptoState::Active(enc), CryptoState::Active(dec))
    }

    #[test]
    fn clear_state_passes_fragment_through() {
        let provider = RustCryptoProvider::new();
        let mut state = CryptoState::None;
        let out = encrypt(&provider, &mut state, ContentType::Handshake, b"hi").unwrap();
        assert_eq!(out, b"hi");
    }

    #[test]
    fn block_cipher_round_trips() {
        let provider = RustCryptoProvider::new();
        let (mut enc, mut dec) = active_pair(CipherSuite::RsaWith3DesEdeCbcSha, &provider);

        let ciphertext = encrypt(&provider, &mut enc, ContentType::ApplicationData, b"hello").unwrap();
        let plaintext = decrypt(&provider, &mut dec, ContentType::ApplicationData, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn tampered_ciphertext_is_bad_mac() {
        let provider = RustCryptoProvider::new();
        let (mut enc, mut dec) = active_pair(CipherSuite::RsaWith3DesEdeCbcSha, &provider);

        let mut ciphertext = encrypt(&provider, &mut enc, ContentType::ApplicationData, b"hello").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;

        assert_eq!(
            decrypt(&provider, &mut dec, ContentType::ApplicationData, &ciphertext),
            Err(EngineError::BadMac)
        );
    }

    #[test]
    fn sequence_numbers_advance_independently_per_direction() {
        let provider = RustCryptoProvider::new();
        let (mut enc, mut dec) = active_pair(CipherSuite::RsaWith3DesEdeCbcSha, &provider);

        let c1 = encrypt(&provider, &mut enc, ContentType::ApplicationData, b"one").unwrap();
        let c2 = encrypt(&provider, &mut enc, ContentType::ApplicationData, b"two").unwrap();
        assert_eq!(
            decrypt(&provider, &mut dec, ContentType::ApplicationData, &c1).unwrap(),
            b"one"
        );
        assert_eq!(
            decrypt(&provider, &mut dec, ContentType::ApplicationData, &c2).unwrap(),
            b"two"
        );
    }
}
