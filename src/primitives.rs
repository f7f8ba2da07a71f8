//! Cryptographic primitives facade.
//!
//! Narrow capability set consumed by the rest of the engine: RSA private-key
//! decrypt, HMAC, the TLS 1.0 pseudorandom function (RFC 2246 §5), stream/
//! block cipher init and apply, and random bytes. The engine never reaches
//! past this trait for a cryptographic operation; swapping
//! `RustCryptoProvider` for another implementation (a HSM-backed one, say)
//! should not require touching `handshake`, `record_layer` or `wire`.

use cipher::{BlockDecrypt, BlockEncrypt, KeyInit, StreamCipher};
use des::TdesEde3;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use rc4::Rc4;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use sha1::Sha1;
use zeroize::Zeroize;

use crate::error::{EngineError, Result};

/// Opaque running state for a stream cipher (RC4). Present in the crypto
/// context iff the suite's bulk cipher is a stream cipher.
pub struct StreamCipherState(Rc4);

impl core::fmt::Debug for StreamCipherState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("StreamCipherState(..)")
    }
}

/// The facade the rest of the engine is written against.
pub trait CryptoProvider {
    /// PKCS#1 v1.5 decryption of the ClientKeyExchange ciphertext.
    fn rsa_decrypt(&self, private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// HMAC-SHA1, the only MAC this engine's mandatory suite needs.
    fn hmac_sha1(&self, key: &[u8], message: &[u8]) -> [u8; 20];

    /// `master_secret = PRF(pre_master_secret, "master secret", client_random ++ server_random)[0..48]`.
    fn prf_master_secret(
        &self,
        pre_master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> [u8; 48];

    /// `key_block = PRF(master_secret, "key expansion", server_random ++ client_random)[0..n]`.
    ///
    /// Note the nonce order is reversed relative to [`CryptoProvider::prf_master_secret`]
    /// (RFC 2246 §6.3).
    fn prf_key_block(
        &self,
        n: usize,
        master_secret: &[u8; 48],
        server_random: &[u8; 32],
        client_random: &[u8; 32],
    ) -> Vec<u8>;

    /// `verify_data = PRF(master_secret, label, transcript_digest_inputs)[0..12]`.
    fn prf_finished(&self, master_secret: &[u8; 48], label: &'static str, transcript: &[u8]) -> [u8; 12];

    /// Initialize an RC4 keystream for one direction.
    fn stream_init(&self, key: &[u8]) -> StreamCipherState;

    /// Apply (XOR in) the keystream in place.
    fn stream_apply(&self, state: &mut StreamCipherState, buf: &mut [u8]);

    /// 3DES-EDE-CBC encrypt. Returns `(ciphertext, new_iv)`; `new_iv` is the
    /// last ciphertext block, chained per TLS 1.0's IV rule (RFC 2246
    /// §6.2.3.2 — BEAST-relevant, preserved here for interop).
    fn block_encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    /// 3DES-EDE-CBC decrypt. Returns `(plaintext, new_iv)`.
    fn block_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Cryptographically strong random bytes (drawn during ClientHello
    /// handling, to fill `server_random` — never a fixed or zeroed buffer).
    fn random_bytes(&self, n: usize) -> Vec<u8>;
}

const BLOCK_SIZE: usize = 8;

/// The engine's only [`CryptoProvider`] implementation, backed by the
/// RustCrypto-ecosystem crates listed in `Cargo.toml`.
#[derive(Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn rsa_decrypt(&self, private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| EngineError::CryptoError("RSA PKCS#1 v1.5 decryption failed"))
    }

    fn hmac_sha1(&self, key: &[u8], message: &[u8]) -> [u8; 20] {
        let mut mac =
            Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(message);
        mac.finalize().into_bytes().into()
    }

    fn prf_master_secret(
        &self,
        pre_master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> [u8; 48] {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        let out = tls10_prf(pre_master_secret, b"master secret", &seed, 48);
        let mut master_secret = [0u8; 48];
        master_secret.copy_from_slice(&out);
        master_secret
    }

    fn prf_key_block(
        &self,
        n: usize,
        master_secret: &[u8; 48],
        server_random: &[u8; 32],
        client_random: &[u8; 32],
    ) -> Vec<u8> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(server_random);
        seed.extend_from_slice(client_random);
        tls10_prf(master_secret, b"key expansion", &seed, n)
    }

    fn prf_finished(&self, master_secret: &[u8; 48], label: &'static str, transcript: &[u8]) -> [u8; 12] {
        let out = tls10_prf(master_secret, label.as_bytes(), transcript, 12);
        let mut verify_data = [0u8; 12];
        verify_data.copy_from_slice(&out);
        verify_data
    }

    fn stream_init(&self, key: &[u8]) -> StreamCipherState {
        StreamCipherState(Rc4::new_from_slice(key).expect("RC4 accepts any key length"))
    }

    fn stream_apply(&self, state: &mut StreamCipherState, buf: &mut [u8]) {
        state.0.apply_keystream(buf);
    }

    fn block_encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        if iv.len() != BLOCK_SIZE || plaintext.len() % BLOCK_SIZE != 0 {
            return Err(EngineError::CryptoError(
                "3DES-CBC requires an 8-byte IV and block-aligned input",
            ));
        }
        let cipher = TdesEde3::new_from_slice(key)
            .map_err(|_| EngineError::CryptoError("3DES key must be 24 bytes"))?;

        let mut prev = [0u8; BLOCK_SIZE];
        prev.copy_from_slice(iv);
        let mut out = Vec::with_capacity(plaintext.len());

        for chunk in plaintext.chunks(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            for i in 0..BLOCK_SIZE {
                block[i] = chunk[i] ^ prev[i];
            }
            let mut generic = cipher::generic_array::GenericArray::clone_from_slice(&block);
            cipher.encrypt_block(&mut generic);
            out.extend_from_slice(&generic);
            prev.copy_from_slice(&generic);
        }

        Ok((out, prev.to_vec()))
    }

    fn block_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        if iv.len() != BLOCK_SIZE || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(EngineError::CryptoError(
                "3DES-CBC requires an 8-byte IV and block-aligned input",
            ));
        }
        let cipher = TdesEde3::new_from_slice(key)
            .map_err(|_| EngineError::CryptoError("3DES key must be 24 bytes"))?;

        let mut prev = [0u8; BLOCK_SIZE];
        prev.copy_from_slice(iv);
        let mut out = Vec::with_capacity(ciphertext.len());

        for chunk in ciphertext.chunks(BLOCK_SIZE) {
            let mut generic = cipher::generic_array::GenericArray::clone_from_slice(chunk);
            let mut next_prev = [0u8; BLOCK_SIZE];
            next_prev.copy_from_slice(chunk);
            cipher.decrypt_block(&mut generic);
            let mut block = [0u8; BLOCK_SIZE];
            for i in 0..BLOCK_SIZE {
                block[i] = generic[i] ^ prev[i];
            }
            out.extend_from_slice(&block);
            prev = next_prev;
        }

        Ok((out, prev.to_vec()))
    }

    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        buf
    }
}

/// `P_hash(secret, seed)`: `HMAC_hash(secret, A(1) ++ seed) ++ HMAC_hash(secret, A(2) ++ seed) ++ ...`
/// truncated to `out_len` bytes, where `A(0) = seed`, `A(i) = HMAC_hash(secret, A(i-1))`.
fn p_hash_sha1(secret: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(out_len + 20);
    let mut a = seed.to_vec();
    while result.len() < out_len {
        let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(&a);
        a = mac.finalize().into_bytes().to_vec();

        let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(&a);
        mac.update(seed);
        result.extend_from_slice(&mac.finalize().into_bytes());
    }
    result.truncate(out_len);
    result
}

fn p_hash_md5(secret: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(out_len + 16);
    let mut a = seed.to_vec();
    while result.len() < out_len {
        let mut mac = Hmac::<Md5>::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(&a);
        a = mac.finalize().into_bytes().to_vec();

        let mut mac = Hmac::<Md5>::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(&a);
        mac.update(seed);
        result.extend_from_slice(&mac.finalize().into_bytes());
    }
    result.truncate(out_len);
    result
}

/// The TLS 1.0 PRF (RFC 2246 §5): split `secret` into two halves `s1`/`s2`
/// (overlapping by one byte when the length is odd), and XOR
/// `P_MD5(s1, label ++ seed)` with `P_SHA1(s2, label ++ seed)`.
fn tls10_prf(secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut md5_out = p_hash_md5(s1, &label_seed, out_len);
    let sha1_out = p_hash_sha1(s2, &label_seed, out_len);
    for (a, b) in md5_out.iter_mut().zip(sha1_out.iter()) {
        *a ^= b;
    }
    md5_out
}

/// Zeroize the 3DES/RC4 key material and MAC keys held by a crypto context
/// when it is dropped, rather than leaving them in freed heap memory.
pub(crate) fn zeroize_key_material(buf: &mut Vec<u8>) {
    buf.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_round_trip() {
        let provider = RustCryptoProvider::new();
        let key = [7u8; 24];
        let iv = [3u8; 8];
        let plaintext = b"0123456789abcdef".to_vec(); // 16 bytes, block-aligned

        let (ciphertext, iv_after_enc) = provider.block_encrypt(&key, &iv, &plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_eq!(&iv_after_enc, &ciphertext[ciphertext.len() - 8..]);

        let (decrypted, iv_after_dec) = provider.block_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
        assert_eq!(iv_after_dec, iv_after_enc);
    }

    #[test]
    fn master_secret_is_48_bytes() {
        let provider = RustCryptoProvider::new();
        let pms = [9u8; 48];
        let cr = [1u8; 32];
        let sr = [2u8; 32];
        let ms = provider.prf_master_secret(&pms, &cr, &sr);
        assert_eq!(ms.len(), 48);
    }

    #[test]
    fn finished_verify_data_is_12_bytes() {
        let provider = RustCryptoProvider::new();
        let ms = [0u8; 48];
        let vd = provider.prf_finished(&ms, "client finished", b"transcript");
        assert_eq!(vd.len(), 12);
    }

    #[test]
    fn rc4_keystream_is_deterministic_for_same_key() {
        let provider = RustCryptoProvider::new();
        let mut a = provider.stream_init(&[1u8; 16]);
        let mut b = provider.stream_init(&[1u8; 16]);
        let mut buf_a = b"hello world".to_vec();
        let mut buf_b = b"hello world".to_vec();
        provider.stream_apply(&mut a, &mut buf_a);
        provider.stream_apply(&mut b, &mut buf_b);
        assert_eq!(buf_a, buf_b);
        assert_ne!(buf_a, b"hello world");
    }
}
