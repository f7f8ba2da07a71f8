//! Cipher suite catalogue.
//!
//! The suite identifier is the sole source of truth for every algorithm
//! choice downstream: key lengths, MAC length, and whether the bulk cipher
//! is a stream or block cipher.

/// A TLS cipher suite this engine recognizes.
///
/// Only [`CipherSuite::RsaWith3DesEdeCbcSha`] is ever negotiated; the other
/// variant exists so that an offer of nothing else parses to a named,
/// deliberately-unsupported suite rather than an opaque unknown id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// TLS_RSA_WITH_3DES_EDE_CBC_SHA (0x000A) — the only suite this engine
    /// will select.
    RsaWith3DesEdeCbcSha,
    /// TLS_NULL_WITH_NULL_NULL (0x0000) — parses, never selected.
    NullWithNullNull,
}

/// Bulk cipher family, derived from the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    /// 3DES-EDE-CBC, key length 24 bytes, IV/block length 8 bytes.
    TripleDesEdeCbc,
    /// RC4 stream cipher, key length 16 bytes, no IV.
    Rc4,
}

impl CipherSuite {
    /// Get the cipher suite id as it appears on the wire.
    pub fn to_id(self) -> u16 {
        match self {
            CipherSuite::RsaWith3DesEdeCbcSha => 0x000A,
            CipherSuite::NullWithNullNull => 0x0000,
        }
    }

    /// Parse a wire id into a recognized suite. Unknown ids (every id other
    /// than the two above) return `None`.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x000A => Some(CipherSuite::RsaWith3DesEdeCbcSha),
            0x0000 => Some(CipherSuite::NullWithNullNull),
            _ => None,
        }
    }

    /// Whether this engine will ever select this suite for a connection.
    pub fn is_supported(self) -> bool {
        matches!(self, CipherSuite::RsaWith3DesEdeCbcSha)
    }

    /// Bulk cipher family for this suite, if selectable.
    pub fn cipher(self) -> Option<BulkCipher> {
        match self {
            CipherSuite::RsaWith3DesEdeCbcSha => Some(BulkCipher::TripleDesEdeCbc),
            CipherSuite::NullWithNullNull => None,
        }
    }

    /// Bulk cipher key length in bytes.
    pub fn key_length(self) -> usize {
        match self.cipher() {
            Some(BulkCipher::TripleDesEdeCbc) => 24,
            Some(BulkCipher::Rc4) => 16,
            None => 0,
        }
    }

    /// Bulk cipher IV length in bytes (0 for stream ciphers).
    pub fn iv_length(self) -> usize {
        match self.cipher() {
            Some(BulkCipher::TripleDesEdeCbc) => 8,
            Some(BulkCipher::Rc4) => 0,
            None => 0,
        }
    }

    /// MAC key/output length in bytes — this engine's one mandatory suite
    /// always uses HMAC-SHA1 (20 bytes).
    pub fn mac_key_length(self) -> usize {
        20
    }
}
