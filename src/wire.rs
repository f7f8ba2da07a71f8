//! Wire codec: record framing and handshake message framing (RFC 2246
//! §§6.2, 7.4).
//!
//! Grounded on `network/src/tls/record.rs` (`ContentType`, `Record`,
//! `RecordBuffer`) for the record layer and `network/src/tls/handshake.rs`
//! (`ClientHello`/`ServerHello`/`Finished`, the length-placeholder-then-patch
//! idiom) for handshake framing. This module does not interpret extension
//! contents — ClientHello's extension bytes are parsed only far enough to be
//! skipped, and ServerHello always emits an empty extension list — so the
//! teacher's much larger `Extension`/`NamedGroup`/`SignatureScheme`
//! machinery has no counterpart here.

use crate::error::{EngineError, ProtocolErrorKind, Result};
use crate::suite::CipherSuite;

/// Record-layer content type (RFC 2246 §6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// The wire version this core always writes: TLS 1.0, `{3, 1}`.
pub const TLS_1_0_VERSION: [u8; 2] = [0x03, 0x01];

/// One record header, as parsed from the 5-byte preamble.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: [u8; 2],
    pub length: u16,
}

impl RecordHeader {
    pub fn to_bytes(self) -> [u8; 5] {
        let len = self.length.to_be_bytes();
        [
            self.content_type as u8,
            self.version[0],
            self.version[1],
            len[0],
            len[1],
        ]
    }
}

/// Assemble a complete record: header followed by the fragment.
pub fn assemble_record(content_type: ContentType, fragment: &[u8]) -> Vec<u8> {
    let header = RecordHeader {
        content_type,
        version: TLS_1_0_VERSION,
        length: fragment.len() as u16,
    };
    let mut out = Vec::with_capacity(5 + fragment.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(fragment);
    out
}

/// Split `data` into `(header, fragment)` pairs by repeatedly taking
/// `5 + length` bytes. The core assumes no cross-record handshake
/// fragmentation on input: a header whose declared length exceeds the
/// remaining input is `UnexpectedFragment`, not buffered.
pub fn split_records(data: &[u8]) -> Result<Vec<(RecordHeader, &[u8])>> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        if data.len() - offset < 5 {
            return Err(EngineError::UnexpectedFragment);
        }
        let rest = &data[offset..];
        let content_type = ContentType::from_byte(rest[0]).ok_or(EngineError::ProtocolError(
            ProtocolErrorKind::MalformedMessage("record content type"),
        ))?;
        let version = [rest[1], rest[2]];
        let length = u16::from_be_bytes([rest[3], rest[4]]);
        let total = 5 + length as usize;
        if rest.len() < total {
            return Err(EngineError::UnexpectedFragment);
        }
        records.push((
            RecordHeader {
                content_type,
                version,
                length,
            },
            &rest[5..total],
        ));
        offset += total;
    }
    Ok(records)
}

/// Handshake message type (the subset this engine speaks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerHelloDone = 14,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            11 => Some(HandshakeType::Certificate),
            14 => Some(HandshakeType::ServerHelloDone),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            _ => None,
        }
    }
}

/// Wrap a handshake body in the 1-byte-type + 3-byte-length header.
pub fn assemble_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type as u8);
    let len = body.len();
    out.push(((len >> 16) & 0xFF) as u8);
    out.push(((len >> 8) & 0xFF) as u8);
    out.push((len & 0xFF) as u8);
    out.extend_from_slice(body);
    out
}

/// A parsed ClientHello (RFC 2246 §7.4.1.2).
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub legacy_version: [u8; 2],
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
}

impl ClientHello {
    /// Parse a ClientHello from its handshake body (the bytes following the
    /// 1-byte type and 3-byte length, i.e. `fragment[4..]` of a handshake
    /// record whose type byte is `1`).
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let bad = || EngineError::ProtocolError(ProtocolErrorKind::MalformedMessage("ClientHello"));
        if body.len() < 2 + 32 + 1 {
            return Err(bad());
        }
        let legacy_version = [body[0], body[1]];
        let mut random = [0u8; 32];
        random.copy_from_slice(&body[2..34]);

        let mut offset = 34;
        let session_id_len = body[offset] as usize;
        offset += 1;
        if body.len() < offset + session_id_len + 2 {
            return Err(bad());
        }
        let session_id = body[offset..offset + session_id_len].to_vec();
        offset += session_id_len;

        let cipher_len = u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
        offset += 2;
        if cipher_len % 2 != 0 || body.len() < offset + cipher_len + 1 {
            return Err(bad());
        }
        let mut cipher_suites = Vec::with_capacity(cipher_len / 2);
        for i in (0..cipher_len).step_by(2) {
            cipher_suites.push(u16::from_be_bytes([body[offset + i], body[offset + i + 1]]));
        }
        offset += cipher_len;

        let comp_len = body[offset] as usize;
        offset += 1;
        if body.len() < offset + comp_len {
            return Err(bad());
        }
        let compression_methods = body[offset..offset + comp_len].to_vec();
        offset += comp_len;

        // Extensions are optional and uninterpreted here: skip the
        // length-prefixed block entirely if present.
        if offset + 2 <= body.len() {
            let ext_len = u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
            offset += 2;
            if body.len() < offset + ext_len {
                return Err(bad());
            }
        }

        Ok(ClientHello {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
        })
    }

    /// Choose the suite this engine will use: the single supported suite,
    /// if the client offered it.
    pub fn select_suite(&self) -> Result<CipherSuite> {
        self.cipher_suites
            .iter()
            .filter_map(|&id| CipherSuite::from_id(id))
            .find(|s| s.is_supported())
            .ok_or(EngineError::ProtocolError(
                ProtocolErrorKind::NoSupportedCipherSuite,
            ))
    }
}

/// Assemble a ServerHello handshake message. Session id is always empty,
/// compression is always null, extensions are always empty.
pub fn assemble_server_hello(server_random: &[u8; 32], suite: CipherSuite) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&TLS_1_0_VERSION);
    body.extend_from_slice(server_random);
    body.push(0); // empty session id
    body.extend_from_slice(&suite.to_id().to_be_bytes());
    body.push(0); // null compression
    body.extend_from_slice(&[0, 0]); // empty extensions
    assemble_handshake(HandshakeType::ServerHello, &body)
}

/// Assemble a Certificate handshake message from a chain of DER-encoded
/// certificates (RFC 2246 §7.4.2: 3-byte total length, then each cert
/// 3-byte-length-prefixed).
pub fn assemble_certificate(cert_chain: &[Vec<u8>]) -> Vec<u8> {
    let mut list = Vec::new();
    for cert in cert_chain {
        let len = cert.len();
        list.push(((len >> 16) & 0xFF) as u8);
        list.push(((len >> 8) & 0xFF) as u8);
        list.push((len & 0xFF) as u8);
        list.extend_from_slice(cert);
    }
    let mut body = Vec::with_capacity(3 + list.len());
    let total = list.len();
    body.push(((total >> 16) & 0xFF) as u8);
    body.push(((total >> 8) & 0xFF) as u8);
    body.push((total & 0xFF) as u8);
    body.extend_from_slice(&list);
    assemble_handshake(HandshakeType::Certificate, &body)
}

/// ServerHelloDone has an empty body.
pub fn assemble_server_hello_done() -> Vec<u8> {
    assemble_handshake(HandshakeType::ServerHelloDone, &[])
}

/// Parse the RSA-encrypted pre-master secret out of a ClientKeyExchange
/// body (RFC 2246 §7.4.7.1: 2-byte-length-prefixed PKCS#1 ciphertext).
pub fn parse_client_key_exchange(body: &[u8]) -> Result<&[u8]> {
    let bad = || {
        EngineError::ProtocolError(ProtocolErrorKind::MalformedMessage("ClientKeyExchange"))
    };
    if body.len() < 2 {
        return Err(bad());
    }
    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + len {
        return Err(bad());
    }
    Ok(&body[2..2 + len])
}

/// Assemble a Finished handshake message; `verify_data` must be exactly 12
/// bytes (RFC 2246 §7.4.9).
pub fn assemble_finished(verify_data: &[u8; 12]) -> Vec<u8> {
    assemble_handshake(HandshakeType::Finished, verify_data)
}

/// Parse a Finished body: exactly 12 bytes.
pub fn parse_finished(body: &[u8]) -> Result<[u8; 12]> {
    if body.len() != 12 {
        return Err(EngineError::ProtocolError(ProtocolErrorKind::MalformedMessage(
            "Finished",
        )));
    }
    let mut verify_data = [0u8; 12];
    verify_data.copy_from_slice(body);
    Ok(verify_data)
}

/// The ChangeCipherSpec body is always the single byte `0x01`.
pub const CHANGE_CIPHER_SPEC_BODY: [u8; 1] = [0x01];

pub fn parse_change_cipher_spec(body: &[u8]) -> Result<()> {
    if body == CHANGE_CIPHER_SPEC_BODY {
        Ok(())
    } else {
        Err(EngineError::ProtocolError(
            ProtocolErrorKind::MalformedChangeCipherSpec,
        ))
    }
}

/// Alert level/description (RFC 2246 §7.2). The engine surfaces these as an
/// event but does not itself act on them.
#[derive(Debug, Clone, Copy)]
pub struct Alert {
    pub level: u8,
    pub description: u8,
}

pub fn parse_alert(body: &[u8]) -> Result<Alert> {
    if body.len() != 2 {
        return Err(EngineError::ProtocolError(ProtocolErrorKind::MalformedMessage(
            "Alert",
        )));
    }
    Ok(Alert {
        level: body[0],
        description: body[1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_header_round_trips() {
        let bytes = assemble_record(ContentType::Handshake, &[1, 2, 3, 4]);
        let records = split_records(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.content_type, ContentType::Handshake);
        assert_eq!(records[0].0.version, TLS_1_0_VERSION);
        assert_eq!(records[0].1, &[1, 2, 3, 4]);
    }

    #[test]
    fn split_records_rejects_declared_length_past_input() {
        let mut bytes = assemble_record(ContentType::Handshake, &[1, 2, 3, 4]);
        // Claim a longer fragment than is actually present.
        let len_pos = 3;
        bytes[len_pos] = 0;
        bytes[len_pos + 1] = 200;
        assert!(matches!(
            split_records(&bytes),
            Err(EngineError::UnexpectedFragment)
        ));
    }

    #[test]
    fn client_hello_round_trips_suite_selection() {
        let mut body = Vec::new();
        body.extend_from_slice(&TLS_1_0_VERSION);
        body.extend_from_slice(&[7u8; 32]);
        body.push(0); // session id
        body.extend_from_slice(&2u16.to_be_bytes()); // one cipher suite
        body.extend_from_slice(&CipherSuite::RsaWith3DesEdeCbcSha.to_id().to_be_bytes());
        body.push(1); // compression methods
        body.push(0);
        body.extend_from_slice(&0u16.to_be_bytes()); // empty extensions

        let hello = ClientHello::from_body(&body).unwrap();
        assert_eq!(hello.random, [7u8; 32]);
        assert_eq!(
            hello.select_suite().unwrap(),
            CipherSuite::RsaWith3DesEdeCbcSha
        );
    }

    #[test]
    fn client_hello_without_supported_suite_is_protocol_error() {
        let mut body = Vec::new();
        body.extend_from_slice(&TLS_1_0_VERSION);
        body.extend_from_slice(&[0u8; 32]);
        body.push(0);
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&0x0000u16.to_be_bytes()); // TLS_NULL_WITH_NULL_NULL only
        body.push(1);
        body.push(0);

        let hello = ClientHello::from_body(&body).unwrap();
        assert_eq!(
            hello.select_suite(),
            Err(EngineError::ProtocolError(
                ProtocolErrorKind::NoSupportedCipherSuite
            ))
        );
    }

    #[test]
    fn finished_body_must_be_twelve_bytes() {
        assert!(parse_finished(&[0u8; 12]).is_ok());
        assert!(parse_finished(&[0u8; 11]).is_err());
    }

    #[test]
    fn change_cipher_spec_body_must_be_single_one_byte() {
        assert!(parse_change_cipher_spec(&[1]).is_ok());
        assert!(parse_change_cipher_spec(&[0]).is_err());
        assert!(parse_change_cipher_spec(&[1, 1]).is_err());
    }
}
