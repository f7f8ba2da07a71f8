//! Server-role handshake state machine.
//!
//! The five states trace the one handshake shape this engine speaks:
//! `Initial` → (ClientHello) → `Handshaking` → (ClientKeyExchange) →
//! `KeysExchanged` → (ChangeCipherSpec) → `AwaitingClientFinished` →
//! (Finished) → `Established`, with `Established` re-entering `Handshaking`
//! on a fresh ClientHello (renegotiation) and any error collapsing to the
//! terminal `Failed` state. Grounded on the shape of the teacher's
//! `TlsSession::process_handshake_message` dispatch in
//! `network/src/tls/mod.rs`, but the transition table itself is TLS 1.0's,
//! not the teacher's TLS 1.3 one.

use crate::engine::EngineConfig;
use crate::error::{EngineError, ProtocolErrorKind, Result};
use crate::primitives::CryptoProvider;
use crate::record_layer::CryptoContext;
use crate::suite::CipherSuite;
use crate::wire::{
    self, assemble_certificate, assemble_finished, assemble_server_hello,
    assemble_server_hello_done, parse_alert, parse_change_cipher_spec, parse_client_key_exchange,
    parse_finished, Alert, ClientHello, ContentType, HandshakeType,
};

/// Negotiated parameters that stay fixed for the life of one handshake.
/// `master_secret` is filled in once the ClientKeyExchange has been
/// processed.
#[derive(Debug, Clone)]
pub struct SecurityParams {
    pub suite: CipherSuite,
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    pub master_secret: Option<[u8; 48]>,
}

/// What the engine must do in response to one inbound record, in order:
/// commands fold left to right over the outbound encryptor, so a
/// `ChangeEncryptor` between two `Send`s changes how the *second* one is
/// protected, not the first.
pub enum RecordCommand {
    /// Emit a record of this content type carrying this plaintext fragment,
    /// protected with whatever encryptor is active when this command is
    /// folded.
    Send(ContentType, Vec<u8>),
    /// Install a new outbound cipher context, effective for every `Send`
    /// after this command in the same batch (and all subsequent records).
    ChangeEncryptor(CryptoContext),
    /// Install a new inbound cipher context, effective for the next inbound
    /// record the engine decrypts.
    ChangeDecryptor(CryptoContext),
    /// An Alert record was received; surfaced to the host as an event. Does
    /// not itself change handshake state — the engine never acts on alerts.
    AlertReceived(Alert),
}

/// Handshake state. `Failed` is the terminal sink for every error path.
pub enum HandshakeState {
    Initial,
    Handshaking {
        params: SecurityParams,
        transcript: Vec<u8>,
    },
    KeysExchanged {
        pending_encrypt: CryptoContext,
        pending_decrypt: CryptoContext,
        params: SecurityParams,
        transcript: Vec<u8>,
    },
    AwaitingClientFinished {
        pending_encrypt: CryptoContext,
        params: SecurityParams,
        transcript: Vec<u8>,
    },
    Established,
    Failed,
}

impl HandshakeState {
    pub fn is_established(&self) -> bool {
        matches!(self, HandshakeState::Established)
    }
}

/// `MD5(transcript) ++ SHA1(transcript)` — the seed the TLS 1.0 Finished PRF
/// call takes as its "transcript" argument (RFC 2246 §7.4.9).
fn transcript_digest(provider: &dyn CryptoProvider, transcript: &[u8]) -> Vec<u8> {
    // The primitives facade exposes hashing only through HMAC; an HMAC with
    // an empty key over a single block is exactly MD5/SHA1 with the
    // standard Merkle-Damgard padding, so reuse `hmac_sha1` via a
    // zero-length-key call would be wrong — routing through the PRF's own
    // P_hash construction would also be wrong. The Finished digest needs
    // bare MD5 and SHA1, so compute them directly.
    use md5::{Digest as Md5Digest, Md5};
    use sha1::{Digest as Sha1Digest, Sha1};
    let _ = provider; // kept in the signature: a future provider might hash remotely.
    let mut md5 = Md5::new();
    md5.update(transcript);
    let mut sha1 = Sha1::new();
    sha1.update(transcript);
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&md5.finalize());
    out.extend_from_slice(&sha1.finalize());
    out
}

fn append_handshake_message(transcript: &mut Vec<u8>, message: &[u8]) {
    transcript.extend_from_slice(message);
}

/// Split one decrypted Handshake-content fragment into its declared type and
/// body. This engine does not coalesce multiple handshake messages into one
/// record nor split one across records, so the body must consume the whole
/// fragment.
fn split_handshake_message(fragment: &[u8]) -> Result<(HandshakeType, &[u8])> {
    let bad = || {
        EngineError::ProtocolError(ProtocolErrorKind::MalformedMessage(
            "handshake message framing",
        ))
    };
    if fragment.len() < 4 {
        return Err(bad());
    }
    let msg_type = HandshakeType::from_byte(fragment[0]).ok_or_else(bad)?;
    let len = ((fragment[1] as usize) << 16) | ((fragment[2] as usize) << 8) | fragment[3] as usize;
    if fragment.len() != 4 + len {
        return Err(bad());
    }
    Ok((msg_type, &fragment[4..]))
}

fn unexpected(content_type: ContentType, handshake_type: Option<HandshakeType>) -> EngineError {
    EngineError::ProtocolError(ProtocolErrorKind::UnexpectedMessage {
        content_type: content_type as u8,
        handshake_type: handshake_type.map(|t| t as u8),
    })
}

/// Split a key block into the six fields TLS 1.0 lays it out as: client
/// write MAC key, server write MAC key, client write key, server write key,
/// client write IV, server write IV (RFC 2246 §6.3).
fn split_key_block(
    suite: CipherSuite,
    key_block: &[u8],
) -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
    let mac_len = suite.mac_key_length();
    let key_len = suite.key_length();
    let iv_len = suite.iv_length();
    let mut offset = 0;
    let mut take = |len: usize| {
        let slice = key_block[offset..offset + len].to_vec();
        offset += len;
        slice
    };
    let client_mac = take(mac_len);
    let server_mac = take(mac_len);
    let client_key = take(key_len);
    let server_key = take(key_len);
    let client_iv = take(iv_len);
    let server_iv = take(iv_len);
    (client_mac, server_mac, client_key, server_key, client_iv, server_iv)
}

fn begin_handshake(
    provider: &dyn CryptoProvider,
    config: &EngineConfig,
    fragment: &[u8],
) -> Result<(HandshakeState, Vec<RecordCommand>)> {
    let (msg_type, body) = split_handshake_message(fragment)?;
    if msg_type != HandshakeType::ClientHello {
        return Err(unexpected(ContentType::Handshake, Some(msg_type)));
    }
    let client_hello = ClientHello::from_body(body)?;
    let suite = client_hello.select_suite()?;

    let mut server_random = [0u8; 32];
    server_random.copy_from_slice(&provider.random_bytes(32));

    let mut transcript = Vec::new();
    append_handshake_message(&mut transcript, fragment);

    let server_hello = assemble_server_hello(&server_random, suite);
    append_handshake_message(&mut transcript, &server_hello);
    let certificate = assemble_certificate(&config.cert_chain);
    append_handshake_message(&mut transcript, &certificate);
    let server_hello_done = assemble_server_hello_done();
    append_handshake_message(&mut transcript, &server_hello_done);

    let params = SecurityParams {
        suite,
        client_random: client_hello.random,
        server_random,
        master_secret: None,
    };

    Ok((
        HandshakeState::Handshaking { params, transcript },
        vec![
            RecordCommand::Send(ContentType::Handshake, server_hello),
            RecordCommand::Send(ContentType::Handshake, certificate),
            RecordCommand::Send(ContentType::Handshake, server_hello_done),
        ],
    ))
}

fn step(
    state: HandshakeState,
    provider: &dyn CryptoProvider,
    config: &EngineConfig,
    content_type: ContentType,
    fragment: &[u8],
) -> Result<(HandshakeState, Vec<RecordCommand>)> {
    if content_type == ContentType::Alert {
        let alert = parse_alert(fragment)?;
        return Ok((state, vec![RecordCommand::AlertReceived(alert)]));
    }

    match state {
        HandshakeState::Initial => {
            if content_type != ContentType::Handshake {
                return Err(unexpected(content_type, None));
            }
            begin_handshake(provider, config, fragment)
        }

        HandshakeState::Handshaking { params, mut transcript } => {
            if content_type != ContentType::Handshake {
                return Err(unexpected(content_type, None));
            }
            let (msg_type, body) = split_handshake_message(fragment)?;
            if msg_type != HandshakeType::ClientKeyExchange {
                return Err(unexpected(content_type, Some(msg_type)));
            }
            let ciphertext = parse_client_key_exchange(body)?;
            let pre_master_secret = provider.rsa_decrypt(&config.private_key, ciphertext)?;
            if pre_master_secret.len() != 48 {
                return Err(EngineError::CryptoError(
                    "pre-master secret must be 48 bytes",
                ));
            }
            append_handshake_message(&mut transcript, fragment);

            let master_secret = provider.prf_master_secret(
                &pre_master_secret,
                &params.client_random,
                &params.server_random,
            );

            let suite = params.suite;
            let key_block_len =
                2 * suite.mac_key_length() + 2 * suite.key_length() + 2 * suite.iv_length();
            let key_block = provider.prf_key_block(
                key_block_len,
                &master_secret,
                &params.server_random,
                &params.client_random,
            );
            let (client_mac, server_mac, client_key, server_key, client_iv, server_iv) =
                split_key_block(suite, &key_block);

            let pending_decrypt = CryptoContext::new(provider, suite, client_mac, client_key, client_iv);
            let pending_encrypt = CryptoContext::new(provider, suite, server_mac, server_key, server_iv);

            let params = SecurityParams {
                master_secret: Some(master_secret),
                ..params
            };

            Ok((
                HandshakeState::KeysExchanged {
                    pending_encrypt,
                    pending_decrypt,
                    params,
                    transcript,
                },
                Vec::new(),
            ))
        }

        HandshakeState::KeysExchanged {
            pending_encrypt,
            pending_decrypt,
            params,
            transcript,
        } => {
            if content_type != ContentType::ChangeCipherSpec {
                return Err(unexpected(content_type, None));
            }
            parse_change_cipher_spec(fragment)?;
            Ok((
                HandshakeState::AwaitingClientFinished {
                    pending_encrypt,
                    params,
                    transcript,
                },
                vec![RecordCommand::ChangeDecryptor(pending_decrypt)],
            ))
        }

        HandshakeState::AwaitingClientFinished {
            pending_encrypt,
            params,
            mut transcript,
        } => {
            if content_type != ContentType::Handshake {
                return Err(unexpected(content_type, None));
            }
            let (msg_type, body) = split_handshake_message(fragment)?;
            if msg_type != HandshakeType::Finished {
                return Err(unexpected(content_type, Some(msg_type)));
            }
            let client_verify_data = parse_finished(body)?;
            let master_secret = params
                .master_secret
                .expect("master secret is set once KeysExchanged is reached");

            let expected = provider.prf_finished(
                &master_secret,
                "client finished",
                &transcript_digest(provider, &transcript),
            );
            if !constant_time_eq(&expected, &client_verify_data) {
                return Err(EngineError::ProtocolError(ProtocolErrorKind::FinishedMismatch));
            }
            append_handshake_message(&mut transcript, fragment);

            let server_verify_data = provider.prf_finished(
                &master_secret,
                "server finished",
                &transcript_digest(provider, &transcript),
            );
            let server_finished = assemble_finished(&server_verify_data);

            Ok((
                HandshakeState::Established,
                vec![
                    RecordCommand::Send(ContentType::ChangeCipherSpec, wire::CHANGE_CIPHER_SPEC_BODY.to_vec()),
                    RecordCommand::ChangeEncryptor(pending_encrypt),
                    RecordCommand::Send(ContentType::Handshake, server_finished),
                ],
            ))
        }

        HandshakeState::Established => {
            if content_type != ContentType::Handshake {
                return Err(unexpected(content_type, None));
            }
            // A fresh ClientHello while established is a renegotiation
            // request: restart the handshake exactly as from `Initial`,
            // discarding the old transcript and params.
            begin_handshake(provider, config, fragment)
        }

        HandshakeState::Failed => Err(EngineError::Terminated),
    }
}

/// Advance the handshake state machine by one record. On error the returned
/// state is always [`HandshakeState::Failed`].
pub fn handle_record(
    state: HandshakeState,
    provider: &dyn CryptoProvider,
    config: &EngineConfig,
    content_type: ContentType,
    fragment: &[u8],
) -> (HandshakeState, Result<Vec<RecordCommand>>) {
    match step(state, provider, config, content_type, fragment) {
        Ok((next, commands)) => (next, Ok(commands)),
        Err(e) => (HandshakeState::Failed, Err(e)),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::RustCryptoProvider;
    use rsa::{pkcs1::DecodeRsaPrivateKey, RsaPrivateKey};

    // A throwaway 1024-bit key embedded only so handshake tests don't need
    // real I/O; never used outside `#[cfg(test)]`.
    const TEST_KEY_PEM: &str = include_str!("../tests/fixtures/test_key.pem");

    fn test_config() -> EngineConfig {
        let private_key = RsaPrivateKey::from_pkcs1_pem(TEST_KEY_PEM).expect("valid test key");
        EngineConfig {
            cert_chain: vec![vec![0xAA, 0xBB, 0xCC]],
            private_key,
        }
    }

    fn client_hello_bytes(suite: CipherSuite) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&wire::TLS_1_0_VERSION);
        body.extend_from_slice(&[5u8; 32]);
        body.push(0);
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&suite.to_id().to_be_bytes());
        body.push(1);
        body.push(0);
        wire::assemble_handshake(HandshakeType::ClientHello, &body)
    }

    #[test]
    fn initial_client_hello_produces_server_flight() {
        let provider = RustCryptoProvider::new();
        let config = test_config();
        let hello = client_hello_bytes(CipherSuite::RsaWith3DesEdeCbcSha);

        let (state, result) = handle_record(
            HandshakeState::Initial,
            &provider,
            &config,
            ContentType::Handshake,
            &hello,
        );
        let commands = result.unwrap();
        assert!(matches!(state, HandshakeState::Handshaking { .. }));
        assert_eq!(commands.len(), 3);
    }

    #[test]
    fn unsupported_suite_offer_fails_handshake() {
        let provider = RustCryptoProvider::new();
        let config = test_config();
        let hello = client_hello_bytes(CipherSuite::NullWithNullNull);

        let (state, result) = handle_record(
            HandshakeState::Initial,
            &provider,
            &config,
            ContentType::Handshake,
            &hello,
        );
        assert!(matches!(state, HandshakeState::Failed));
        assert_eq!(
            result,
            Err(EngineError::ProtocolError(
                ProtocolErrorKind::NoSupportedCipherSuite
            ))
        );
    }

    #[test]
    fn alert_is_surfaced_without_changing_state() {
        let provider = RustCryptoProvider::new();
        let config = test_config();
        let (state, result) = handle_record(
            HandshakeState::Initial,
            &provider,
            &config,
            ContentType::Alert,
            &[1, 0],
        );
        assert!(matches!(state, HandshakeState::Initial));
        let commands = result.unwrap();
        assert!(matches!(commands[0], RecordCommand::AlertReceived(_)));
    }
}
