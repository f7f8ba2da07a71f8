//! The pure driver: feed it inbound bytes, get outbound bytes and events
//! back. No I/O, no timekeeping, no concurrency — every call is a total
//! function of `(engine state, input bytes)`.
//!
//! Grounded on the teacher's `TlsSession`/`TlsAcceptor` split in
//! `network/src/tls/mod.rs`: `EngineConfig` plays the role of
//! `TlsAcceptor`'s builder (fixed at construction: certificate chain,
//! private key), `Engine` plays the role of `TlsSession` (the mutable
//! per-connection state `process_handshake`/`process_handshake_message`
//! advance).

use log::{debug, trace, warn};
use rsa::RsaPrivateKey;

use crate::error::{EngineError, Result};
use crate::handshake::{self, HandshakeState, RecordCommand};
use crate::primitives::CryptoProvider;
use crate::record_layer::{self, CryptoState};
use crate::wire::{self, ContentType};

/// Fixed, connection-independent configuration: the server's certificate
/// chain (leaf first, DER-encoded) and the private key matching the leaf,
/// used to decrypt each ClientKeyExchange.
pub struct EngineConfig {
    pub cert_chain: Vec<Vec<u8>>,
    pub private_key: RsaPrivateKey,
}

/// Something the host should react to, surfaced out of [`Engine::handle`]
/// alongside outbound bytes.
#[derive(Debug)]
pub enum EngineEvent {
    /// The handshake (or renegotiation) just completed.
    HandshakeEstablished,
    /// Decrypted application data, in record order.
    ApplicationData(Vec<u8>),
    /// The peer sent an Alert record. The engine does not act on this
    /// itself — teardown is the host's call.
    AlertReceived { level: u8, description: u8 },
}

/// The whole of this engine's mutable state for one connection.
pub struct Engine<P: CryptoProvider> {
    provider: P,
    config: EngineConfig,
    handshake: HandshakeState,
    encryptor: CryptoState,
    decryptor: CryptoState,
}

impl<P: CryptoProvider> Engine<P> {
    pub fn new(provider: P, config: EngineConfig) -> Self {
        Engine {
            provider,
            config,
            handshake: HandshakeState::Initial,
            encryptor: CryptoState::None,
            decryptor: CryptoState::None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.handshake.is_established()
    }

    /// Feed inbound bytes (zero or more complete records) and get back
    /// outbound bytes plus any events, or the first error hit. Once an
    /// error has been returned, the engine is in
    /// [`HandshakeState::Failed`] and every subsequent call returns
    /// [`EngineError::Terminated`] without inspecting `input`.
    pub fn handle(&mut self, input: &[u8]) -> Result<(Vec<u8>, Vec<EngineEvent>)> {
        if matches!(self.handshake, HandshakeState::Failed) {
            return Err(EngineError::Terminated);
        }

        let records = wire::split_records(input)?;
        let mut outbound = Vec::new();
        let mut events = Vec::new();

        for (header, fragment) in records {
            match self.handle_one_record(header.content_type, fragment) {
                Ok((bytes, mut record_events)) => {
                    outbound.extend_from_slice(&bytes);
                    events.append(&mut record_events);
                }
                Err(e) => {
                    warn!("engine entering Failed state: {e}");
                    self.handshake = HandshakeState::Failed;
                    return Err(e);
                }
            }
        }

        Ok((outbound, events))
    }

    fn handle_one_record(
        &mut self,
        content_type: ContentType,
        fragment: &[u8],
    ) -> Result<(Vec<u8>, Vec<EngineEvent>)> {
        let plaintext = record_layer::decrypt(&self.provider, &mut self.decryptor, content_type, fragment)?;
        trace!("decrypted {} byte fragment, content_type={:?}", plaintext.len(), content_type);

        if content_type == ContentType::ApplicationData {
            return Ok((Vec::new(), vec![EngineEvent::ApplicationData(plaintext)]));
        }

        let state = std::mem::replace(&mut self.handshake, HandshakeState::Failed);
        let (next_state, result) =
            handshake::handle_record(state, &self.provider, &self.config, content_type, &plaintext);
        self.handshake = next_state;
        let commands = result?;

        let just_established = self.handshake.is_established();
        let (outbound, events) = self.fold_commands(commands)?;
        let mut events = events;
        if just_established {
            debug!("handshake established");
            events.push(EngineEvent::HandshakeEstablished);
        }
        Ok((outbound, events))
    }

    /// Fold handshake commands over the outbound encryptor in order: a
    /// `ChangeEncryptor` between two `Send`s changes how the second is
    /// protected, not the first. `ChangeDecryptor` takes effect immediately
    /// too, but only the next inbound record observes it.
    fn fold_commands(
        &mut self,
        commands: Vec<RecordCommand>,
    ) -> Result<(Vec<u8>, Vec<EngineEvent>)> {
        let mut outbound = Vec::new();
        let mut events = Vec::new();

        for command in commands {
            match command {
                RecordCommand::Send(content_type, fragment) => {
                    let protected =
                        record_layer::encrypt(&self.provider, &mut self.encryptor, content_type, &fragment)?;
                    outbound.extend_from_slice(&wire::assemble_record(content_type, &protected));
                }
                RecordCommand::ChangeEncryptor(ctx) => {
                    self.encryptor = CryptoState::Active(ctx);
                }
                RecordCommand::ChangeDecryptor(ctx) => {
                    self.decryptor = CryptoState::Active(ctx);
                }
                RecordCommand::AlertReceived(alert) => {
                    events.push(EngineEvent::AlertReceived {
                        level: alert.level,
                        description: alert.description,
                    });
                }
            }
        }

        Ok((outbound, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::RustCryptoProvider;
    use crate::suite::CipherSuite;
    use crate::wire::HandshakeType;
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::Pkcs1v15Encrypt;

    const TEST_KEY_PEM: &str = include_str!("../tests/fixtures/test_key.pem");

    fn test_engine() -> Engine<RustCryptoProvider> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(TEST_KEY_PEM).expect("valid test key");
        let config = EngineConfig {
            cert_chain: vec![vec![0xAA, 0xBB, 0xCC]],
            private_key,
        };
        Engine::new(RustCryptoProvider::new(), config)
    }

    fn client_hello_record(suite: CipherSuite) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&wire::TLS_1_0_VERSION);
        body.extend_from_slice(&[9u8; 32]);
        body.push(0);
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&suite.to_id().to_be_bytes());
        body.push(1);
        body.push(0);
        let message = wire::assemble_handshake(HandshakeType::ClientHello, &body);
        wire::assemble_record(ContentType::Handshake, &message)
    }

    #[test]
    fn client_hello_elicits_three_record_flight() {
        let mut engine = test_engine();
        let (outbound, events) = engine
            .handle(&client_hello_record(CipherSuite::RsaWith3DesEdeCbcSha))
            .unwrap();
        assert!(events.is_empty());

        // ServerHello, Certificate, ServerHelloDone, each its own record.
        let records = wire::split_records(&outbound).unwrap();
        assert_eq!(records.len(), 3);
        for (header, _) in &records {
            assert_eq!(header.content_type, ContentType::Handshake);
        }
        assert!(!engine.is_established());
    }

    #[test]
    fn unsupported_suite_fails_and_terminates_engine() {
        let mut engine = test_engine();
        let err = engine
            .handle(&client_hello_record(CipherSuite::NullWithNullNull))
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolError(_)));

        let again = engine.handle(&client_hello_record(CipherSuite::RsaWith3DesEdeCbcSha));
        assert_eq!(again, Err(EngineError::Terminated));
    }

    /// Drives a full handshake to `Established` using the real RSA public
    /// key paired with the test engine's private key, then exercises one
    /// application-data round trip.
    #[test]
    fn full_handshake_reaches_established_and_exchanges_application_data() {
        let mut engine = test_engine();
        let provider = RustCryptoProvider::new();

        let client_random = [9u8; 32];
        let suite = CipherSuite::RsaWith3DesEdeCbcSha;

        // 1. ClientHello -> ServerHello/Certificate/ServerHelloDone.
        let mut hello_body = Vec::new();
        hello_body.extend_from_slice(&wire::TLS_1_0_VERSION);
        hello_body.extend_from_slice(&client_random);
        hello_body.push(0);
        hello_body.extend_from_slice(&2u16.to_be_bytes());
        hello_body.extend_from_slice(&suite.to_id().to_be_bytes());
        hello_body.push(1);
        hello_body.push(0);
        let client_hello = wire::assemble_handshake(HandshakeType::ClientHello, &hello_body);
        let (flight1, _) = engine
            .handle(&wire::assemble_record(ContentType::Handshake, &client_hello))
            .unwrap();

        let records = wire::split_records(&flight1).unwrap();
        let (_, server_hello_fragment) = records[0];
        let (server_hello_type, server_hello_body) =
            split_for_test(server_hello_fragment).unwrap();
        assert_eq!(server_hello_type, HandshakeType::ServerHello);
        let mut server_random = [0u8; 32];
        server_random.copy_from_slice(&server_hello_body[2..34]);

        // 2. ClientKeyExchange: encrypt a known pre-master secret under the
        // server's real public key.
        let public_key = RsaPrivateKey::from_pkcs1_pem(TEST_KEY_PEM)
            .expect("valid test key")
            .to_public_key();
        let mut pre_master_secret = vec![0u8; 48];
        pre_master_secret[0] = 0x03;
        pre_master_secret[1] = 0x01;
        for (i, b) in pre_master_secret.iter_mut().enumerate().skip(2) {
            *b = i as u8;
        }
        let mut rng = rand::rngs::OsRng;
        let ciphertext = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, &pre_master_secret)
            .unwrap();
        let mut cke_body = Vec::new();
        cke_body.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
        cke_body.extend_from_slice(&ciphertext);
        let cke = wire::assemble_handshake(HandshakeType::ClientKeyExchange, &cke_body);
        let (flight2, _) = engine
            .handle(&wire::assemble_record(ContentType::Handshake, &cke))
            .unwrap();
        assert!(flight2.is_empty());

        // Recompute the master secret and key block exactly as the engine
        // does, to build a correct client Finished.
        let master_secret = provider.prf_master_secret(&pre_master_secret, &client_random, &server_random);
        let key_block_len = 2 * suite.mac_key_length() + 2 * suite.key_length() + 2 * suite.iv_length();
        let key_block = provider.prf_key_block(key_block_len, &master_secret, &server_random, &client_random);
        let mac_len = suite.mac_key_length();
        let key_len = suite.key_length();
        let iv_len = suite.iv_length();
        let client_mac = key_block[0..mac_len].to_vec();
        let client_key = key_block[2 * mac_len..2 * mac_len + key_len].to_vec();
        let client_iv =
            key_block[2 * mac_len + 2 * key_len..2 * mac_len + 2 * key_len + iv_len].to_vec();

        // 3. ClientChangeCipherSpec (clear) + client Finished (newly encrypted).
        let ccs = wire::assemble_record(ContentType::ChangeCipherSpec, &wire::CHANGE_CIPHER_SPEC_BODY);

        let mut transcript = Vec::new();
        transcript.extend_from_slice(&client_hello);
        // flight1's three records were sent before any encryptor was
        // installed, so each record's fragment is exactly its handshake
        // message bytes.
        for (_, fragment) in &records {
            transcript.extend_from_slice(fragment);
        }
        transcript.extend_from_slice(&cke);
        use md5::{Digest as _, Md5};
        use sha1::{Digest as _, Sha1};
        let mut md5 = Md5::new();
        md5.update(&transcript);
        let mut sha1 = Sha1::new();
        sha1.update(&transcript);
        let mut digest = Vec::new();
        digest.extend_from_slice(&md5.finalize());
        digest.extend_from_slice(&sha1.finalize());
        let client_verify_data = provider.prf_finished(&master_secret, "client finished", &digest);
        let client_finished = wire::assemble_finished(&client_verify_data);

        let mut client_encryptor = CryptoState::Active(record_layer::CryptoContext::new(
            &provider, suite, client_mac, client_key, client_iv,
        ));
        let protected_finished = record_layer::encrypt(
            &provider,
            &mut client_encryptor,
            ContentType::Handshake,
            &client_finished,
        )
        .unwrap();
        let finished_record = wire::assemble_record(ContentType::Handshake, &protected_finished);

        let mut inbound = ccs;
        inbound.extend_from_slice(&finished_record);
        let (flight3, events) = engine.handle(&inbound).unwrap();
        assert!(matches!(events[0], EngineEvent::HandshakeEstablished));
        assert!(engine.is_established());

        let server_flight = wire::split_records(&flight3).unwrap();
        assert_eq!(server_flight[0].0.content_type, ContentType::ChangeCipherSpec);
        assert_eq!(server_flight[1].0.content_type, ContentType::Handshake);
    }

    fn split_for_test(fragment: &[u8]) -> Option<(HandshakeType, &[u8])> {
        let msg_type = HandshakeType::from_byte(fragment[0])?;
        let len = ((fragment[1] as usize) << 16) | ((fragment[2] as usize) << 8) | fragment[3] as usize;
        Some((msg_type, &fragment[4..4 + len]))
    }
}
