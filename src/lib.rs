//! Server-side TLS 1.0 (RFC 2246) record-and-handshake engine.
//!
//! This crate is a pure state machine: feed [`Engine::handle`] inbound
//! bytes, get outbound bytes and events back. There is no socket I/O, no
//! timekeeping, and no concurrency inside it — the host owns the transport
//! and drives the engine from whatever event loop it already has.
//!
//! In scope: the server-role handshake (ClientHello through Finished, plus
//! renegotiation), master secret and key block derivation, and the record
//! layer (framing, MAC, cipher, sequence numbers). Cryptographic primitives
//! themselves are consumed through [`primitives::CryptoProvider`], a narrow
//! facade the engine is written against rather than a specific
//! implementation.

pub mod engine;
pub mod error;
pub mod handshake;
pub mod primitives;
pub mod record_layer;
pub mod suite;
pub mod wire;

pub use engine::{Engine, EngineConfig, EngineEvent};
pub use error::EngineError;
pub use primitives::{CryptoProvider, RustCryptoProvider};
pub use suite::CipherSuite;
