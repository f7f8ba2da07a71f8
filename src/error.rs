//! Engine error types.
//!
//! Every fatal condition the engine can hit is one of these four kinds.
//! There is no "recoverable" tier: all of them push the handshake state to
//! [`crate::handshake::HandshakeState::Failed`] and the engine refuses
//! further input from then on.

use core::fmt;

/// Errors the engine can return from [`crate::Engine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Unexpected message type for the current handshake state, malformed
    /// handshake framing, mismatched Finished verify_data, or an offered
    /// ciphersuite set that omits the one supported suite.
    ProtocolError(ProtocolErrorKind),
    /// Record-layer MAC verification failure, or block-cipher padding
    /// malformed.
    BadMac,
    /// Primitive-layer failure (RSA decryption, PRF, cipher).
    CryptoError(&'static str),
    /// A record header's declared length exceeds the remaining input.
    UnexpectedFragment,
    /// The engine already hit a fatal error on a previous call and refuses
    /// further input: once an error is returned, the engine enters a
    /// terminal error state.
    Terminated,
}

/// Detail carried by [`EngineError::ProtocolError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// `(content_type, handshake_message_type)` did not match any legal
    /// transition out of the current handshake state.
    UnexpectedMessage {
        content_type: u8,
        handshake_type: Option<u8>,
    },
    /// Handshake message body did not parse.
    MalformedMessage(&'static str),
    /// None of the offered cipher suites are supported.
    NoSupportedCipherSuite,
    /// Finished `verify_data` did not match the expected value.
    FinishedMismatch,
    /// ChangeCipherSpec body was not the single byte `0x01`.
    MalformedChangeCipherSpec,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ProtocolError(kind) => write!(f, "protocol error: {kind}"),
            EngineError::BadMac => write!(f, "record MAC verification failed"),
            EngineError::CryptoError(msg) => write!(f, "crypto primitive failure: {msg}"),
            EngineError::UnexpectedFragment => {
                write!(f, "record declared length exceeds available input")
            }
            EngineError::Terminated => write!(f, "engine is in a terminal error state"),
        }
    }
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolErrorKind::UnexpectedMessage {
                content_type,
                handshake_type,
            } => write!(
                f,
                "unexpected record (content_type={content_type}, handshake_type={handshake_type:?})"
            ),
            ProtocolErrorKind::MalformedMessage(what) => write!(f, "malformed {what}"),
            ProtocolErrorKind::NoSupportedCipherSuite => {
                write!(f, "client offered no supported cipher suite")
            }
            ProtocolErrorKind::FinishedMismatch => write!(f, "Finished verify_data mismatch"),
            ProtocolErrorKind::MalformedChangeCipherSpec => {
                write!(f, "ChangeCipherSpec body was not a single 0x01 byte")
            }
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = core::result::Result<T, EngineError>;
