//! # Error Taxonomy
//!
//! Every module owns its own `thiserror` enum. What they share is the
//! *class* of failure, which decides what the caller does next: reject the
//! input, flag a security event, or quietly try the next resolution source.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of every failure the protocol can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad name format, undecodable bytes, wrong field lengths.
    /// Rejected immediately, never partially applied.
    MalformedInput,
    /// Proof-of-work below the requirement or not meeting its own target.
    InsufficientWork,
    /// Record expired, or a timestamp outside its acceptance window.
    ExpiredOrFuture,
    /// A (sub-)signature failed or the hybrid age window was exceeded.
    InvalidSignature,
    /// A nonce was redeemed twice. Security telemetry, not a plain reject.
    ReplayDetected,
    /// The previous-record hash does not match.
    ChainMismatch,
    /// A DHT/bootstrap/substrate call timed out or failed at the network level.
    Unreachable,
    /// The name is held by another owner.
    NameTaken,
    /// Local persistence or serialization failure.
    Storage,
    /// Work was cancelled by the caller.
    Cancelled,
}

impl ErrorClass {
    /// Whether this class should be reported on the security channel.
    pub fn is_security_event(self) -> bool {
        matches!(self, ErrorClass::ReplayDetected | ErrorClass::InvalidSignature)
    }

    /// Stable snake_case label, used in HTTP bodies and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::MalformedInput => "malformed_input",
            ErrorClass::InsufficientWork => "insufficient_work",
            ErrorClass::ExpiredOrFuture => "expired_or_future",
            ErrorClass::InvalidSignature => "invalid_signature",
            ErrorClass::ReplayDetected => "replay_detected",
            ErrorClass::ChainMismatch => "chain_mismatch",
            ErrorClass::Unreachable => "unreachable",
            ErrorClass::NameTaken => "name_taken",
            ErrorClass::Storage => "storage",
            ErrorClass::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
