use crate::protocol::{codec::CodecError, decoder::DecodeError, registry::Phase};

/// Errors that terminate a verification session.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unknown packet id {id:#04x} in phase {phase:?}")]
    UnknownPacketId { id: i32, phase: Phase },
    #[error("packet {packet} arrived out of order in phase {phase:?}")]
    OutOfOrder { packet: &'static str, phase: Phase },
    #[error("unsupported protocol version {0}")]
    InvalidProtocol(i32),
    #[error("username failed validation")]
    InvalidUsername,
    #[error("client brand failed validation")]
    InvalidBrand,
    #[error("client locale failed validation")]
    InvalidLocale,
    #[error("gravity violation at tick {tick}: expected y {expected}, got {actual}")]
    GravityViolation { tick: u32, expected: f64, actual: f64 },
    #[error("player missed the platform at ({x}, {y}, {z})")]
    CollisionMissed { x: f64, y: f64, z: f64 },
    #[error("keep-alive id mismatch: expected {expected}, got {actual}")]
    KeepAliveMismatch { expected: i64, actual: i64 },
    #[error("verification timed out")]
    Timeout,
    #[error("too many packets during verification")]
    TooManyPackets,
    #[error("session cancelled")]
    Cancelled,
}

impl VerifyError {
    /// The disconnect screen shown for this failure.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            VerifyError::InvalidProtocol(_) => DisconnectReason::InvalidProtocol,
            VerifyError::InvalidUsername => DisconnectReason::InvalidUsername,
            _ => DisconnectReason::VerificationFailed,
        }
    }

    /// Whether this failure counts towards blacklist promotion. I/O losses
    /// and cancellation are not the client's fault.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, VerifyError::Io(_) | VerifyError::Cancelled)
    }
}

/// The pre-authored disconnect component keys. The session only picks the
/// reason; serialization to a chat component happens at the wire boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum DisconnectReason {
    TooManyPlayers,
    TooFastReconnect,
    AlreadyVerifying,
    AlreadyQueued,
    Blacklisted,
    InvalidUsername,
    InvalidProtocol,
    AlreadyConnected,
    VerificationFailed,
    VerificationSuccess,
    Lockdown,
}

impl DisconnectReason {
    /// Default screen text; operators override these in the message
    /// configuration.
    pub fn default_text(self) -> &'static str {
        match self {
            DisconnectReason::TooManyPlayers => "Too many players are verifying right now",
            DisconnectReason::TooFastReconnect => "You are reconnecting too fast",
            DisconnectReason::AlreadyVerifying => "Your IP is already being verified",
            DisconnectReason::AlreadyQueued => "Your IP is already queued for verification",
            DisconnectReason::Blacklisted => "You are temporarily blocked from joining",
            DisconnectReason::InvalidUsername => "Your username is invalid",
            DisconnectReason::InvalidProtocol => "Your client version is unsupported",
            DisconnectReason::AlreadyConnected => "You are already connected",
            DisconnectReason::VerificationFailed => "Verification failed, please rejoin",
            DisconnectReason::VerificationSuccess => "Verified! Please rejoin",
            DisconnectReason::Lockdown => "The server is currently locked down",
        }
    }

    /// The JSON chat component sent in a `Disconnect` packet.
    pub fn component(self) -> String {
        // Screen texts are static and contain no characters that need
        // escaping in JSON.
        format!("{{\"text\":\"{}\"}}", self.default_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_keys_are_camel_case() {
        assert_eq!(DisconnectReason::TooFastReconnect.as_ref(), "tooFastReconnect");
        assert_eq!(DisconnectReason::VerificationSuccess.as_ref(), "verificationSuccess");
    }

    #[test]
    fn component_is_json_chat() {
        assert_eq!(
            DisconnectReason::Blacklisted.component(),
            "{\"text\":\"You are temporarily blocked from joining\"}"
        );
    }

    #[test]
    fn io_does_not_count_as_failure() {
        let error = VerifyError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(!error.counts_as_failure());
        assert!(VerifyError::Timeout.counts_as_failure());
    }
}
