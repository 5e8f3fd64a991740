// =============================================================================
// CoreError — the taxonomy every venue adapter, the router, and the IPC
// broker normalize their failures into before a report reaches a strategy.
// =============================================================================
//
// Anything that can be recovered locally (a dropped stream, a failed
// keepalive) is handled inside the component that owns it and never becomes
// a `CoreError`. What remains here is exactly what a strategy or operator
// needs to branch on.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("venue error {code}: {msg}")]
    Venue { code: i64, msg: String },

    #[error("operation unsupported for this market variant")]
    CapabilityUnsupported,

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("credential incomplete for venue {venue}: missing {field}")]
    CredentialIncomplete { venue: String, field: &'static str },

    #[error("duplicate client_order_id: {0}")]
    DuplicateClientOrderId(String),

    #[error("signature payload malformed: {0}")]
    SignPayloadMalformed(String),

    #[error("capacity overflow in {0}")]
    Overflow(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CoreError {
    /// Stable string code carried in `OrderReport::error_code` and query
    /// facade responses, so a strategy process can match on a string rather
    /// than a Rust enum.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Transport(_) => "TRANSPORT",
            CoreError::Protocol(_) => "PROTOCOL",
            CoreError::Venue { .. } => "VENUE",
            CoreError::CapabilityUnsupported => "CAPABILITY_UNSUPPORTED",
            CoreError::UnknownStrategy(_) => "UNKNOWN_STRATEGY",
            CoreError::CredentialIncomplete { .. } => "CREDENTIAL_INCOMPLETE",
            CoreError::DuplicateClientOrderId(_) => "DUPLICATE_CLIENT_ORDER_ID",
            CoreError::SignPayloadMalformed(_) => "SIGN_PAYLOAD_MALFORMED",
            CoreError::Overflow(_) => "OVERFLOW",
            CoreError::Config(_) => "CONFIG",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Protocol(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Transport(e.to_string())
    }
}

impl From<std::num::ParseFloatError> for CoreError {
    fn from(e: std::num::ParseFloatError) -> Self {
        CoreError::Protocol(format!("failed to parse float: {e}"))
    }
}

/// Downcast an `anyhow::Error` bubbled up from REST/config plumbing into a
/// `CoreError`, falling back to `Protocol` for anything unrecognized. Mirrors
/// the anyhow-downcast dispatcher a sibling exchange-client crate would use
/// for its own `ApiError`.
pub fn as_core_error(err: anyhow::Error) -> CoreError {
    match err.downcast::<CoreError>() {
        Ok(core) => core,
        Err(err) => match err.downcast::<reqwest::Error>() {
            Ok(e) => CoreError::from(e),
            Err(err) => match err.downcast::<serde_json::Error>() {
                Ok(e) => CoreError::from(e),
                Err(err) => CoreError::Protocol(err.to_string()),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_taxonomy_name() {
        assert_eq!(CoreError::CapabilityUnsupported.code(), "CAPABILITY_UNSUPPORTED");
        assert_eq!(
            CoreError::UnknownStrategy("ghost".into()).code(),
            "UNKNOWN_STRATEGY"
        );
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(CoreError::Transport("timeout".into()).is_retryable());
        assert!(!CoreError::Protocol("bad frame".into()).is_retryable());
        assert!(!CoreError::Venue { code: -1013, msg: "invalid price".into() }.is_retryable());
    }

    #[test]
    fn downcast_recovers_core_error() {
        let err: anyhow::Error = CoreError::UnknownStrategy("ghost".into()).into();
        let recovered = as_core_error(err);
        assert_eq!(recovered.code(), "UNKNOWN_STRATEGY");
    }

    #[test]
    fn downcast_unknown_anyhow_falls_back_to_protocol() {
        let err = anyhow::anyhow!("something unexpected");
        let recovered = as_core_error(err);
        assert_eq!(recovered.code(), "PROTOCOL");
    }
}
