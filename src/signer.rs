// =============================================================================
// Credential & Signer — HMAC-SHA256 request signing
// =============================================================================
//
// Two canonicalizations exist and must not be mixed:
//
//   - HTTP form:  key=value pairs joined with '&' in insertion order (the
//     caller supplies `timestamp` as one of the params; the signer never
//     mints its own). This is the scheme the reference backend's
//     BinanceClient::sign/signed_query uses for REST calls.
//
//   - WS trading params: the same key set but sorted lexicographically by
//     key before joining, used for signed WebSocket trading requests.
//
// SECURITY: the secret never appears in Debug output or error messages.
// =============================================================================

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }

    /// HMAC-SHA256 hex digest of `payload` under this signer's secret.
    fn sign_payload(&self, payload: &str) -> String {
        hex::encode(self.mac_bytes(payload))
    }

    /// HMAC-SHA256 base64 digest of `payload`. OKX's REST and WS signatures
    /// use base64 rather than hex.
    pub fn sign_payload_base64(&self, payload: &str) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.mac_bytes(payload))
    }

    fn mac_bytes(&self, payload: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn validate_params(params: &[(&str, String)]) -> Result<(), CoreError> {
        for (k, v) in params {
            if v.contains('&') || v.contains('=') {
                return Err(CoreError::SignPayloadMalformed(format!(
                    "param '{k}' contains unescaped '&' or '='"
                )));
            }
        }
        Ok(())
    }

    /// Build and sign an HTTP-form query string: params in insertion order,
    /// `signature=<hex>` appended last. The caller supplies `timestamp` as
    /// one of `params` (§4.A: "the signer does not clock-skew adjust").
    pub fn sign_http_form(&self, params: &[(&str, String)]) -> Result<String, CoreError> {
        Self::validate_params(params)?;

        let base = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let sig = self.sign_payload(&base);
        if base.is_empty() {
            Ok(format!("signature={sig}"))
        } else {
            Ok(format!("{base}&signature={sig}"))
        }
    }

    /// Build and sign a WebSocket trading-params object: the same key set
    /// (including `apiKey`/`timestamp`, which the caller must have already
    /// inserted into `params`) sorted lexicographically by key, joined, then
    /// signed. Returns the hex signature only — the caller inserts it under
    /// `signature` in the outgoing request object.
    pub fn sign_ws_params(&self, params: &[(&str, String)]) -> Result<String, CoreError> {
        Self::validate_params(params)?;

        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let payload = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        Ok(self.sign_payload(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let signer = Signer::new("secret123");
        let params = [("symbol", "BTCUSDT".to_string()), ("side", "BUY".to_string())];
        let sig1 = signer.sign_ws_params(&params).unwrap();
        let sig2 = signer.sign_ws_params(&params).unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn ws_params_are_sorted_lexicographically_before_signing() {
        let signer = Signer::new("secret123");
        // out-of-order insertion
        let unsorted = [
            ("timestamp", "1000".to_string()),
            ("apiKey", "abc".to_string()),
            ("symbol", "BTCUSDT".to_string()),
        ];
        let pre_sorted = [
            ("apiKey", "abc".to_string()),
            ("symbol", "BTCUSDT".to_string()),
            ("timestamp", "1000".to_string()),
        ];
        assert_eq!(
            signer.sign_ws_params(&unsorted).unwrap(),
            signer.sign_ws_params(&pre_sorted).unwrap()
        );
    }

    #[test]
    fn http_form_preserves_insertion_order_and_signs_caller_supplied_params() {
        let signer = Signer::new("secret123");
        let params = [
            ("symbol", "BTCUSDT".to_string()),
            ("side", "BUY".to_string()),
            ("timestamp", "1700000000000".to_string()),
        ];
        let signed = signer.sign_http_form(&params).unwrap();
        assert!(signed.starts_with("symbol=BTCUSDT&side=BUY&timestamp=1700000000000&signature="));
    }

    #[test]
    fn http_form_does_not_mint_its_own_timestamp() {
        let signer = Signer::new("secret123");
        let params = [("symbol", "BTCUSDT".to_string())];
        let signed = signer.sign_http_form(&params).unwrap();
        assert!(!signed.contains("timestamp"));
    }

    #[test]
    fn malformed_param_rejected() {
        let signer = Signer::new("secret123");
        let params = [("note", "a=b".to_string())];
        let err = signer.sign_http_form(&params).unwrap_err();
        assert_eq!(err.code(), "SIGN_PAYLOAD_MALFORMED");
    }

    #[test]
    fn base64_digest_is_deterministic_and_differs_from_hex() {
        let signer = Signer::new("secret123");
        let b64 = signer.sign_payload_base64("GET/api/v5/account/balance1700000000000");
        let b64_again = signer.sign_payload_base64("GET/api/v5/account/balance1700000000000");
        assert_eq!(b64, b64_again);
        assert!(!b64.is_empty());
    }

    #[test]
    fn adding_whitespace_changes_signature() {
        let signer = Signer::new("secret123");
        let a = [("symbol", "BTCUSDT".to_string())];
        let b = [("symbol", "BTCUSDT ".to_string())];
        assert_ne!(signer.sign_ws_params(&a).unwrap(), signer.sign_ws_params(&b).unwrap());
    }
}
