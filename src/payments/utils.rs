use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Thin JSON client shared by the provider adapters. One attempt per call:
/// retrying is the caller's decision, the engine owns the retry policy.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            timeout,
        })
    }

    pub async fn request_value(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<JsonValue> {
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .bearer_auth(bearer_token);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                PaymentError::NetworkError {
                    message: format!("{} request failed: {}", self.provider, e),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PaymentError::NetworkError {
            message: format!("failed to read {} response body: {}", self.provider, e),
        })?;

        if status.as_u16() == 429 {
            return Err(PaymentError::RateLimitError {
                message: format!("{} rate limit exceeded", self.provider),
                retry_after_seconds: None,
            });
        }

        if !status.is_success() {
            warn!(
                provider = self.provider,
                status = %status,
                "provider returned non-success status"
            );
            return Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("HTTP {}: {}", status, truncate(&text, 256)),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        serde_json::from_str::<JsonValue>(&text).map_err(|e| PaymentError::MalformedResponse {
            provider: self.provider.to_string(),
            message: format!("invalid JSON: {}", e),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self, value: JsonValue) -> PaymentResult<T> {
        serde_json::from_value(value).map_err(|e| PaymentError::MalformedResponse {
            provider: self.provider.to_string(),
            message: format!("unexpected response shape: {}", e),
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Hex-encoded HMAC-SHA512 check; the comparison is constant-time.
pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    // HMAC accepts keys of any length
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Reads a JSON field that providers send either as a string or a number.
pub(crate) fn json_id(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn webhook_hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        assert!(!verify_hmac_sha512_hex(payload, "secret", "not-a-valid-signature"));
        assert!(!verify_hmac_sha512_hex(payload, "secret", ""));
    }

    #[test]
    fn webhook_hmac_verification_accepts_own_signature() {
        let payload = br#"{"event":"charge.success","data":{"reference":"abc"}}"#;
        let signature = sign_hmac_sha512_hex(payload, "sk_test_secret");
        assert_eq!(signature.len(), 128);
        assert!(verify_hmac_sha512_hex(payload, "sk_test_secret", &signature));
        assert!(verify_hmac_sha512_hex(
            payload,
            "sk_test_secret",
            &signature.to_uppercase()
        ));
        assert!(!verify_hmac_sha512_hex(payload, "other_secret", &signature));

        let tampered = br#"{"event":"charge.success","data":{"reference":"abd"}}"#;
        assert!(!verify_hmac_sha512_hex(tampered, "sk_test_secret", &signature));
    }

    #[test]
    fn json_id_reads_strings_and_numbers() {
        let value = serde_json::json!({"a": 42, "b": "x1", "c": "", "d": null});
        assert_eq!(json_id(value.get("a")).as_deref(), Some("42"));
        assert_eq!(json_id(value.get("b")).as_deref(), Some("x1"));
        assert_eq!(json_id(value.get("c")), None);
        assert_eq!(json_id(value.get("d")), None);
        assert_eq!(json_id(value.get("missing")), None);
    }
}
