use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::webhook::parse_event_time;

type HmacSha256 = Hmac<Sha256>;

const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature is missing")]
    MissingSignature,
    #[error("timestamp is missing")]
    MissingTimestamp,
    #[error("signature is not valid hex")]
    MalformedSignature,
    #[error("timestamp `{0}` is not a recognized time")]
    MalformedTimestamp(String),
    #[error("timestamp is {age_secs}s old, beyond the {max_age_secs}s window")]
    Expired { age_secs: i64, max_age_secs: i64 },
    #[error("timestamp is {ahead_secs}s in the future")]
    FromFuture { ahead_secs: i64 },
    #[error("signature does not match")]
    Mismatch,
    #[error("webhook secret cannot be used as an HMAC key")]
    InvalidKey,
}

/// Verifies HMAC-SHA256 signatures over `"{timestamp}.{body}"`.
#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    secret: SecretString,
    max_age: Duration,
    future_tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString, max_age_secs: u64, future_tolerance_secs: u64) -> Self {
        Self {
            secret,
            max_age: window(max_age_secs),
            future_tolerance: window(future_tolerance_secs),
        }
    }

    /// Hex signature for `timestamp` and `body`, as the provider computes it.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        Ok(hex::encode(self.mac(timestamp, body)?.finalize().into_bytes()))
    }

    /// Checks freshness first, then the MAC in constant time. The signature
    /// may carry a `sha256=` or `v1=` scheme prefix.
    pub fn verify(
        &self,
        signature: &str,
        timestamp: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let signature = signature.trim();
        if signature.is_empty() {
            return Err(SignatureError::MissingSignature);
        }
        let timestamp = timestamp.trim();
        if timestamp.is_empty() {
            return Err(SignatureError::MissingTimestamp);
        }

        let sent_at = parse_event_time(timestamp)
            .ok_or_else(|| SignatureError::MalformedTimestamp(timestamp.to_string()))?;
        let age = now - sent_at;
        if age > self.max_age {
            return Err(SignatureError::Expired {
                age_secs: age.num_seconds(),
                max_age_secs: self.max_age.num_seconds(),
            });
        }
        if -age > self.future_tolerance {
            return Err(SignatureError::FromFuture { ahead_secs: (-age).num_seconds() });
        }

        let hex_part = signature
            .strip_prefix("sha256=")
            .or_else(|| signature.strip_prefix("v1="))
            .unwrap_or(signature);
        let provided = hex::decode(hex_part).map_err(|_| SignatureError::MalformedSignature)?;

        self.mac(timestamp, body)?.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
    }

    pub fn is_authentic(
        &self,
        signature: &str,
        timestamp: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> bool {
        self.verify(signature, timestamp, body, now).is_ok()
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{SignatureError, SignatureVerifier};

    const BODY: &[u8] = br#"{"event_type":"call.ended","call_id":"c-123"}"#;
    const SENT_AT: &str = "1772359200";

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("whsec-test".to_string().into(), 300, 30)
    }

    fn sent_at() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_772_359_200, 0).single().expect("valid timestamp")
    }

    #[test]
    fn valid_signature_is_accepted_with_or_without_prefix() {
        let verifier = verifier();
        let signature = verifier.sign(SENT_AT, BODY).expect("sign");
        let now = sent_at() + Duration::seconds(10);

        assert_eq!(verifier.verify(&signature, SENT_AT, BODY, now), Ok(()));
        assert!(verifier.is_authentic(&format!("sha256={signature}"), SENT_AT, BODY, now));
        assert!(verifier.is_authentic(&format!("v1={signature}"), SENT_AT, BODY, now));
    }

    #[test]
    fn tampered_body_or_wrong_secret_is_rejected() {
        let verifier = verifier();
        let signature = verifier.sign(SENT_AT, BODY).expect("sign");
        let other = SignatureVerifier::new("other-secret".to_string().into(), 300, 30);

        assert_eq!(
            verifier.verify(&signature, SENT_AT, b"{}", sent_at()),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            other.verify(&signature, SENT_AT, BODY, sent_at()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_and_future_timestamps_are_rejected_before_mac_check() {
        let verifier = verifier();
        let signature = verifier.sign(SENT_AT, BODY).expect("sign");

        let stale = verifier.verify(&signature, SENT_AT, BODY, sent_at() + Duration::seconds(301));
        assert!(matches!(stale, Err(SignatureError::Expired { age_secs: 301, .. })));

        let future = verifier.verify(&signature, SENT_AT, BODY, sent_at() - Duration::seconds(31));
        assert_eq!(future, Err(SignatureError::FromFuture { ahead_secs: 31 }));

        let edge = verifier.verify(&signature, SENT_AT, BODY, sent_at() + Duration::seconds(300));
        assert_eq!(edge, Ok(()));
    }

    #[test]
    fn malformed_inputs_are_reported() {
        let verifier = verifier();

        assert_eq!(
            verifier.verify("", SENT_AT, BODY, sent_at()),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verifier.verify("zz-not-hex", SENT_AT, BODY, sent_at()),
            Err(SignatureError::MalformedSignature)
        );
        assert_eq!(
            verifier.verify("abcd", "last tuesday", BODY, sent_at()),
            Err(SignatureError::MalformedTimestamp("last tuesday".to_string()))
        );
    }
}
