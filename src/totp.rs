//! Time-based one-time password second factor.
//!
//! Codes are SHA1, six digits, 30 second steps; the step before and after
//! the current one are accepted to absorb clock drift.

use base64ct::{Base64, Encoding};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::clock::Clock;
use crate::error::{Error, Result};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

fn code_format() -> &'static Regex {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| Regex::new(r"^[0-9]{6}$").unwrap_or_else(|_| unreachable!()))
}

/// Decode a base32 secret, tolerating lowercase, spaces and padding.
fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return Err(Error::Validation("TOTP secret is empty".to_string()));
    }
    let bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| Error::Validation(format!("TOTP secret is not valid base32: {e:?}")))?;
    if bytes.is_empty() {
        return Err(Error::Validation("TOTP secret decodes to nothing".to_string()));
    }
    Ok(bytes)
}

fn build(secret: &str, issuer: Option<String>, account: String) -> Result<TOTP> {
    let bytes = decode_secret(secret)?;
    Ok(TOTP::new_unchecked(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        bytes,
        issuer,
        account,
    ))
}

/// Scannable enrollment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioning {
    /// `otpauth://totp/...` URL.
    pub url: String,
    /// QR code of `url`, PNG encoded.
    pub png: Vec<u8>,
}

impl Provisioning {
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", Base64::encode_string(&self.png))
    }
}

#[derive(Clone)]
pub struct TotpVerifier {
    clock: Arc<dyn Clock>,
}

impl TotpVerifier {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Enrollment payload for `secret`, labelled `issuer:account`.
    ///
    /// # Errors
    /// `Error::Validation` for an empty or non-base32 secret, or labels
    /// containing `:`; `Error::Qr` if the image cannot be rendered.
    pub fn provisioning_payload(
        &self,
        secret: &str,
        issuer: &str,
        account: &str,
    ) -> Result<Provisioning> {
        if issuer.contains(':') || account.contains(':') {
            return Err(Error::Validation(
                "issuer and account labels must not contain ':'".to_string(),
            ));
        }
        let totp = build(secret, Some(issuer.to_string()), account.to_string())?;
        let png = totp.get_qr_png().map_err(Error::Qr)?;
        Ok(Provisioning {
            url: totp.get_url(),
            png,
        })
    }

    /// Check `code` against the current step and its neighbours.
    ///
    /// # Errors
    /// Only for a malformed secret; a wrong code is `Ok(false)`.
    pub fn validate(&self, secret: &str, code: &str) -> Result<bool> {
        let now = u64::try_from(self.clock.now().timestamp()).unwrap_or_default();
        self.validate_at(secret, code, now)
    }

    /// [`validate`](Self::validate) at an explicit unix time.
    ///
    /// # Errors
    /// Only for a malformed secret.
    pub fn validate_at(&self, secret: &str, code: &str, unix_seconds: u64) -> Result<bool> {
        let totp = build(secret, None, String::new())?;
        let code = code.trim();
        if !code_format().is_match(code) {
            return Ok(false);
        }
        Ok(totp.check(code, unix_seconds))
    }

    /// Code for the step containing `unix_seconds`.
    ///
    /// # Errors
    /// Only for a malformed secret.
    pub fn code_at(&self, secret: &str, unix_seconds: u64) -> Result<String> {
        Ok(build(secret, None, String::new())?.generate(unix_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Duration};

    // RFC 6238 test seed "12345678901234567890" in base32.
    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    const T: u64 = 1_111_111_109;

    fn verifier() -> (TotpVerifier, Arc<ManualClock>) {
        let start = DateTime::from_timestamp(T as i64, 0).unwrap_or_default();
        let clock = Arc::new(ManualClock::new(start));
        (TotpVerifier::new(clock.clone()), clock)
    }

    #[test]
    fn rfc6238_reference_code() {
        let (verifier, _) = verifier();
        // RFC 6238 appendix B, SHA1, truncated to six digits.
        assert_eq!(verifier.code_at(SECRET, T).ok().as_deref(), Some("081804"));
    }

    #[test]
    fn current_code_validates_and_wrong_code_does_not() {
        let (verifier, _) = verifier();
        let current = verifier.code_at(SECRET, T).unwrap_or_default();
        assert!(verifier.validate(SECRET, &current).unwrap_or(false));

        let wrong = if current == "000000" { "000001" } else { "000000" };
        assert!(!verifier.validate(SECRET, wrong).unwrap_or(true));
    }

    #[test]
    fn adjacent_steps_are_accepted_but_not_further() {
        let (verifier, clock) = verifier();
        let previous = verifier.code_at(SECRET, T - STEP_SECONDS).unwrap_or_default();
        assert!(verifier.validate(SECRET, &previous).unwrap_or(false));

        clock.advance(Duration::seconds(3 * STEP_SECONDS as i64));
        assert!(!verifier.validate(SECRET, &previous).unwrap_or(true));
    }

    #[test]
    fn badly_formatted_codes_simply_do_not_match() {
        let (verifier, _) = verifier();
        for candidate in ["", "12345", "1234567", "abcdef"] {
            assert!(matches!(verifier.validate(SECRET, candidate), Ok(false)));
        }
    }

    #[test]
    fn malformed_secret_is_a_validation_error() {
        let (verifier, _) = verifier();
        assert!(matches!(
            verifier.validate("", "123456"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            verifier.validate("not base32 !!", "123456"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            verifier.provisioning_payload("", "custodia", "alice"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn lowercase_and_spaced_secrets_are_normalized() {
        let (verifier, _) = verifier();
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(
            verifier.code_at(spaced, T).ok(),
            verifier.code_at(SECRET, T).ok()
        );
    }

    #[test]
    fn provisioning_payload_is_deterministic() {
        let (verifier, _) = verifier();
        let first = verifier.provisioning_payload(SECRET, "custodia", "alice");
        let second = verifier.provisioning_payload(SECRET, "custodia", "alice");
        let (Ok(first), Ok(second)) = (first, second) else {
            panic!("provisioning failed");
        };
        assert_eq!(first, second);
        assert!(first.url.starts_with("otpauth://totp/"));
        assert!(first.url.contains(&format!("secret={SECRET}")));
        assert!(first.url.contains("issuer=custodia"));
        assert!(first.png.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(first.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn provisioning_rejects_colons_in_labels() {
        let (verifier, _) = verifier();
        assert!(matches!(
            verifier.provisioning_payload(SECRET, "cust:odia", "alice"),
            Err(Error::Validation(_))
        ));
    }
}
