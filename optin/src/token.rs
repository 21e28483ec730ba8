// SPDX-License-Identifier: MIT

//! Token issuance and verification.
//!
//! Two token classes exist, with different signing backends and different
//! expiry windows:
//!
//! * CSRF tokens: `"{timestamp}.{signature}"`, HMAC'd with the local secret.
//!   They only prove that a form post originated from a page this service
//!   rendered recently, so a fast in-process secret is enough.
//! * Confirmation/unsubscribe tokens: three URL-safe base64 segments,
//!   `subject/timestamp/mac`, authenticated by the remote MAC service. These
//!   gate irreversible external actions, so the signing key is delegated to a
//!   separate, auditable service and never enters this process.
//!
//! Verification treats every malformed input as invalid rather than an error;
//! only a failure of the remote MAC service itself escapes as an
//! infrastructure error.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64ct::{Base64UrlUnpadded, Encoding};

use crate::{
    error::Error,
    signer::{LocalSigner, MacService},
};

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

// A token issued at `issued` is fresh at `now` while its age is at most
// `max_age`; age exactly equal to the window is still valid, one second past
// it is not. Future-dated timestamps never verify.
fn fresh(issued: i64, now: i64, max_age: Duration) -> bool {
    issued <= now && (now - issued) <= max_age.as_secs() as i64
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}

/// Builds and parses both token wire formats.
#[derive(Debug)]
pub struct TokenCodec<M> {
    local: LocalSigner,
    mac: M,
    csrf_max_age: Duration,
    confirm_max_age: Duration,
}

impl<M: MacService> TokenCodec<M> {
    /// Create a codec from the local CSRF secret and a MAC service handle.
    pub fn new(
        csrf_secret: &[u8],
        mac: M,
        csrf_max_age: Duration,
        confirm_max_age: Duration,
    ) -> Result<Self, Error> {
        Ok(Self {
            local: LocalSigner::new(csrf_secret)?,
            mac,
            csrf_max_age,
            confirm_max_age,
        })
    }

    /// Issue a CSRF token for a form rendered at `now`.
    pub fn issue_csrf(&self, now: i64) -> Result<String, Error> {
        let message = now.to_string();
        let signature = self.local.sign(message.as_bytes())?;
        Ok(format!("{message}.{}", hex_encode(&signature)))
    }

    /// Check a CSRF token.
    ///
    /// Any parse failure (wrong segment count, non-numeric timestamp,
    /// non-hex signature) is invalid. This never errors: the local HMAC has
    /// no failure mode worth distinguishing for the caller, and a broken
    /// OpenSSL stack is logged and treated as a failed check.
    pub fn verify_csrf(&self, token: &str, now: i64) -> bool {
        let Some((timestamp, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(issued) = timestamp.parse::<i64>() else {
            return false;
        };
        if !fresh(issued, now, self.csrf_max_age) {
            return false;
        }
        let Some(signature) = hex_decode(signature) else {
            return false;
        };
        self.local
            .verify(timestamp.as_bytes(), &signature)
            .unwrap_or_else(|error| {
                tracing::error!(%error, "CSRF verification failed in openssl");
                false
            })
    }

    /// Issue a confirmation token binding `subject` to the current time.
    ///
    /// The token embeds directly in a URL path: all three segments are
    /// URL-safe base64 without padding, joined by `/`.
    pub async fn issue_confirmation(&self, subject: &str, now: i64) -> Result<String, Error> {
        let message = confirmation_message(subject, now);
        let mac = self.mac.sign(message.as_bytes()).await?;
        Ok(format!(
            "{}/{}/{}",
            Base64UrlUnpadded::encode_string(subject.as_bytes()),
            Base64UrlUnpadded::encode_string(now.to_string().as_bytes()),
            Base64UrlUnpadded::encode_string(&mac)
        ))
    }

    /// Verify a confirmation token against the subject the caller expects.
    ///
    /// The subject check runs before the (potentially remote) signature
    /// check: a captured signature for some other subject is rejected without
    /// a service call. A MAC service failure propagates as
    /// [`Error::Infrastructure`] and is never folded into `TokenInvalid`.
    pub async fn verify_confirmation(
        &self,
        token: &str,
        expected_subject: &str,
        now: i64,
    ) -> Result<(), Error> {
        let (subject, issued, mac) = split_confirmation(token).ok_or_else(|| {
            tracing::debug!("confirmation token failed to parse");
            Error::TokenInvalid
        })?;
        if subject != expected_subject {
            tracing::debug!("confirmation token subject does not match the expected subject");
            return Err(Error::TokenInvalid);
        }
        if !fresh(issued, now, self.confirm_max_age) {
            tracing::debug!(issued, now, "confirmation token is outside its validity window");
            return Err(Error::TokenInvalid);
        }
        let message = confirmation_message(&subject, issued);
        if self.mac.verify(message.as_bytes(), &mac).await? {
            Ok(())
        } else {
            tracing::debug!("MAC service rejected the confirmation signature");
            Err(Error::TokenInvalid)
        }
    }
}

/// Extract the subject and issuance time from a confirmation token without
/// verifying it.
///
/// For subscription confirmations there is no stored pending record; the
/// token itself carries the subject, which the caller then passes back to
/// [`TokenCodec::verify_confirmation`] as the expected subject. Never act on
/// the returned subject before that verification succeeds.
pub fn parse_confirmation(token: &str) -> Result<(String, i64), Error> {
    split_confirmation(token)
        .map(|(subject, issued, _mac)| (subject, issued))
        .ok_or(Error::TokenInvalid)
}

fn confirmation_message(subject: &str, timestamp: i64) -> String {
    format!("{subject}|{timestamp}")
}

fn split_confirmation(token: &str) -> Option<(String, i64, Vec<u8>)> {
    let mut segments = token.split('/');
    let (subject, timestamp, mac) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let subject = Base64UrlUnpadded::decode_vec(subject).ok()?;
    let subject = String::from_utf8(subject).ok()?;
    let timestamp = Base64UrlUnpadded::decode_vec(timestamp).ok()?;
    let issued = std::str::from_utf8(&timestamp).ok()?.parse::<i64>().ok()?;
    let mac = Base64UrlUnpadded::decode_vec(mac).ok()?;
    Some((subject, issued, mac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::test_utils::StaticMac;

    const CSRF_MAX_AGE: Duration = Duration::from_secs(3600);
    const CONFIRM_MAX_AGE: Duration = Duration::from_secs(86400);

    fn codec() -> TokenCodec<StaticMac> {
        TokenCodec::new(
            b"csrf-secret",
            StaticMac::new(b"confirmation-secret"),
            CSRF_MAX_AGE,
            CONFIRM_MAX_AGE,
        )
        .expect("codec construction")
    }

    #[test]
    fn csrf_valid_immediately_after_issuance() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_csrf(now)?;
        assert!(codec.verify_csrf(&token, now));

        Ok(())
    }

    // Valid right up to and including the max age, invalid one second past it.
    #[test]
    fn csrf_age_boundary() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let max_age = CSRF_MAX_AGE.as_secs() as i64;
        let token = codec.issue_csrf(now)?;
        assert!(codec.verify_csrf(&token, now + max_age - 1));
        assert!(codec.verify_csrf(&token, now + max_age));
        assert!(!codec.verify_csrf(&token, now + max_age + 1));

        Ok(())
    }

    #[test]
    fn csrf_rejects_future_timestamp() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_csrf(now + 10)?;
        assert!(!codec.verify_csrf(&token, now));

        Ok(())
    }

    #[test]
    fn csrf_rejects_malformed_tokens() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        assert!(!codec.verify_csrf("", now));
        assert!(!codec.verify_csrf("no-separator", now));
        assert!(!codec.verify_csrf("not-a-number.abcdef", now));
        assert!(!codec.verify_csrf(&format!("{now}.not-hex!"), now));
        assert!(!codec.verify_csrf(&format!("{now}.abc"), now));

        Ok(())
    }

    #[test]
    fn csrf_rejects_tampered_timestamp() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_csrf(now)?;
        let signature = token.split_once('.').unwrap().1;
        let forged = format!("{}.{signature}", now + 1);
        assert!(!codec.verify_csrf(&forged, now));

        Ok(())
    }

    #[tokio::test]
    async fn confirmation_roundtrip() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_confirmation("user@example.com", now).await?;
        codec
            .verify_confirmation(&token, "user@example.com", now + 60)
            .await?;

        Ok(())
    }

    #[tokio::test]
    async fn confirmation_age_boundary() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let max_age = CONFIRM_MAX_AGE.as_secs() as i64;
        let token = codec.issue_confirmation("user@example.com", now).await?;
        assert!(
            codec
                .verify_confirmation(&token, "user@example.com", now + max_age)
                .await
                .is_ok()
        );
        assert!(matches!(
            codec
                .verify_confirmation(&token, "user@example.com", now + max_age + 1)
                .await,
            Err(Error::TokenInvalid)
        ));

        Ok(())
    }

    // A genuine signature for subject A must not verify for subject B.
    #[tokio::test]
    async fn confirmation_rejects_substituted_subject() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_confirmation("alice@example.com", now).await?;
        assert!(matches!(
            codec
                .verify_confirmation(&token, "bob@example.com", now)
                .await,
            Err(Error::TokenInvalid)
        ));

        // Re-using the signature segment under a different encoded subject
        // must fail as well.
        let mut segments: Vec<&str> = token.split('/').collect();
        let bob = Base64UrlUnpadded::encode_string(b"bob@example.com");
        segments[0] = &bob;
        let forged = segments.join("/");
        assert!(matches!(
            codec
                .verify_confirmation(&forged, "bob@example.com", now)
                .await,
            Err(Error::TokenInvalid)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn confirmation_rejects_tampered_signature() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_confirmation("user@example.com", now).await?;
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(
            codec
                .verify_confirmation(&tampered, "user@example.com", now)
                .await,
            Err(Error::TokenInvalid)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn confirmation_rejects_wrong_segment_count() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_confirmation("user@example.com", now).await?;
        let truncated = token.rsplit_once('/').unwrap().0;
        assert!(matches!(
            codec
                .verify_confirmation(truncated, "user@example.com", now)
                .await,
            Err(Error::TokenInvalid)
        ));
        let extended = format!("{token}/extra");
        assert!(matches!(
            codec
                .verify_confirmation(&extended, "user@example.com", now)
                .await,
            Err(Error::TokenInvalid)
        ));

        Ok(())
    }

    // An outage of the MAC service must not be reported as an invalid token.
    #[tokio::test]
    async fn confirmation_outage_is_infrastructure_error() -> anyhow::Result<()> {
        let mac = StaticMac::new(b"confirmation-secret");
        let codec = TokenCodec::new(b"csrf-secret", mac, CSRF_MAX_AGE, CONFIRM_MAX_AGE)?;
        let now = 1_700_000_000;
        let token = codec.issue_confirmation("user@example.com", now).await?;

        codec.mac.set_unavailable(true);
        assert!(matches!(
            codec
                .verify_confirmation(&token, "user@example.com", now)
                .await,
            Err(Error::Infrastructure(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn parse_confirmation_recovers_subject() -> anyhow::Result<()> {
        let codec = codec();
        let now = 1_700_000_000;
        let token = codec.issue_confirmation("user@example.com", now).await?;
        let (subject, issued) = parse_confirmation(&token)?;
        assert_eq!(subject, "user@example.com");
        assert_eq!(issued, now);

        Ok(())
    }
}
