// SPDX-License-Identifier: MIT

//! Error types surfaced by the submission and subscription flows.

/// Errors returned to request handlers.
///
/// The variants are deliberately coarse on the user-facing side: a token that
/// fails verification for any reason (bad signature, wrong subject, expired,
/// or unparseable) is reported as [`Error::TokenInvalid`] without saying which
/// sub-check failed. The detail is recorded with `tracing` instead, so the
/// verification logic can't be probed as an oracle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A field in the request failed validation.
    ///
    /// This is surfaced with a field-level message and is never retried; the
    /// request itself is wrong.
    #[error("{field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// The token failed verification.
    ///
    /// Surface this as a generic "link expired or invalid" message. Retrying
    /// with the same token will never succeed.
    #[error("the link is expired or invalid")]
    TokenInvalid,

    /// The referenced site or submission does not exist.
    #[error("not found")]
    NotFound,

    /// The durable store, the remote MAC service, or another external
    /// collaborator failed.
    ///
    /// This is never a statement about the request itself; the caller may
    /// retry later. Confirmation attempts are idempotent by design, so a
    /// retried `confirm` after one of these errors is safe.
    #[error("a backing service failed; try again later")]
    Infrastructure(#[source] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Infrastructure(anyhow::Error::new(error).context("database operation failed"))
    }
}

impl From<crate::signer::MacError> for Error {
    fn from(error: crate::signer::MacError) -> Self {
        Error::Infrastructure(anyhow::Error::new(error).context("MAC service call failed"))
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(error: openssl::error::ErrorStack) -> Self {
        Error::Infrastructure(anyhow::Error::new(error).context("openssl operation failed"))
    }
}

/// The external contact-list service failed.
///
/// Calls to the contact list are idempotent, so these are safe to retry.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ContactError {
    #[error("an I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    /// The service rejected or failed the request.
    #[error("contact list service error: {0}")]
    Service(String),
}

impl From<ContactError> for Error {
    fn from(error: ContactError) -> Self {
        Error::Infrastructure(anyhow::Error::new(error).context("contact list call failed"))
    }
}

/// The downstream publish action failed after a submission was confirmed.
///
/// The confirmation transition has already happened by the time this occurs;
/// it must be surfaced to the user and to operators, but the submission is
/// not reopened for another confirm attempt.
#[derive(Debug, thiserror::Error)]
#[error("publish action failed: {reason}")]
pub struct PublishError {
    pub reason: String,
}

impl PublishError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outbound delivery of a confirmation link failed.
///
/// Token issuance is not rolled back; the link remains valid until its
/// natural expiry so operators can resend it.
#[derive(Debug, thiserror::Error)]
#[error("delivery failed: {reason}")]
pub struct DeliveryError {
    pub reason: String,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
