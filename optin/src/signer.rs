// SPDX-License-Identifier: MIT

//! Message signing backends.
//!
//! Two backends exist and they are not interchangeable by accident: the
//! [`LocalSigner`] holds a symmetric secret in process memory and covers the
//! high-volume, low-value CSRF class, while implementations of [`MacService`]
//! front a remote service holding a non-exportable key for the
//! confirmation/unsubscribe class. The remote key is referenced only by
//! identifier and never enters this process.

use openssl::{error::ErrorStack, hash::MessageDigest, memcmp, pkey::PKey, pkey::Private};

/// Errors from the remote MAC service.
///
/// Every variant is an infrastructure failure and is safe to retry. None of
/// them mean "the signature is invalid"; an invalid signature is reported as
/// `Ok(false)` from [`MacService::verify`]. Collapsing an outage into a
/// verification result in either direction would let a transient failure look
/// like a forged token, or worse, a valid one.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MacError {
    #[error("an I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("one or more openssl errors occurred: {0}")]
    SslErrors(#[from] openssl::error::ErrorStack),

    #[error("the TLS session with the MAC service failed: {0}")]
    Ssl(#[from] openssl::ssl::Error),

    #[error("the MAC service did not respond within the request timeout")]
    Timeout,

    #[error("the MAC service sent a malformed response: {0}")]
    Protocol(String),

    #[error("the MAC service reported an error: {0}")]
    Service(String),

    #[error("failed to serialize a request or response to JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A remote message authentication service.
///
/// Both operations are side-effect-free and idempotent: signing the same
/// message twice yields the same MAC under a fixed key version.
pub trait MacService {
    /// Produce a MAC over `message`.
    fn sign(
        &self,
        message: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<u8>, MacError>> + Send;

    /// Check `mac` against `message`.
    ///
    /// Returns `Ok(false)` for a MAC that does not match, including one that
    /// is malformed; errors are reserved for service failures.
    fn verify(
        &self,
        message: &[u8],
        mac: &[u8],
    ) -> impl std::future::Future<Output = Result<bool, MacError>> + Send;
}

impl<T: MacService> MacService for std::sync::Arc<T> {
    fn sign(
        &self,
        message: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<u8>, MacError>> + Send {
        T::sign(self, message)
    }

    fn verify(
        &self,
        message: &[u8],
        mac: &[u8],
    ) -> impl std::future::Future<Output = Result<bool, MacError>> + Send {
        T::verify(self, message, mac)
    }
}

/// The local HMAC-SHA256 backend for CSRF tokens.
///
/// Signing is deterministic: the same message always yields the same
/// signature under a fixed secret.
pub struct LocalSigner {
    key: PKey<Private>,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug output.
        f.debug_struct("LocalSigner").finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Create a signer from the raw secret bytes.
    pub fn new(secret: &[u8]) -> Result<Self, ErrorStack> {
        Ok(Self {
            key: PKey::hmac(secret)?,
        })
    }

    /// HMAC-SHA256 over the message bytes.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ErrorStack> {
        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(message)?;
        signer.sign_to_vec()
    }

    /// Check a signature by byte-exact recomputation.
    ///
    /// The comparison is constant time; a malformed or truncated signature
    /// returns `false` rather than an error.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, ErrorStack> {
        let expected = self.sign(message)?;
        if expected.len() != signature.len() {
            return Ok(false);
        }
        Ok(memcmp::eq(&expected, signature))
    }
}

// Shared test doubles for the remote MAC service.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::atomic::{AtomicBool, Ordering};

    use openssl::{hash::MessageDigest, memcmp, pkey::PKey, pkey::Private};

    use super::{MacError, MacService};

    /// An in-process stand-in for the remote MAC service.
    ///
    /// Uses HMAC-SHA512 like the real service, and can be switched into a
    /// failing state to exercise outage handling.
    pub(crate) struct StaticMac {
        key: PKey<Private>,
        unavailable: AtomicBool,
    }

    impl StaticMac {
        pub(crate) fn new(secret: &[u8]) -> Self {
            Self {
                key: PKey::hmac(secret).expect("HMAC key from secret bytes"),
                unavailable: AtomicBool::new(false),
            }
        }

        pub(crate) fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn mac(&self, message: &[u8]) -> Vec<u8> {
            let mut signer = openssl::sign::Signer::new(MessageDigest::sha512(), &self.key)
                .expect("HMAC signer setup");
            signer.update(message).expect("HMAC update");
            signer.sign_to_vec().expect("HMAC finalize")
        }
    }

    impl MacService for StaticMac {
        async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, MacError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(MacError::Service("service is unavailable".to_string()));
            }
            Ok(self.mac(message))
        }

        async fn verify(&self, message: &[u8], mac: &[u8]) -> Result<bool, MacError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(MacError::Service("service is unavailable".to_string()));
            }
            let expected = self.mac(message);
            if expected.len() != mac.len() {
                return Ok(false);
            }
            Ok(memcmp::eq(&expected, mac))
        }
    }
}
