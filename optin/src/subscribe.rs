// SPDX-License-Identifier: MIT

//! Newsletter subscription and unsubscription.
//!
//! The gateway keeps no durable state of its own. The external contact-list
//! service is authoritative for who is subscribed, and a pending signup
//! exists only as an outstanding, unexpired confirmation token; nothing is
//! written anywhere until the subscriber follows the link. The flip side is
//! that token expiry is the only defense against an old link being replayed,
//! which is why the confirmation window is a deliberate policy choice rather
//! than a convenience.

use std::sync::Arc;

use crate::{
    error::{ContactError, Error},
    signer::MacService,
    sites::Site,
    token::{self, TokenCodec},
    validate::{normalize_email, validate_email},
};

/// A subscriber's standing for one topic, as reported by the contact-list
/// service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum TopicStatus {
    OptIn,
    OptOut,
    /// The address is not on the contact list at all.
    NotRegistered,
}

/// The external contact-list service.
///
/// All three operations are idempotent and eventually consistent; opting in
/// an address that is already opted in is a success, not an error.
pub trait ContactList {
    fn opt_in(
        &self,
        contact_list: &str,
        topic: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<(), ContactError>> + Send;

    fn opt_out(
        &self,
        contact_list: &str,
        topic: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<(), ContactError>> + Send;

    fn get_status(
        &self,
        contact_list: &str,
        topic: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<TopicStatus, ContactError>> + Send;
}

impl<T: ContactList> ContactList for std::sync::Arc<T> {
    fn opt_in(
        &self,
        contact_list: &str,
        topic: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<(), ContactError>> + Send {
        T::opt_in(self, contact_list, topic, email)
    }

    fn opt_out(
        &self,
        contact_list: &str,
        topic: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<(), ContactError>> + Send {
        T::opt_out(self, contact_list, topic, email)
    }

    fn get_status(
        &self,
        contact_list: &str,
        topic: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<TopicStatus, ContactError>> + Send {
        T::get_status(self, contact_list, topic, email)
    }
}

/// A freshly issued subscription (or unsubscription) request.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    /// The normalized address the token was issued for.
    pub email: String,
    /// The confirmation token to embed in the emailed link.
    pub token: String,
}

/// State adapter between confirmation tokens and the contact-list service.
#[derive(Debug)]
pub struct SubscriptionGateway<M, C> {
    codec: Arc<TokenCodec<M>>,
    contacts: C,
}

impl<M: MacService, C: ContactList> SubscriptionGateway<M, C> {
    pub fn new(codec: Arc<TokenCodec<M>>, contacts: C) -> Self {
        Self { codec, contacts }
    }

    /// Issue a subscription confirmation token for `email`.
    ///
    /// Nothing is written to the contact list here; the signup only takes
    /// effect when the token comes back through
    /// [`SubscriptionGateway::confirm_subscription`].
    pub async fn request_subscription(
        &self,
        _site: &Site,
        email: &str,
        now: i64,
    ) -> Result<SubscriptionRequest, Error> {
        let email = normalize_email(email);
        validate_email(&email)?;
        let token = self.codec.issue_confirmation(&email, now).await?;
        Ok(SubscriptionRequest { email, token })
    }

    /// Verify a subscription token and opt the address in.
    ///
    /// There is no stored pending record to compare against; the token is
    /// the record of intent, so the expected subject is the one the token
    /// itself carries. Verification happens strictly before the contact-list
    /// call; a forged or expired token never reaches the external service.
    pub async fn confirm_subscription(
        &self,
        site: &Site,
        token: &str,
        now: i64,
    ) -> Result<String, Error> {
        let (email, _issued) = token::parse_confirmation(token)?;
        self.codec.verify_confirmation(token, &email, now).await?;
        self.contacts
            .opt_in(&site.contact_list, &site.topic, &email)
            .await?;
        tracing::info!(site = site.slug, "Subscription confirmed");
        Ok(email)
    }

    /// Issue an unsubscribe token for `email`.
    pub async fn request_unsubscribe(
        &self,
        _site: &Site,
        email: &str,
        now: i64,
    ) -> Result<SubscriptionRequest, Error> {
        let email = normalize_email(email);
        validate_email(&email)?;
        let token = self.codec.issue_confirmation(&email, now).await?;
        Ok(SubscriptionRequest { email, token })
    }

    /// Verify an unsubscribe token and opt the address out.
    pub async fn confirm_unsubscribe(
        &self,
        site: &Site,
        token: &str,
        now: i64,
    ) -> Result<String, Error> {
        let (email, _issued) = token::parse_confirmation(token)?;
        self.codec.verify_confirmation(token, &email, now).await?;
        self.contacts
            .opt_out(&site.contact_list, &site.topic, &email)
            .await?;
        tracing::info!(site = site.slug, "Unsubscribe confirmed");
        Ok(email)
    }

    /// The subscriber's current standing for the site's topic.
    pub async fn status(&self, site: &Site, email: &str) -> Result<TopicStatus, Error> {
        let email = normalize_email(email);
        Ok(self
            .contacts
            .get_status(&site.contact_list, &site.topic, &email)
            .await?)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{ContactList, TopicStatus};
    use crate::error::ContactError;

    /// In-memory contact list that records every call it receives.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingContacts {
        pub(crate) state: Mutex<HashMap<(String, String, String), TopicStatus>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl RecordingContacts {
        fn key(contact_list: &str, topic: &str, email: &str) -> (String, String, String) {
            (
                contact_list.to_string(),
                topic.to_string(),
                email.to_string(),
            )
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ContactList for &RecordingContacts {
        async fn opt_in(
            &self,
            contact_list: &str,
            topic: &str,
            email: &str,
        ) -> Result<(), ContactError> {
            self.calls.lock().unwrap().push(format!("opt_in {email}"));
            self.state
                .lock()
                .unwrap()
                .insert(RecordingContacts::key(contact_list, topic, email), TopicStatus::OptIn);
            Ok(())
        }

        async fn opt_out(
            &self,
            contact_list: &str,
            topic: &str,
            email: &str,
        ) -> Result<(), ContactError> {
            self.calls.lock().unwrap().push(format!("opt_out {email}"));
            self.state
                .lock()
                .unwrap()
                .insert(RecordingContacts::key(contact_list, topic, email), TopicStatus::OptOut);
            Ok(())
        }

        async fn get_status(
            &self,
            contact_list: &str,
            topic: &str,
            email: &str,
        ) -> Result<TopicStatus, ContactError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .get(&RecordingContacts::key(contact_list, topic, email))
                .copied()
                .unwrap_or(TopicStatus::NotRegistered))
        }
    }
}
