// SPDX-License-Identifier: MIT

//! The submission and subscription workflows.
//!
//! This module is the ordering authority: every request walks the same
//! sequence of cheap checks first (site lookup, token verification, field
//! validation) and only then touches durable state or external services.
//! The publish action runs if and only if [`SubmissionStore::try_confirm`]
//! reports that this call performed the pending → confirmed transition, which
//! is what makes publication exactly-once under concurrent or replayed
//! confirmation links.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::{
    error::{DeliveryError, Error, PublishError},
    payload::SubmissionPayload,
    signer::MacService,
    sites::{Site, SiteRegistry},
    store::{ConfirmOutcome, Submission, SubmissionStore, SubmitterContact},
    subscribe::{ContactList, SubscriptionGateway, TopicStatus},
    token::TokenCodec,
    validate::{normalize_email, require_field, require_url, validate_email},
};

/// Publishes a confirmed submission to the site's downstream repository.
///
/// The returned string is an opaque reference to the published artifact, such
/// as a pull request URL. Implementations need not be idempotent; the
/// workflow guarantees at most one call per submission.
pub trait Publisher {
    fn publish(
        &self,
        site: &Site,
        submission: &Submission,
    ) -> impl std::future::Future<Output = Result<String, PublishError>> + Send;
}

impl<T: Publisher> Publisher for Arc<T> {
    fn publish(
        &self,
        site: &Site,
        submission: &Submission,
    ) -> impl std::future::Future<Output = Result<String, PublishError>> + Send {
        T::publish(self, site, submission)
    }
}

/// Sends a confirmation link to a recipient.
pub trait Delivery {
    fn send_confirmation(
        &self,
        site: &Site,
        recipient: &str,
        url: &str,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send;
}

impl<T: Delivery> Delivery for Arc<T> {
    fn send_confirmation(
        &self,
        site: &Site,
        recipient: &str,
        url: &str,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send {
        T::send_confirmation(self, site, recipient, url)
    }
}

/// What the submitter is told after a successful submission.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub submission_id: String,
    /// False if the confirmation email could not be handed off. The token
    /// stays valid until its natural expiry so the link can be resent.
    pub confirmation_sent: bool,
}

/// The user-facing outcome of a confirmation attempt.
///
/// All four cases are successful requests; errors (unknown site, invalid
/// token, infrastructure failures) surface as [`Error`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum ConfirmReport {
    /// This request confirmed the submission and published it.
    Published { reference: String },
    /// The submission was already confirmed; nothing was re-published.
    AlreadyConfirmed,
    /// The confirmation window lapsed before the link was followed.
    Expired,
    /// The submission is confirmed but the publish action failed. Operators
    /// must finish publication by hand; following the link again will not
    /// retry it.
    PublishFailed { detail: String },
}

/// Drives submissions and subscriptions end to end.
#[derive(Debug)]
pub struct ConfirmationWorkflow<M, C, P, D> {
    codec: Arc<TokenCodec<M>>,
    store: SubmissionStore,
    sites: SiteRegistry,
    gateway: SubscriptionGateway<M, C>,
    publisher: P,
    delivery: D,
    base_url: String,
    confirm_window: Duration,
}

impl<M, C, P, D> ConfirmationWorkflow<M, C, P, D>
where
    M: MacService,
    C: ContactList,
    P: Publisher,
    D: Delivery,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        codec: Arc<TokenCodec<M>>,
        store: SubmissionStore,
        sites: SiteRegistry,
        gateway: SubscriptionGateway<M, C>,
        publisher: P,
        delivery: D,
        base_url: impl Into<String>,
        confirm_window: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            codec,
            store,
            sites,
            gateway,
            publisher,
            delivery,
            base_url,
            confirm_window,
        }
    }

    /// A CSRF token to embed in a form rendered at `now`.
    pub fn csrf_token(&self, now: i64) -> Result<String, Error> {
        self.codec.issue_csrf(now)
    }

    fn site(&self, slug: &str) -> Result<&Site, Error> {
        self.sites.get(slug).ok_or(Error::NotFound)
    }

    /// Accept a content submission and send its confirmation link.
    ///
    /// The checks run cheapest-first and nothing durable happens until all of
    /// them pass: site lookup, then the CSRF token, then payload and
    /// submitter validation, and only then the insert. A delivery failure
    /// after the insert is reported in the receipt rather than as an error;
    /// the pending record and its token remain usable.
    #[instrument(skip(self, payload, submitter, csrf_token))]
    pub async fn submit(
        &self,
        site_slug: &str,
        payload: &SubmissionPayload,
        submitter: &SubmitterContact,
        csrf_token: &str,
        now: i64,
    ) -> Result<SubmissionReceipt, Error> {
        let site = self.site(site_slug)?;
        if !self.codec.verify_csrf(csrf_token, now) {
            tracing::debug!(site_slug, "Rejected submission with a stale or invalid CSRF token");
            return Err(Error::TokenInvalid);
        }
        payload.validate()?;
        require_field("name", &submitter.name)?;
        let email = normalize_email(&submitter.email);
        validate_email(&email)?;
        if let Some(link) = &submitter.link {
            require_url("link", link)?;
        }

        let submitter = SubmitterContact {
            name: submitter.name.clone(),
            link: submitter.link.clone(),
            email,
        };
        let submission_id = self
            .store
            .create(site_slug, payload, &submitter, now)
            .await?;
        let token = self.codec.issue_confirmation(&submission_id, now).await?;
        let url = format!(
            "{}/{}/confirm/{}/{}",
            self.base_url, site_slug, submission_id, token
        );

        let confirmation_sent = match self
            .delivery
            .send_confirmation(site, &submitter.email, &url)
            .await
        {
            Ok(()) => {
                self.store.mark_confirmation_sent(&submission_id).await?;
                true
            }
            Err(error) => {
                tracing::warn!(%error, submission_id, "Confirmation email could not be sent");
                false
            }
        };

        Ok(SubmissionReceipt {
            submission_id,
            confirmation_sent,
        })
    }

    /// Handle a followed confirmation link.
    ///
    /// The token is verified before the store is consulted, so forged or
    /// expired links cost one MAC check and nothing else. A valid token whose
    /// submission belongs to a different site is treated as not found; the
    /// response never reveals that the identifier exists elsewhere.
    #[instrument(skip(self, token))]
    pub async fn confirm(
        &self,
        site_slug: &str,
        submission_id: &str,
        token: &str,
        now: i64,
    ) -> Result<ConfirmReport, Error> {
        let site = self.site(site_slug)?;
        self.codec
            .verify_confirmation(token, submission_id, now)
            .await?;

        let submission = self
            .store
            .get(submission_id)
            .await?
            .ok_or(Error::NotFound)?;
        if submission.site_slug != site_slug {
            tracing::warn!(
                submission_id,
                "Valid confirmation token presented under the wrong site"
            );
            return Err(Error::NotFound);
        }

        match self
            .store
            .try_confirm(submission_id, now, self.confirm_window)
            .await?
        {
            ConfirmOutcome::Confirmed => {
                let submission = self
                    .store
                    .get(submission_id)
                    .await?
                    .ok_or(Error::NotFound)?;
                match self.publisher.publish(site, &submission).await {
                    Ok(reference) => {
                        self.store
                            .record_publish_ref(submission_id, &reference)
                            .await?;
                        tracing::info!(submission_id, reference, "Published confirmed submission");
                        Ok(ConfirmReport::Published { reference })
                    }
                    Err(error) => {
                        tracing::error!(
                            %error,
                            submission_id,
                            "Publish action failed for a confirmed submission"
                        );
                        Ok(ConfirmReport::PublishFailed {
                            detail: error.reason,
                        })
                    }
                }
            }
            ConfirmOutcome::AlreadyConfirmed => Ok(ConfirmReport::AlreadyConfirmed),
            ConfirmOutcome::Expired => Ok(ConfirmReport::Expired),
            ConfirmOutcome::NotFound => Err(Error::NotFound),
        }
    }

    /// Start a newsletter signup and send its confirmation link.
    ///
    /// There is no pending record; if delivery fails the signup simply never
    /// happened, so unlike submissions the failure is an error here.
    #[instrument(skip(self, email))]
    pub async fn request_subscription(&self, site_slug: &str, email: &str, now: i64) -> Result<(), Error> {
        let site = self.site(site_slug)?;
        let request = self.gateway.request_subscription(site, email, now).await?;
        let url = format!(
            "{}/{}/subscribe/confirm/{}",
            self.base_url, site_slug, request.token
        );
        self.delivery
            .send_confirmation(site, &request.email, &url)
            .await
            .map_err(|error| {
                Error::Infrastructure(
                    anyhow::Error::new(error).context("subscription email could not be sent"),
                )
            })
    }

    /// Complete a signup from a followed link; returns the subscribed address.
    #[instrument(skip(self, token))]
    pub async fn confirm_subscription(
        &self,
        site_slug: &str,
        token: &str,
        now: i64,
    ) -> Result<String, Error> {
        let site = self.site(site_slug)?;
        self.gateway.confirm_subscription(site, token, now).await
    }

    /// Start an unsubscribe and send its confirmation link.
    #[instrument(skip(self, email))]
    pub async fn request_unsubscribe(&self, site_slug: &str, email: &str, now: i64) -> Result<(), Error> {
        let site = self.site(site_slug)?;
        let request = self.gateway.request_unsubscribe(site, email, now).await?;
        let url = format!(
            "{}/{}/unsubscribe/confirm/{}",
            self.base_url, site_slug, request.token
        );
        self.delivery
            .send_confirmation(site, &request.email, &url)
            .await
            .map_err(|error| {
                Error::Infrastructure(
                    anyhow::Error::new(error).context("unsubscribe email could not be sent"),
                )
            })
    }

    /// Complete an unsubscribe from a followed link.
    #[instrument(skip(self, token))]
    pub async fn confirm_unsubscribe(
        &self,
        site_slug: &str,
        token: &str,
        now: i64,
    ) -> Result<String, Error> {
        let site = self.site(site_slug)?;
        self.gateway.confirm_unsubscribe(site, token, now).await
    }

    /// The subscriber's standing for a site's newsletter topic.
    pub async fn subscription_status(
        &self,
        site_slug: &str,
        email: &str,
    ) -> Result<TopicStatus, Error> {
        let site = self.site(site_slug)?;
        self.gateway.status(site, email).await
    }
}
