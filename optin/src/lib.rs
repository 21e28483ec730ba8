// SPDX-License-Identifier: MIT

/*!
# Optin

Optin is the confirmation backend for a family of community event calendar
sites. Visitors submit content (one-off events, recurring meetup groups, or
iCal feeds) or sign up for a site's newsletter, and nothing takes effect until
they prove control of their email address by following a signed link.

Three concerns make up the crate:

* Signed, time-bounded tokens. CSRF tokens are HMAC'd with a local secret and
  bound to the time the form was rendered. Confirmation and unsubscribe tokens
  gate irreversible actions, so their MACs are produced and verified by a
  remote MAC service over mutually-authenticated TLS; the signing key never
  enters this process.

* An exactly-once submission state machine. A submission is `pending` until
  its link is followed, and the pending to confirmed transition is a single
  conditional database write. However many times a link is clicked, or however
  many handlers race on it, exactly one request wins the transition and
  triggers the downstream publish action (typically a pull request against the
  site's content repository). Everyone else sees an idempotent success.

* A double opt-in subscription gateway. Newsletter signups and unsubscribes
  keep no local state at all; the token is the record of intent, and the
  external contact list service is authoritative for who is subscribed.

The [`workflow`] module ties these together and is the intended entry point;
the lower layers are exposed for the HTTP frontend and for operational
tooling.
*/

pub mod config;
pub mod error;
pub mod mac;
pub mod payload;
pub mod signer;
pub mod sites;
pub mod store;
pub mod subscribe;
pub mod token;
pub mod validate;
pub mod workflow;
