// SPDX-License-Identifier: MIT

//! Durable storage for content submissions.
//!
//! The store owns every submission record. Callers never mutate a record
//! directly; the one state transition, pending → confirmed, happens only
//! through [`SubmissionStore::try_confirm`], whose conditional write is what
//! makes downstream publish actions exactly-once under concurrent or retried
//! confirmation requests.

use std::{str::FromStr, time::Duration};

use anyhow::Context;
use sqlx::{
    sqlite::SqliteConnectOptions, Pool, Row, Sqlite, SqlitePool,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::Error,
    payload::{SubmissionKind, SubmissionPayload},
};

static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/");

/// Ensure the database is migrated to the latest version.
#[instrument(skip_all)]
pub async fn migrate(pool: &Pool<Sqlite>) -> anyhow::Result<()> {
    MIGRATIONS
        .run(pool)
        .await
        .context("Migrations could not be applied")?;
    Ok(())
}

/// Get a database pool.
pub async fn pool(db_uri: &str) -> anyhow::Result<Pool<Sqlite>> {
    let opts = SqliteConnectOptions::from_str(db_uri)
        .context("The database URL couldn't be parsed.")?
        .create_if_missing(true)
        .foreign_keys(true)
        .optimize_on_close(true, Some(400));
    SqlitePool::connect_with(opts)
        .await
        .with_context(|| format!("Failed to connect to the database at {db_uri}"))
}

/// Stored submission states.
///
/// This enumeration matches the values in the database's
/// `submission_statuses` table. "Expired" is deliberately absent; it is
/// computed from `created_at` at confirm time, never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Confirmed => "confirmed",
        }
    }
}

impl TryFrom<&str> for SubmissionStatus {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            _ => Err(anyhow::anyhow!("Unknown submission status '{value}'!")),
        }
    }
}

/// Who submitted the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterContact {
    pub name: String,
    pub link: Option<String>,
    pub email: String,
}

/// A stored submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Globally unique opaque identifier; the sole lookup key.
    pub submission_id: String,
    pub site_slug: String,
    pub kind: SubmissionKind,
    pub payload: SubmissionPayload,
    pub submitter: SubmitterContact,
    pub status: SubmissionStatus,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    /// Absent until the submission is confirmed.
    pub confirmed_at: Option<i64>,
    pub confirmation_sent: bool,
    /// The reference returned by the publish action, e.g. a pull request URL.
    pub publish_ref: Option<String>,
}

impl Submission {
    /// Whether the confirmation window has lapsed.
    ///
    /// The boundary mirrors token freshness: a record exactly `window` old
    /// can still be confirmed, one second older cannot.
    pub fn is_expired(&self, now: i64, window: Duration) -> bool {
        now - self.created_at > window.as_secs() as i64
    }
}

/// The result of a confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum ConfirmOutcome {
    /// This call performed the pending → confirmed transition. The caller
    /// must trigger the downstream publish action, exactly once.
    Confirmed,
    /// Another call already performed the transition. Present an idempotent
    /// success view; do not re-trigger the publish action.
    AlreadyConfirmed,
    /// The record outlived the confirmation window; no transition occurred.
    Expired,
    /// No record exists under this identifier.
    NotFound,
}

/// The durable submission store.
#[derive(Debug, Clone)]
pub struct SubmissionStore {
    pool: Pool<Sqlite>,
}

impl SubmissionStore {
    /// Open (and migrate) the store at `db_uri`.
    pub async fn open(db_uri: &str) -> anyhow::Result<Self> {
        let pool = pool(db_uri).await?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an already-opened pool. The caller is responsible for migrations.
    pub fn with_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create a new pending submission and return its identifier.
    ///
    /// Identifiers are generated UUIDs; creation only fails on
    /// infrastructure errors, never on collision.
    #[instrument(skip(self, payload, submitter), fields(kind = %payload.kind()))]
    pub async fn create(
        &self,
        site_slug: &str,
        payload: &SubmissionPayload,
        submitter: &SubmitterContact,
        now: i64,
    ) -> Result<String, Error> {
        let submission_id = Uuid::new_v4().to_string();
        let payload_json = serde_json::to_string(payload).map_err(|error| {
            Error::Infrastructure(
                anyhow::Error::new(error).context("failed to serialize the payload"),
            )
        })?;
        sqlx::query(
            "INSERT INTO submissions \
             (submission_id, site_slug, kind, payload, submitter_name, submitter_link, \
              submitter_email, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&submission_id)
        .bind(site_slug)
        .bind(payload.kind().as_str())
        .bind(&payload_json)
        .bind(&submitter.name)
        .bind(&submitter.link)
        .bind(&submitter.email)
        .bind(now)
        .execute(&self.pool)
        .await?;
        tracing::info!(submission_id, "Created pending submission");

        Ok(submission_id)
    }

    /// Fetch a submission by id.
    #[instrument(skip(self))]
    pub async fn get(&self, submission_id: &str) -> Result<Option<Submission>, Error> {
        let row = sqlx::query("SELECT * FROM submissions WHERE submission_id = ?")
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| from_row(&row)).transpose()
    }

    /// Attempt the pending → confirmed transition.
    ///
    /// The transition is a single conditional write: it applies only if the
    /// stored status is still `pending` and the record is within the
    /// confirmation window. Two callers racing on the same id can both read
    /// `pending`, but only one write takes effect; the loser is told
    /// [`ConfirmOutcome::AlreadyConfirmed`] rather than an error. Retrying
    /// this call is always safe.
    #[instrument(skip(self, window))]
    pub async fn try_confirm(
        &self,
        submission_id: &str,
        now: i64,
        window: Duration,
    ) -> Result<ConfirmOutcome, Error> {
        let cutoff = now - window.as_secs() as i64;
        let result = sqlx::query(
            "UPDATE submissions SET status = 'confirmed', confirmed_at = ? \
             WHERE submission_id = ? AND status = 'pending' AND created_at >= ?",
        )
        .bind(now)
        .bind(submission_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            tracing::info!(submission_id, "Confirmed submission");
            return Ok(ConfirmOutcome::Confirmed);
        }

        // The conditional write didn't apply; read the record back to find
        // out why.
        match self.get(submission_id).await? {
            None => Ok(ConfirmOutcome::NotFound),
            Some(submission) if submission.status == SubmissionStatus::Confirmed => {
                Ok(ConfirmOutcome::AlreadyConfirmed)
            }
            Some(_pending_but_stale) => Ok(ConfirmOutcome::Expired),
        }
    }

    /// Record that the confirmation link was handed off for delivery.
    #[instrument(skip(self))]
    pub async fn mark_confirmation_sent(&self, submission_id: &str) -> Result<(), Error> {
        sqlx::query("UPDATE submissions SET confirmation_sent = 1 WHERE submission_id = ?")
            .bind(submission_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the reference returned by the publish action.
    #[instrument(skip(self))]
    pub async fn record_publish_ref(
        &self,
        submission_id: &str,
        reference: &str,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE submissions SET publish_ref = ? WHERE submission_id = ?")
            .bind(reference)
            .bind(submission_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Submission, Error> {
    let infra = |error: anyhow::Error| Error::Infrastructure(error);

    let kind: String = row.try_get("kind")?;
    let kind = SubmissionKind::try_from(kind.as_str()).map_err(infra)?;
    let status: String = row.try_get("status")?;
    let status = SubmissionStatus::try_from(status.as_str()).map_err(infra)?;
    let payload: String = row.try_get("payload")?;
    let payload: SubmissionPayload = serde_json::from_str(&payload).map_err(|error| {
        Error::Infrastructure(
            anyhow::Error::new(error).context("stored payload is not valid JSON"),
        )
    })?;

    Ok(Submission {
        submission_id: row.try_get("submission_id")?,
        site_slug: row.try_get("site_slug")?,
        kind,
        payload,
        submitter: SubmitterContact {
            name: row.try_get("submitter_name")?,
            link: row.try_get("submitter_link")?,
            email: row.try_get("submitter_email")?,
        },
        status,
        created_at: row.try_get("created_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        confirmation_sent: row.try_get::<i64, _>("confirmation_sent")? != 0,
        publish_ref: row.try_get("publish_ref")?,
    })
}
