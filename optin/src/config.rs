// SPDX-License-Identifier: MIT

//! Service configuration.
//!
//! Secrets are never placed in the configuration file itself. The CSRF secret
//! is read from a file (ideally provided via systemd credentials), and the
//! confirmation MAC key is referenced only by identifier; the key itself
//! lives in the remote MAC service and is never loaded into this process.

use std::{env, path::PathBuf, time::Duration};

use anyhow::Context;
use openssl::{
    error::ErrorStack,
    ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode, SslVersion},
};
use serde::{Deserialize, Serialize};

/// TLS client material used to authenticate to the MAC service.
///
/// It is highly recommended that you use systemd credentials to ensure the
/// private key is only accessible to the service using it. If the paths
/// provided are relative, they are assumed to be relative to the
/// `$CREDENTIALS_DIRECTORY` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// The path to the PEM-encoded private key matching `certificate`.
    pub private_key: PathBuf,
    /// The path to the certificate presented to the MAC service.
    pub certificate: PathBuf,
    /// The path to the certificate authority used to verify the MAC service.
    pub ca_certificate: PathBuf,
}

impl Credentials {
    pub(crate) fn ssl_connector(&self) -> Result<SslConnector, ErrorStack> {
        let mut connector = SslConnector::builder(SslMethod::tls())?;
        connector.set_verify(SslVerifyMode::PEER);
        connector.set_min_proto_version(Some(SslVersion::TLS1_3))?;
        connector.set_max_proto_version(Some(SslVersion::TLS1_3))?;
        connector.set_ca_file(&self.ca_certificate)?;
        connector.set_private_key_file(&self.private_key, SslFiletype::PEM)?;
        connector.set_certificate_file(&self.certificate, SslFiletype::PEM)?;
        connector.check_private_key()?;

        Ok(connector.build())
    }

    /// Resolve relative credential paths against `credentials_dir`.
    ///
    /// Systemd drops credentials loaded with `LoadCredential` into the
    /// directory named by `$CREDENTIALS_DIRECTORY`, so the configuration may
    /// refer to them by bare file name. Absolute paths are left untouched. A
    /// resolved file that does not exist is an error; a bad credential path
    /// should fail at startup, not on the first MAC call.
    pub fn with_credentials_dir(
        &mut self,
        credentials_dir: &std::path::Path,
    ) -> anyhow::Result<()> {
        for (name, path) in [
            ("private key", &mut self.private_key),
            ("certificate", &mut self.certificate),
            ("CA certificate", &mut self.ca_certificate),
        ] {
            if path.is_relative() {
                *path = credentials_dir.join(&*path);
                anyhow::ensure!(
                    path.exists(),
                    "no {name} found at '{}' in the credentials directory",
                    path.display()
                );
            }
        }

        Ok(())
    }
}

/// Connection settings for the remote MAC service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacConfig {
    /// The MAC service hostname; this is used to validate its TLS certificate.
    pub hostname: String,
    /// The port the MAC service listens on.
    pub port: u16,
    /// The identifier of the signing key, as known to the MAC service.
    ///
    /// The key material itself is held exclusively by the service.
    pub key_id: String,
    /// The amount of time to wait before giving up on a sign or verify call.
    ///
    /// After the timeout the call is reported as a retryable infrastructure
    /// failure, never as an invalid token.
    pub request_timeout: Duration,
    /// The credentials to present when connecting to the MAC service.
    pub credentials: Credentials,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            hostname: "mac.example.com".to_string(),
            port: 44345,
            key_id: "confirmation-2024".to_string(),
            request_timeout: Duration::from_secs(15),
            credentials: Credentials {
                private_key: PathBuf::from("optin.client.private_key.pem"),
                certificate: PathBuf::from("optin.client.certificate.pem"),
                ca_certificate: PathBuf::from("optin.ca_certificate.pem"),
            },
        }
    }
}

/// Configuration for the submission and subscription service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The location where the service stores its state.
    ///
    /// This holds the SQLite submissions database; to back up the service,
    /// back up this directory. Defaults to "/var/lib/optin".
    #[serde(default = "default_state_directory")]
    pub state_directory: PathBuf,

    /// The external base URL used when building confirmation links,
    /// e.g. "https://add.example.events".
    pub base_url: String,

    /// The path to the site registry file (TOML, a list of `[[sites]]`).
    pub sites_path: PathBuf,

    /// The path to the file holding the CSRF signing secret.
    ///
    /// Only the first line of the file is used. Provide it with systemd's
    /// `ImportCredential` or `LoadCredentialEncrypted` option.
    pub csrf_secret_path: PathBuf,

    /// How long a CSRF token remains valid after issuance. Default one hour.
    pub csrf_max_age: Duration,

    /// How long a confirmation or unsubscribe link remains valid.
    ///
    /// Because pending subscriptions have no durable record, this window is
    /// the only bound on how long an issued link can be replayed; it should be
    /// long enough for a human to get to their inbox and no longer. Default
    /// 24 hours.
    pub confirm_max_age: Duration,

    /// The remote MAC service settings.
    pub mac: MacConfig,
}

impl Config {
    /// Load the service configuration.
    ///
    /// When no explicit `path` is given, `optin.toml` under
    /// `$CONFIGURATION_DIRECTORY` (set by systemd) is tried next, and if no
    /// file exists there either the built-in defaults are used. A file that
    /// exists but does not parse is always an error; the complete example
    /// configuration is printed alongside it to make the fix obvious.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.or_else(|| {
            env::var("CONFIGURATION_DIRECTORY")
                .map(PathBuf::from)
                .ok()
                .map(|directory| directory.join("optin.toml"))
                .filter(|candidate| candidate.is_file())
        });
        let Some(path) = path else {
            tracing::warn!("No configuration file found; using defaults");
            return Ok(Self::default());
        };

        tracing::info!(path = %path.display(), "Loading configuration");
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read the configuration at {}", path.display()))?;
        toml::from_str(&contents)
            .inspect_err(|error| {
                eprintln!(
                    "Failed to parse the configuration at {}:\n{error}",
                    path.display()
                );
                eprintln!("Example config file:\n\n{}", Self::default());
            })
            .context("configuration file is invalid")
    }

    /// The path to the submissions database.
    pub fn database(&self) -> PathBuf {
        self.state_directory.join("optin.sqlite")
    }

    /// Read the CSRF secret.
    ///
    /// The secret must be entirely on the first line of the file; the default
    /// output of `systemd-ask-password` is acceptable.
    pub fn csrf_secret(&self) -> anyhow::Result<Vec<u8>> {
        let secret = std::fs::read_to_string(&self.csrf_secret_path)
            .with_context(|| {
                format!(
                    "failed to read the CSRF secret from {}",
                    self.csrf_secret_path.display()
                )
            })?
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "CSRF secret file {} does not contain a secret on the first line",
                    self.csrf_secret_path.display()
                )
            })?;
        Ok(secret.into_bytes())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_directory: default_state_directory(),
            base_url: "https://add.example.events".to_string(),
            sites_path: PathBuf::from("sites.toml"),
            csrf_secret_path: PathBuf::from("optin.csrf_secret"),
            csrf_max_age: Duration::from_secs(60 * 60),
            confirm_max_age: Duration::from_secs(60 * 60 * 24),
            mac: MacConfig::default(),
        }
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            toml::ser::to_string_pretty(&self).unwrap_or_default()
        )
    }
}

fn default_state_directory() -> PathBuf {
    PathBuf::from("/var/lib/optin/")
}
