// SPDX-License-Identifier: MIT

//! The site registry.
//!
//! The service is multi-tenant: each site is identified by the slug that
//! prefixes its URLs and carries the metadata the flows need (where
//! confirmed content is published, which contact list and topic its
//! newsletter uses, and the addresses outbound mail is sent from). The
//! registry is loaded once at startup from a TOML file; a slug miss is a
//! `NotFound` at the request boundary and nothing past request validation
//! ever sees an unknown site.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A single tenant site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// The slug used in URLs, e.g. "dctech".
    pub slug: String,
    /// The display name, e.g. "DC Tech Events".
    pub name: String,
    /// The repository confirmed content is published to,
    /// e.g. "https://github.com/example/dctech-events".
    pub repository: String,
    /// The contact list holding this site's newsletter subscribers.
    pub contact_list: String,
    /// The topic within the contact list.
    pub topic: String,
    /// The address confirmation emails are sent from.
    pub from_email: String,
    /// The reply-to for outbound email; falls back to `from_email`.
    #[serde(default)]
    pub reply_to_email: Option<String>,
}

impl Site {
    pub fn reply_to(&self) -> &str {
        self.reply_to_email.as_deref().unwrap_or(&self.from_email)
    }
}

#[derive(Debug, Deserialize)]
struct SitesFile {
    sites: Vec<Site>,
}

/// Lookup from site slug to tenant metadata.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: HashMap<String, Site>,
}

impl SiteRegistry {
    /// Load the registry from a TOML file containing a list of `[[sites]]`.
    ///
    /// Duplicate slugs are a configuration error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read the site registry from {path:?}"))?;
        let file: SitesFile =
            toml::from_str(&contents).context("site registry file is invalid")?;
        Self::from_sites(file.sites)
    }

    pub fn from_sites(sites: Vec<Site>) -> anyhow::Result<Self> {
        let mut registry = HashMap::with_capacity(sites.len());
        for site in sites {
            if let Some(duplicate) = registry.insert(site.slug.clone(), site) {
                return Err(anyhow::anyhow!(
                    "the site registry contains the slug '{}' more than once",
                    duplicate.slug
                ));
            }
        }
        tracing::info!(sites = registry.len(), "Loaded site registry");
        Ok(Self { sites: registry })
    }

    pub fn get(&self, slug: &str) -> Option<&Site> {
        self.sites.get(slug)
    }
}
