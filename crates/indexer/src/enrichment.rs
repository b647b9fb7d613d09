//! Address to display-profile resolution with an injected cache.

use anyhow::{Context, Result};
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trustgraph_core::{AccountId, Profile};

/// Unbounded concurrent address -> profile cache.
///
/// Owned by the caller and handed to [`ProfileDirectory`], so its lifetime
/// and sharing are explicit.
#[derive(Debug, Default)]
pub struct ProfileCache {
    entries: DashMap<AccountId, Profile>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &AccountId) -> Option<Profile> {
        self.entries.get(address).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, address: AccountId, profile: Profile) {
        self.entries.insert(address, profile);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    data: Vec<Profile>,
}

/// Client for the Circles user directory.
#[derive(Debug, Clone)]
pub struct CirclesClient {
    client: Client,
    base_url: String,
}

impl CirclesClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trustgraph-indexer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build enrichment HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Look up one address; `Ok(None)` when the directory does not know it.
    pub async fn lookup(&self, address: &AccountId) -> Result<Option<Profile>> {
        let url = format!("{}/api/users/", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("address[]", address.as_str())])
            .send()
            .await
            .context("Failed to reach profile directory")?
            .error_for_status()
            .context("Profile directory returned an error")?;

        let body: UsersResponse = response
            .json()
            .await
            .context("Invalid profile directory response")?;

        Ok(body.data.into_iter().next())
    }
}

/// Resolves addresses to profiles, falling back to an address-only profile.
#[derive(Debug, Clone)]
pub struct ProfileDirectory {
    cache: Arc<ProfileCache>,
    client: Option<CirclesClient>,
}

impl ProfileDirectory {
    /// A directory backed by `client`, or fallback-only when `client` is `None`.
    pub fn new(cache: Arc<ProfileCache>, client: Option<CirclesClient>) -> Self {
        Self { cache, client }
    }

    /// A directory that never looks anything up.
    pub fn disabled() -> Self {
        Self::new(Arc::new(ProfileCache::new()), None)
    }

    /// Profile for `address`. Never fails.
    ///
    /// Hits and answered lookups (found or not) are cached; a fallback caused
    /// by a failed lookup is not, so the next call retries.
    pub async fn resolve(&self, address: &AccountId) -> Profile {
        if let Some(profile) = self.cache.get(address) {
            return profile;
        }

        let Some(client) = &self.client else {
            return Profile::fallback(address);
        };

        match client.lookup(address).await {
            Ok(found) => {
                let profile = found.unwrap_or_else(|| Profile::fallback(address));
                debug!(address = %address, username = ?profile.username, "Resolved profile");
                self.cache.insert(address.clone(), profile.clone());
                profile
            }
            Err(e) => {
                warn!(address = %address, "Profile lookup failed: {:#}", e);
                Profile::fallback(address)
            }
        }
    }

    /// Resolve every address of `path`, in order.
    pub async fn resolve_all(&self, path: &[AccountId]) -> Vec<Profile> {
        let mut profiles = Vec::with_capacity(path.len());
        for address in path {
            profiles.push(self.resolve(address).await);
        }
        profiles
    }
}
