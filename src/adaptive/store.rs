use super::profile::{Difficulty, WebsiteProfile};
use crate::executor::Method;
use crate::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

type Slot = Arc<AsyncMutex<WebsiteProfile>>;

/// Summary of one learned profile
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub domain: String,
    pub difficulty: Difficulty,
    pub total_attempts: u64,
    pub optimal_strategy: Option<Method>,
    pub success_rates: BTreeMap<Method, f64>,
    pub recent_failures: usize,
}

impl From<&WebsiteProfile> for ProfileSummary {
    fn from(profile: &WebsiteProfile) -> Self {
        Self {
            domain: profile.domain.clone(),
            difficulty: profile.characteristics.difficulty,
            total_attempts: profile.total_attempts,
            optimal_strategy: profile.optimal_strategy,
            success_rates: profile
                .success_rates
                .iter()
                .map(|(m, s)| (*m, s.rate))
                .collect(),
            recent_failures: profile.recent_failures.len(),
        }
    }
}

/// Aggregate view over stored profiles
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStats {
    pub domains: usize,
    pub total_attempts: u64,
    pub profiles: Vec<ProfileSummary>,
}

/// Process-wide store of learned profiles
///
/// Each domain has its own async lock, so read-modify-write updates from
/// concurrent sessions on one domain serialize while other domains proceed.
/// The outer map lock is held only to look up or insert a slot.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: Mutex<HashMap<String, Slot>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, domain: &str) -> Slot {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(WebsiteProfile::new(domain))))
            .clone()
    }

    fn existing(&self, domain: &str) -> Option<Slot> {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles.get(domain).cloned()
    }

    fn all_slots(&self) -> Vec<Slot> {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles.values().cloned().collect()
    }

    /// Returns a copy of the domain's profile, creating it on first use
    pub async fn get_or_create(&self, domain: &str) -> WebsiteProfile {
        self.slot(domain).lock().await.clone()
    }

    /// Returns a copy of the domain's profile without creating one
    pub async fn get(&self, domain: &str) -> Option<WebsiteProfile> {
        match self.existing(domain) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    /// Runs `f` on the domain's profile under its lock
    pub async fn update<F, R>(&self, domain: &str, f: F) -> R
    where
        F: FnOnce(&mut WebsiteProfile) -> R,
    {
        let slot = self.slot(domain);
        let mut profile = slot.lock().await;
        f(&mut *profile)
    }

    /// Stats for one domain, or for every domain when `domain` is None
    pub async fn stats(&self, domain: Option<&str>) -> ProfileStats {
        let slots = match domain {
            Some(d) => self.existing(d).into_iter().collect(),
            None => self.all_slots(),
        };

        let mut profiles = Vec::with_capacity(slots.len());
        for slot in slots {
            profiles.push(ProfileSummary::from(&*slot.lock().await));
        }
        profiles.sort_by(|a, b| a.domain.cmp(&b.domain));

        ProfileStats {
            domains: profiles.len(),
            total_attempts: profiles.iter().map(|p| p.total_attempts).sum(),
            profiles,
        }
    }

    /// Learned success rates of every domain
    pub async fn success_rates(&self) -> BTreeMap<String, BTreeMap<Method, f64>> {
        self.stats(None)
            .await
            .profiles
            .into_iter()
            .map(|p| (p.domain, p.success_rates))
            .collect()
    }

    /// Forgets everything learned about a domain; returns false if there was nothing
    pub fn clear_profile(&self, domain: &str) -> bool {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        let removed = profiles.remove(domain).is_some();
        if removed {
            tracing::info!("Cleared learned profile for {}", domain);
        }
        removed
    }

    /// Serializes every profile into a JSON document keyed by domain
    pub async fn export_profiles(&self) -> Result<String> {
        let mut exported = BTreeMap::new();
        for slot in self.all_slots() {
            let profile = slot.lock().await.clone();
            exported.insert(profile.domain.clone(), profile);
        }
        Ok(serde_json::to_string_pretty(&exported)?)
    }

    /// Loads profiles from an export, replacing existing ones for the same domains
    ///
    /// Returns the number of imported profiles.
    pub async fn import_profiles(&self, json: &str) -> Result<usize> {
        let imported: BTreeMap<String, WebsiteProfile> = serde_json::from_str(json)?;
        let count = imported.len();
        for (domain, mut profile) in imported {
            profile.domain = domain.clone();
            let slot = self.slot(&domain);
            *slot.lock().await = profile;
        }
        tracing::info!("Imported {} learned profiles", count);
        Ok(count)
    }

    /// Writes the export to a file
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let json = self.export_profiles().await?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Imports a file written by [`ProfileStore::save_to`]; a missing file imports nothing
    pub async fn load_from(&self, path: &Path) -> Result<usize> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => self.import_profiles(&json).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
