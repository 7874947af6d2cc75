//! TOML settings for the cache
//!
//! Every field is optional; anything left out keeps the preset's value.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use idcache::{CacheConfig, EntryType, EvictionPolicy};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub max_size: Option<u64>,
    pub max_entries: Option<u64>,
    pub default_ttl_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub enable_metrics: Option<bool>,
    pub enable_tags: Option<bool>,
    pub async_eviction: Option<bool>,
    pub warmup_on_start: Option<bool>,
    pub preload_identities: Option<bool>,
    pub observer_queue_capacity: Option<usize>,
    /// Per entry type TTL overrides, keyed by type name
    #[serde(default)]
    pub type_ttl_secs: BTreeMap<String, u64>,
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == Some(0) {
            bail!("max_size must be > 0");
        }
        if self.max_entries == Some(0) {
            bail!("max_entries must be > 0");
        }
        if self.cleanup_interval_secs == Some(0) {
            bail!("cleanup_interval_secs must be > 0");
        }
        if let Some((name, _)) = self.type_ttl_secs.iter().find(|(_, secs)| **secs == 0) {
            bail!("type_ttl_secs.{} must be > 0", name);
        }
        Ok(())
    }

    /// Layer these settings over `config`
    pub fn apply(&self, mut config: CacheConfig) -> CacheConfig {
        if let Some(bytes) = self.max_size {
            config = config.with_max_size(bytes);
        }
        if let Some(entries) = self.max_entries {
            config = config.with_max_entries(entries);
        }
        if let Some(secs) = self.default_ttl_secs {
            config = config.with_default_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = self.cleanup_interval_secs {
            config = config.with_cleanup_interval(Duration::from_secs(secs));
        }
        if let Some(policy) = self.eviction_policy {
            config = config.with_eviction_policy(policy);
        }
        if let Some(enabled) = self.enable_metrics {
            config = config.with_metrics(enabled);
        }
        if let Some(enabled) = self.enable_tags {
            config = config.with_tags(enabled);
        }
        if let Some(enabled) = self.async_eviction {
            config = config.with_async_eviction(enabled);
        }
        if let Some(enabled) = self.warmup_on_start {
            config = config.with_warmup_on_start(enabled);
        }
        if let Some(enabled) = self.preload_identities {
            config = config.with_preload_identities(enabled);
        }
        if let Some(capacity) = self.observer_queue_capacity {
            config = config.with_observer_queue_capacity(capacity);
        }
        for (name, secs) in &self.type_ttl_secs {
            config = config.with_type_ttl(EntryType::from(name.as_str()), Duration::from_secs(*secs));
        }
        config
    }
}
