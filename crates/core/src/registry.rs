//! Source of truth for the proxy pool. The pool is an immutable snapshot
//! published through `ArcSwap`; a load either replaces it whole or not at all.

use crate::config::{Config, ProxyEntry};
use crate::error::GatewayError;
use crate::provider::Proxy;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Where proxy descriptors come from on `reload()`.
pub trait ProxySource: Send + Sync {
    fn read(&self) -> Result<Vec<ProxyEntry>, anyhow::Error>;
}

/// Reads the `third-party-apis` list from a config file on every reload.
pub struct FileProxySource {
    path: String,
}

impl FileProxySource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl ProxySource for FileProxySource {
    fn read(&self) -> Result<Vec<ProxyEntry>, anyhow::Error> {
        Ok(Config::load(&self.path)?.third_party_apis)
    }
}

/// A fixed list, for tests and embedding.
pub struct StaticProxySource(pub Vec<ProxyEntry>);

impl ProxySource for StaticProxySource {
    fn read(&self) -> Result<Vec<ProxyEntry>, anyhow::Error> {
        Ok(self.0.clone())
    }
}

// ─── Snapshot ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ProxySnapshot {
    /// Declaration order.
    proxies: Vec<Arc<Proxy>>,
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl ProxySnapshot {
    fn empty() -> Self {
        Self {
            proxies: Vec::new(),
            version: 0,
            loaded_at: Utc::now(),
        }
    }

    pub fn all(&self) -> &[Arc<Proxy>] {
        &self.proxies
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Active proxies by ascending priority; ties keep declaration order.
    pub fn active(&self) -> Vec<Arc<Proxy>> {
        let mut active: Vec<Arc<Proxy>> =
            self.proxies.iter().filter(|p| p.active).cloned().collect();
        active.sort_by_key(|p| p.priority);
        active
    }

    /// Active proxies listing `model`, or every active proxy if none does.
    pub fn for_model(&self, model: &str) -> Vec<Arc<Proxy>> {
        let active = self.active();
        let matching: Vec<Arc<Proxy>> = active
            .iter()
            .filter(|p| p.supports_model(model))
            .cloned()
            .collect();
        if matching.is_empty() { active } else { matching }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Proxy>> {
        self.proxies.iter().find(|p| p.name == name).cloned()
    }
}

// ─── Registry ──────────────────────────────────────────────────────────────

pub struct ProxyRegistry {
    snapshot: ArcSwap<ProxySnapshot>,
    source: Option<Box<dyn ProxySource>>,
}

impl ProxyRegistry {
    /// An empty registry with no reload source.
    pub fn empty() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ProxySnapshot::empty()),
            source: None,
        }
    }

    /// Build a registry and perform the initial load. Failure here is fatal
    /// for the caller since there is no previous snapshot to fall back to.
    pub fn from_source(source: impl ProxySource + 'static) -> Result<Self, GatewayError> {
        let registry = Self {
            snapshot: ArcSwap::from_pointee(ProxySnapshot::empty()),
            source: Some(Box::new(source)),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Validate `entries` and publish them as the new snapshot. Any invalid
    /// entry rejects the whole list and the current snapshot stays in place.
    /// An empty list is only accepted while the pool is still empty.
    pub fn load(&self, entries: &[ProxyEntry]) -> Result<usize, GatewayError> {
        if entries.is_empty() && !self.snapshot.load().is_empty() {
            return Err(GatewayError::Config(
                "proxy list is empty, keeping the current pool".to_string(),
            ));
        }
        let proxies = build_proxies(entries)?;
        let count = proxies.len();
        let version = self.snapshot.load().version + 1;
        self.snapshot.store(Arc::new(ProxySnapshot {
            proxies,
            version,
            loaded_at: Utc::now(),
        }));
        tracing::info!(proxies = count, version, "Proxy pool loaded");
        Ok(count)
    }

    /// Re-read the source and swap in the result.
    pub fn reload(&self) -> Result<usize, GatewayError> {
        let Some(source) = &self.source else {
            return Err(GatewayError::Config(
                "registry has no reload source".to_string(),
            ));
        };
        let entries = source
            .read()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        self.load(&entries).inspect_err(|e| {
            tracing::error!("Proxy reload rejected, keeping previous pool: {e}");
        })
    }

    /// The current snapshot. Hold on to it for the duration of one dispatch.
    pub fn snapshot(&self) -> Arc<ProxySnapshot> {
        self.snapshot.load_full()
    }

    pub fn active_proxies(&self) -> Vec<Arc<Proxy>> {
        self.snapshot.load().active()
    }

    pub fn proxies_for_model(&self, model: &str) -> Vec<Arc<Proxy>> {
        self.snapshot.load().for_model(model)
    }

    pub fn proxy(&self, name: &str) -> Option<Arc<Proxy>> {
        self.snapshot.load().get(name)
    }

    /// Sorted, deduplicated union of the active proxies' models.
    pub fn all_models(&self) -> Vec<String> {
        let snapshot = self.snapshot.load();
        let models: BTreeSet<&str> = snapshot
            .all()
            .iter()
            .filter(|p| p.active)
            .flat_map(|p| p.models.iter().map(String::as_str))
            .collect();
        models.into_iter().map(str::to_string).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot.load();
        let proxies: Vec<ProxySummary> = snapshot
            .all()
            .iter()
            .map(|p| ProxySummary {
                name: p.name.clone(),
                base_url: p.base_url.clone(),
                active: p.active,
                priority: p.priority,
                key_count: p.api_keys.len(),
                default_model: p.default_model.clone(),
                models: p.models.clone(),
            })
            .collect();
        RegistryStats {
            total_proxies: proxies.len(),
            active_proxies: proxies.iter().filter(|p| p.active).count(),
            total_keys: proxies.iter().map(|p| p.key_count).sum(),
            total_models: self.all_models().len(),
            version: snapshot.version,
            loaded_at: snapshot.loaded_at,
            proxies,
        }
    }
}

/// Pool summary for diagnostics. Carries key counts, never key material.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_proxies: usize,
    pub active_proxies: usize,
    pub total_keys: usize,
    pub total_models: usize,
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub proxies: Vec<ProxySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxySummary {
    pub name: String,
    pub base_url: String,
    pub active: bool,
    pub priority: i32,
    pub key_count: usize,
    pub default_model: Option<String>,
    pub models: Vec<String>,
}

fn build_proxies(entries: &[ProxyEntry]) -> Result<Vec<Arc<Proxy>>, GatewayError> {
    let mut names = HashSet::new();
    let mut proxies = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let invalid = |reason: &str| {
            GatewayError::Config(format!("proxy entry #{index}: {reason}"))
        };

        let name = entry
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("missing name"))?;
        if !names.insert(name) {
            return Err(invalid(&format!("duplicate name '{name}'")));
        }

        let base_url = entry
            .api_base
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| invalid(&format!("'{name}' is missing api_base")))?;
        match url::Url::parse(base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(invalid(&format!(
                    "'{name}' has invalid api_base '{base_url}', expected an http(s) URL"
                )));
            }
        }

        if entry.api_keys.iter().all(|k| k.trim().is_empty()) {
            return Err(invalid(&format!("'{name}' has no api_keys")));
        }
        if entry.models.iter().all(|m| m.trim().is_empty()) {
            return Err(invalid(&format!("'{name}' has no models")));
        }

        proxies.push(Arc::new(Proxy {
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_keys: non_blank(&entry.api_keys),
            models: non_blank(&entry.models),
            default_model: entry.model.clone().filter(|m| !m.trim().is_empty()),
            priority: entry.priority,
            active: entry.is_active,
        }));
    }

    Ok(proxies)
}

fn non_blank(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
