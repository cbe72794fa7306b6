//! Hosted-zone provider boundary and the zone service.
//!
//! The provider is a trait so the console core stays independent of any
//! vendor SDK; `MemoryProvider` backs demo deployments and tests. The
//! `ZoneService` layers the zone allow-list, record-name qualification and
//! the TTL read cache on top of whichever provider is configured.

use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

/// How long cached zone and record listings stay fresh.
const CACHE_TTL_SECS: i64 = 300;

/// One hosted zone as shown in the console.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub record_count: i64,
    pub comment: String,
    pub label: String,
}

/// One record set within a zone. Alias records carry a target instead of
/// TTL/values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSet {
    pub name: String,
    pub rtype: String,
    pub ttl: i64,
    pub values: Vec<String>,
    pub is_alias: bool,
    pub alias_target: String,
    pub alias_zone_id: String,
}

/// Mutation actions accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Upsert,
    Delete,
}

impl ChangeAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(ChangeAction::Create),
            "UPSERT" => Some(ChangeAction::Upsert),
            "DELETE" => Some(ChangeAction::Delete),
            _ => None,
        }
    }
}

/// One record mutation request.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub action: ChangeAction,
    pub name: String,
    pub rtype: String,
    pub ttl: i64,
    pub values: Vec<String>,
}

/// Errors from the provider or the service layer around it
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("zone {0} is not in the allowed list")]
    ZoneNotAllowed(String),

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("record not found: {0} {1}")]
    RecordNotFound(String, String),

    #[error("record already exists: {0} {1}")]
    RecordExists(String, String),

    #[error("provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, DnsError>;

/// Hosted-zone provider interface.
///
/// `list_records` returns the complete record listing; providers with
/// paginated APIs follow their continuation tokens internally.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// List every hosted zone visible to the configured account
    async fn list_zones(&self) -> Result<Vec<Zone>>;

    /// Get one hosted zone
    async fn get_zone(&self, zone_id: &str) -> Result<Zone>;

    /// List all record sets in a zone
    async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>>;

    /// Apply one record mutation
    async fn change_record(&self, zone_id: &str, change: &RecordChange) -> Result<()>;
}

/// In-memory provider for demo deployments and tests.
pub struct MemoryProvider {
    zones: RwLock<HashMap<String, Zone>>,
    records: RwLock<HashMap<String, Vec<RecordSet>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a zone and its records
    pub fn add_zone(&self, zone: Zone, records: Vec<RecordSet>) {
        let id = zone.id.clone();
        self.zones.write().unwrap().insert(id.clone(), zone);
        self.records.write().unwrap().insert(id, records);
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsProvider for MemoryProvider {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let zones = self.zones.read().unwrap();
        let records = self.records.read().unwrap();
        let mut listing: Vec<Zone> = zones
            .values()
            .map(|z| {
                let mut z = z.clone();
                z.record_count = records.get(&z.id).map(|r| r.len() as i64).unwrap_or(0);
                z
            })
            .collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn get_zone(&self, zone_id: &str) -> Result<Zone> {
        let zones = self.zones.read().unwrap();
        zones
            .get(zone_id)
            .cloned()
            .ok_or_else(|| DnsError::ZoneNotFound(zone_id.to_string()))
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        let records = self.records.read().unwrap();
        records
            .get(zone_id)
            .cloned()
            .ok_or_else(|| DnsError::ZoneNotFound(zone_id.to_string()))
    }

    async fn change_record(&self, zone_id: &str, change: &RecordChange) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let zone_records = records
            .get_mut(zone_id)
            .ok_or_else(|| DnsError::ZoneNotFound(zone_id.to_string()))?;
        let existing = zone_records
            .iter()
            .position(|r| r.name == change.name && r.rtype == change.rtype);
        match change.action {
            ChangeAction::Create => {
                if existing.is_some() {
                    return Err(DnsError::RecordExists(
                        change.name.clone(),
                        change.rtype.clone(),
                    ));
                }
                zone_records.push(RecordSet {
                    name: change.name.clone(),
                    rtype: change.rtype.clone(),
                    ttl: change.ttl,
                    values: change.values.clone(),
                    ..Default::default()
                });
            }
            ChangeAction::Upsert => {
                let record = RecordSet {
                    name: change.name.clone(),
                    rtype: change.rtype.clone(),
                    ttl: change.ttl,
                    values: change.values.clone(),
                    ..Default::default()
                };
                match existing {
                    Some(i) => zone_records[i] = record,
                    None => zone_records.push(record),
                }
            }
            ChangeAction::Delete => match existing {
                Some(i) => {
                    zone_records.remove(i);
                }
                None => {
                    return Err(DnsError::RecordNotFound(
                        change.name.clone(),
                        change.rtype.clone(),
                    ));
                }
            },
        }
        Ok(())
    }
}

/// Qualify a record name entered in a form against the zone's domain.
///
/// Empty input or `@` means the zone apex; a trailing dot is taken as
/// already fully qualified; a name that already ends in the zone domain
/// only needs the dot; anything else is a subdomain of the zone.
pub fn qualify_name(name: &str, zone_domain: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name == "@" {
        return zone_domain.to_string();
    }
    if name.ends_with('.') {
        return name.to_string();
    }
    if name.ends_with(zone_domain.trim_end_matches('.')) {
        return format!("{}.", name);
    }
    format!("{}.{}", name, zone_domain)
}

/// Parse a TTL form field, defaulting to 300 seconds on bad input.
pub fn parse_ttl(s: &str) -> i64 {
    s.trim().parse().unwrap_or(300)
}

/// Provider access with the zone allow-list and the store-backed read
/// cache applied.
pub struct ZoneService {
    provider: Arc<dyn DnsProvider>,
    store: Arc<dyn Store>,
    /// zone id -> display label; empty map allows every zone
    allowed: HashMap<String, String>,
}

impl ZoneService {
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        store: Arc<dyn Store>,
        allowed: HashMap<String, String>,
    ) -> Self {
        Self {
            provider,
            store,
            allowed,
        }
    }

    fn is_allowed(&self, zone_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains_key(zone_id)
    }

    fn is_fresh(cached_at: DateTime<Utc>) -> bool {
        Utc::now() - cached_at < Duration::seconds(CACHE_TTL_SECS)
    }

    /// List allowed zones, from cache when fresh.
    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        match self.store.cached_zones().await {
            Ok(Some((zones, cached_at))) if Self::is_fresh(cached_at) && !zones.is_empty() => {
                return Ok(zones);
            }
            Ok(_) => {}
            Err(e) => warn!("Zone cache read failed: {}", e),
        }

        let mut zones: Vec<Zone> = self
            .provider
            .list_zones()
            .await?
            .into_iter()
            .filter(|z| self.is_allowed(&z.id))
            .collect();
        for zone in &mut zones {
            if let Some(label) = self.allowed.get(&zone.id) {
                zone.label = label.clone();
            }
        }

        if let Err(e) = self.store.cache_zones(&zones).await {
            warn!("Zone cache write failed: {}", e);
        }
        Ok(zones)
    }

    /// Get one allowed zone, label attached. Never served from cache; the
    /// single-zone read is cheap and always current.
    pub async fn get_zone(&self, zone_id: &str) -> Result<Zone> {
        if !self.is_allowed(zone_id) {
            return Err(DnsError::ZoneNotAllowed(zone_id.to_string()));
        }
        let mut zone = self.provider.get_zone(zone_id).await?;
        if let Some(label) = self.allowed.get(zone_id) {
            zone.label = label.clone();
        }
        Ok(zone)
    }

    /// List a zone's records, from cache when fresh.
    pub async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        if !self.is_allowed(zone_id) {
            return Err(DnsError::ZoneNotAllowed(zone_id.to_string()));
        }

        match self.store.cached_records(zone_id).await {
            Ok(Some((records, cached_at))) if Self::is_fresh(cached_at) => {
                return Ok(records);
            }
            Ok(_) => {}
            Err(e) => warn!("Record cache read failed: {}", e),
        }

        let records = self.provider.list_records(zone_id).await?;
        if let Err(e) = self.store.cache_records(zone_id, &records).await {
            warn!("Record cache write failed: {}", e);
        }
        Ok(records)
    }

    /// Apply one record mutation and drop the zone's record cache.
    pub async fn change_record(&self, zone_id: &str, change: &RecordChange) -> Result<()> {
        if !self.is_allowed(zone_id) {
            return Err(DnsError::ZoneNotAllowed(zone_id.to_string()));
        }
        let result = self.provider.change_record(zone_id, change).await;
        if let Err(e) = self.store.invalidate_record_cache(zone_id).await {
            warn!("Record cache invalidation failed: {}", e);
        }
        result
    }

    /// Drop the cached records for one zone
    pub async fn refresh_records(&self, zone_id: &str) {
        if let Err(e) = self.store.invalidate_record_cache(zone_id).await {
            warn!("Record cache invalidation failed: {}", e);
        }
    }

    /// Drop every cached listing
    pub async fn refresh_all(&self) {
        if let Err(e) = self.store.invalidate_all_cache().await {
            warn!("Cache invalidation failed: {}", e);
        }
    }
}
