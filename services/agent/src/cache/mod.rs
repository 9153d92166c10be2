//! Local cache of control plane resources.
//!
//! The cache is the only structure shared for writing between components.
//! It owns its synchronization: every method takes `&self`, and the cache is
//! handed around as `Arc<ResourceCache>`.
//!
//! Resources are stored per [`KnownKind`]. Services are keyed by their
//! external primary key (falling back to the external API id), everything
//! else by its control plane id. Secondary lookups (id, name, display name,
//! external API id) resolve to the primary key.

pub mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use agentsdk_events::{Sequence, SequenceProvider};
use agentsdk_resource::{ContentHash, GroupKind, KnownKind, ResourceError, ResourceInstance};
use tokio::sync::RwLock;
use tracing::{debug, info};

use self::store::{CacheSnapshot, CacheStore, CacheStoreError};

/// Outcome of adding a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    Added,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
struct Entry {
    resource: ResourceInstance,
    hash: ContentHash,
}

#[derive(Debug, Default)]
struct KindStore {
    items: BTreeMap<String, Entry>,
    /// metadata id -> primary key
    ids: HashMap<String, String>,
    /// name, display name, external id -> primary key
    aliases: HashMap<String, String>,
}

impl KindStore {
    fn resolve(&self, key: &str) -> Option<&str> {
        if let Some((k, _)) = self.items.get_key_value(key) {
            return Some(k.as_str());
        }
        self.ids
            .get(key)
            .or_else(|| self.aliases.get(key))
            .map(String::as_str)
    }

    fn insert(&mut self, key: String, aliases: Vec<String>, resource: ResourceInstance) -> CacheChange {
        let hash = resource.content_hash();

        // A resource whose primary key changed leaves its old entry behind.
        let stale = self
            .ids
            .get(resource.id())
            .filter(|old| !resource.id().is_empty() && **old != key)
            .cloned();
        let rekeyed = stale.is_some();
        if let Some(old) = stale {
            self.remove_entry(&old);
        }

        let change = match self.items.get(&key) {
            Some(existing) if existing.hash == hash && existing.resource.id() == resource.id() => {
                return CacheChange::Unchanged
            }
            Some(_) => {
                self.ids.retain(|_, v| *v != key);
                self.aliases.retain(|_, v| *v != key);
                CacheChange::Updated
            }
            None if rekeyed => CacheChange::Updated,
            None => CacheChange::Added,
        };

        if !resource.id().is_empty() {
            self.ids.insert(resource.id().to_string(), key.clone());
        }
        for alias in aliases.into_iter().filter(|a| !a.is_empty()) {
            self.aliases.insert(alias, key.clone());
        }
        self.items.insert(key, Entry { resource, hash });
        change
    }

    fn remove(&mut self, key: &str) -> Option<ResourceInstance> {
        let key = self.resolve(key)?.to_string();
        self.remove_entry(&key)
    }

    fn remove_entry(&mut self, key: &str) -> Option<ResourceInstance> {
        let entry = self.items.remove(key)?;
        self.ids.retain(|_, v| v.as_str() != key);
        self.aliases.retain(|_, v| v.as_str() != key);
        Some(entry.resource)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    stores: HashMap<KnownKind, KindStore>,
    /// access request id -> subscription name
    subscriptions: HashMap<String, String>,
}

impl CacheState {
    fn store(&self, kind: KnownKind) -> Option<&KindStore> {
        self.stores.get(&kind)
    }
}

/// Primary key a resource is stored under.
fn primary_key(kind: KnownKind, resource: &ResourceInstance) -> String {
    match kind {
        KnownKind::ApiService => {
            let details = resource.agent_details();
            details
                .primary_key
                .or(details.external_api_id)
                .unwrap_or_else(|| resource.name.clone())
        }
        _ if !resource.id().is_empty() => resource.id().to_string(),
        _ => resource.name.clone(),
    }
}

fn aliases(kind: KnownKind, resource: &ResourceInstance) -> Vec<String> {
    let mut aliases = vec![resource.name.clone()];
    if kind == KnownKind::ApiService {
        aliases.push(resource.display_name().to_string());
        if let Some(ext) = resource.agent_details().external_api_id {
            aliases.push(ext);
        }
    }
    aliases
}

/// Concurrent resource cache with optional SQLite persistence.
pub struct ResourceCache {
    state: RwLock<CacheState>,
    topic: String,
    sequence: Sequence,
    store: Option<Mutex<CacheStore>>,
    loaded_persisted: AtomicBool,
}

impl ResourceCache {
    /// Create an empty in-memory cache for the given watch topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            topic: topic.into(),
            sequence: Sequence::default(),
            store: None,
            loaded_persisted: AtomicBool::new(false),
        }
    }

    /// Create a cache backed by `store`, loading whatever it holds.
    pub fn with_store(topic: impl Into<String>, store: CacheStore) -> Result<Self, CacheStoreError> {
        let topic = topic.into();
        let snapshot = store.load()?;

        let mut state = CacheState::default();
        let mut loaded = 0usize;
        for (key, resource) in snapshot.resources {
            let Ok(kind) = resource.known_kind() else {
                debug!(cache_key = %key, kind = %resource.kind, "Dropping persisted resource of unknown kind");
                continue;
            };
            let pk = primary_key(kind, &resource);
            let aliases = aliases(kind, &resource);
            state.stores.entry(kind).or_default().insert(pk, aliases, resource);
            loaded += 1;
        }

        let sequence = snapshot
            .sequences
            .iter()
            .find(|(t, _)| *t == topic)
            .map(|(_, id)| *id)
            .unwrap_or(0);

        let has_persisted = loaded > 0 || sequence > 0;
        if has_persisted {
            info!(topic = %topic, resources = loaded, sequence_id = sequence, "Loaded persisted cache");
        }

        Ok(Self {
            state: RwLock::new(state),
            topic,
            sequence: Sequence::new(sequence),
            store: Some(Mutex::new(store)),
            loaded_persisted: AtomicBool::new(has_persisted),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Whether startup found a persisted cache to resume from.
    pub fn has_loaded_persisted_cache(&self) -> bool {
        self.loaded_persisted.load(Ordering::SeqCst)
    }

    /// Insert or replace a resource.
    pub async fn add(&self, resource: ResourceInstance) -> Result<CacheChange, ResourceError> {
        let kind = resource.known_kind()?;
        let pk = primary_key(kind, &resource);
        let aliases = aliases(kind, &resource);

        let mut state = self.state.write().await;
        let change = state.stores.entry(kind).or_default().insert(pk, aliases, resource);
        Ok(change)
    }

    /// Look up by primary key, control plane id, name or alias.
    pub async fn get(&self, kind: KnownKind, key: &str) -> Option<ResourceInstance> {
        let state = self.state.read().await;
        let store = state.store(kind)?;
        let pk = store.resolve(key)?;
        store.items.get(pk).map(|e| e.resource.clone())
    }

    pub async fn get_by_id(&self, kind: KnownKind, id: &str) -> Option<ResourceInstance> {
        let state = self.state.read().await;
        let store = state.store(kind)?;
        let pk = store.ids.get(id)?;
        store.items.get(pk).map(|e| e.resource.clone())
    }

    pub async fn get_by_name(&self, kind: KnownKind, name: &str) -> Option<ResourceInstance> {
        let state = self.state.read().await;
        let store = state.store(kind)?;
        let pk = store.aliases.get(name)?;
        store.items.get(pk).map(|e| e.resource.clone())
    }

    /// Remove a resource by any of its keys.
    pub async fn delete(&self, kind: KnownKind, key: &str) -> Option<ResourceInstance> {
        let mut state = self.state.write().await;
        let removed = state.stores.get_mut(&kind)?.remove(key);
        if let (Some(r), KnownKind::AccessRequest) = (&removed, kind) {
            state.subscriptions.remove(r.id());
        }
        removed
    }

    /// All cached resources of a kind, ordered by primary key.
    pub async fn list(&self, kind: KnownKind) -> Vec<ResourceInstance> {
        let state = self.state.read().await;
        state
            .store(kind)
            .map(|s| s.items.values().map(|e| e.resource.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn keys(&self, kind: KnownKind) -> Vec<String> {
        let state = self.state.read().await;
        state
            .store(kind)
            .map(|s| s.items.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn count(&self, kind: KnownKind) -> usize {
        let state = self.state.read().await;
        state.store(kind).map(|s| s.items.len()).unwrap_or(0)
    }

    pub async fn get_service_by_primary_key(&self, key: &str) -> Option<ResourceInstance> {
        let state = self.state.read().await;
        state
            .store(KnownKind::ApiService)?
            .items
            .get(key)
            .map(|e| e.resource.clone())
    }

    /// Cache keys (`group/kind/key`) of every resource of the given kind.
    pub async fn watch_resource_keys(&self, group: &str, kind: &str) -> Vec<String> {
        let Ok(known) = KnownKind::try_from(&GroupKind::new(group, kind)) else {
            return Vec::new();
        };
        self.keys(known)
            .await
            .into_iter()
            .map(|k| format!("{}/{}/{}", group, kind, k))
            .collect()
    }

    pub async fn get_watch_resource_by_key(&self, key: &str) -> Option<ResourceInstance> {
        let mut parts = key.splitn(3, '/');
        let (group, kind, pk) = (parts.next()?, parts.next()?, parts.next()?);
        let known = KnownKind::try_from(&GroupKind::new(group, kind)).ok()?;
        let state = self.state.read().await;
        state
            .store(known)?
            .items
            .get(pk)
            .map(|e| e.resource.clone())
    }

    /// Number of cached instances belonging to `service`.
    pub async fn instance_count_for_service(&self, service: &ResourceInstance) -> usize {
        let svc = service.agent_details();
        let state = self.state.read().await;
        let Some(instances) = state.store(KnownKind::ApiServiceInstance) else {
            return 0;
        };

        instances
            .items
            .values()
            .filter(|e| {
                let inst = e.resource.agent_details();
                let pk_match = inst.primary_key.is_some() && inst.primary_key == svc.primary_key;
                let id_match =
                    inst.external_api_id.is_some() && inst.external_api_id == svc.external_api_id;
                pk_match || id_match
            })
            .count()
    }

    /// Sorted, deduplicated team ids owning cached services.
    pub async fn team_ids_in_services(&self) -> Vec<String> {
        let state = self.state.read().await;
        let Some(services) = state.store(KnownKind::ApiService) else {
            return Vec::new();
        };
        services
            .items
            .values()
            .filter_map(|e| e.resource.owner_team_id().map(str::to_string))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Remember which subscription an access request came from.
    pub async fn link_subscription(&self, access_request_id: &str, subscription: &str) {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .insert(access_request_id.to_string(), subscription.to_string());
    }

    pub async fn subscription_for(&self, access_request_id: &str) -> Option<String> {
        let state = self.state.read().await;
        state.subscriptions.get(access_request_id).cloned()
    }

    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.stores.values().map(|s| s.items.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Persist the current contents. A cache without a store does nothing.
    pub async fn save_cache(&self) -> Result<(), CacheStoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let snapshot = {
            let state = self.state.read().await;
            let mut resources = Vec::new();
            for (kind, s) in &state.stores {
                for (pk, e) in &s.items {
                    resources.push((format!("{}/{}", kind, pk), e.resource.clone()));
                }
            }
            CacheSnapshot {
                resources,
                sequences: vec![(self.topic.clone(), self.sequence.get())],
            }
        };

        let mut store = store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        store.replace_all(&snapshot)
    }

    /// Drop everything, including the sequence position.
    pub async fn flush(&self) {
        let mut state = self.state.write().await;
        *state = CacheState::default();
        self.sequence.reset(0);
        self.loaded_persisted.store(false, Ordering::SeqCst);
        info!(topic = %self.topic, "Cache flushed");
    }
}

impl SequenceProvider for ResourceCache {
    fn get_sequence(&self) -> i64 {
        self.sequence.get()
    }

    fn set_sequence(&self, id: i64) {
        self.sequence.advance(id);
    }
}
