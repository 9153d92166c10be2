//! Shared fakes for the agent integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentsdk_agent::cache::ResourceCache;
use agentsdk_agent::client::{CentralClient, ListQuery};
use agentsdk_agent::config::{AgentType, Config};
use agentsdk_agent::error::{AgentError, Result};
use agentsdk_agent::source::harvester::{Harvester, HarvesterError};
use agentsdk_agent::source::stream::WatchTransport;
use agentsdk_agent::AgentContext;
use agentsdk_events::{EventMeta, EventType, WatchEvent};
use agentsdk_resource::status::StatusUpdate;
use agentsdk_resource::{details, KnownKind, Owner, Patch, PatchOp, ResourceInstance};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

pub const ENV: &str = "prod";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agent_type = AgentType::Discovery;
    config.central.url = "http://central.test".to_string();
    config.central.harvester_url = "http://central.test".to_string();
    config.central.environment = ENV.to_string();
    config.central.agent_name = Some("discovery".to_string());
    config.central.credentials.deprovision_expired = true;
    config.acl_debounce = Duration::from_secs(5);
    config
}

pub fn test_context(config: Config, central: Arc<FakeCentral>) -> AgentContext {
    let cache = Arc::new(ResourceCache::new(config.watch_topic_name()));
    AgentContext::new(config, cache, central)
}

pub fn service(name: &str, ext_id: &str, team: Option<&str>) -> ResourceInstance {
    let mut ri = ResourceInstance::new(KnownKind::ApiService, name, ENV);
    ri.metadata.id = format!("svc-{name}");
    ri.set_agent_detail(details::EXTERNAL_API_ID, ext_id);
    ri.owner = team.map(Owner::team);
    ri
}

pub fn instance(name: &str, ext_id: &str, stage: &str) -> ResourceInstance {
    let mut ri = ResourceInstance::new(KnownKind::ApiServiceInstance, name, ENV);
    ri.metadata.id = format!("inst-{name}");
    ri.set_agent_detail(details::EXTERNAL_API_ID, ext_id);
    ri.set_agent_detail(details::EXTERNAL_API_STAGE, stage);
    ri
}

pub fn event(sequence_id: i64, event_type: EventType, payload: ResourceInstance) -> WatchEvent {
    WatchEvent {
        id: format!("evt-{sequence_id}"),
        time: Utc::now(),
        event_type,
        metadata: EventMeta {
            watch_topic_id: "topic-1".to_string(),
            watch_topic_self_link: "/management/v1alpha1/watchtopics/prod-discoveryagents".to_string(),
            sequence_id,
            subresource: None,
        },
        payload,
    }
}

/// A control plane call, as recorded by [`FakeCentral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(KnownKind, usize),
    Get(String),
    Create(String),
    Update(String),
    Delete(String),
    CreateSubResource(String, Vec<String>),
    Patch(String, Vec<String>),
    Status(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        !matches!(self, Call::List(..) | Call::Get(_))
    }
}

/// In-memory control plane keyed by self link.
#[derive(Default)]
pub struct FakeCentral {
    resources: Mutex<BTreeMap<String, ResourceInstance>>,
    calls: Mutex<Vec<Call>>,
    statuses: Mutex<Vec<StatusUpdate>>,
    fail_writes: AtomicBool,
    fail_lists: Mutex<HashSet<KnownKind>>,
}

impl FakeCentral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, resource: ResourceInstance) {
        self.resources
            .lock()
            .unwrap()
            .insert(resource.self_link().to_string(), resource);
    }

    pub fn resource(&self, kind: KnownKind, name: &str) -> Option<ResourceInstance> {
        let link = ResourceInstance::new(kind, name, ENV);
        self.resources.lock().unwrap().get(link.self_link()).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list(&self, kind: KnownKind) {
        self.fail_lists.lock().unwrap().insert(kind);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_write(&self, operation: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AgentError::Remote {
                operation: operation.to_string(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CentralClient for FakeCentral {
    async fn list(&self, kind: KnownKind, query: &ListQuery) -> Result<Vec<ResourceInstance>> {
        self.record(Call::List(kind, query.page));
        if self.fail_lists.lock().unwrap().contains(&kind) {
            return Err(AgentError::Transport(format!("list {kind} failed")));
        }
        let resources = self.resources.lock().unwrap();
        Ok(resources
            .values()
            .filter(|r| r.known_kind().ok() == Some(kind))
            .skip((query.page - 1) * query.page_size)
            .take(query.page_size)
            .cloned()
            .collect())
    }

    async fn get(&self, self_link: &str) -> Result<ResourceInstance> {
        self.record(Call::Get(self_link.to_string()));
        self.resources
            .lock()
            .unwrap()
            .get(self_link)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(self_link.to_string()))
    }

    async fn create(&self, resource: &ResourceInstance) -> Result<ResourceInstance> {
        self.record(Call::Create(resource.name.clone()));
        self.check_write("create")?;
        let mut created = resource.clone();
        if created.metadata.id.is_empty() {
            created.metadata.id = format!("{}-{}", created.kind, created.name);
        }
        self.insert(created.clone());
        Ok(created)
    }

    async fn update(&self, resource: &ResourceInstance) -> Result<ResourceInstance> {
        self.record(Call::Update(resource.name.clone()));
        self.check_write("update")?;
        let mut resources = self.resources.lock().unwrap();
        let Some(current) = resources.get(resource.self_link()) else {
            return Err(AgentError::NotFound(resource.self_link().to_string()));
        };
        let mut updated = resource.clone();
        updated.metadata.id = current.metadata.id.clone();
        resources.insert(updated.self_link().to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, resource: &ResourceInstance) -> Result<()> {
        self.record(Call::Delete(resource.name.clone()));
        self.check_write("delete")?;
        self.resources
            .lock()
            .unwrap()
            .remove(resource.self_link())
            .map(|_| ())
            .ok_or_else(|| AgentError::NotFound(resource.self_link().to_string()))
    }

    async fn create_sub_resource(
        &self,
        resource: &ResourceInstance,
        sub_resources: BTreeMap<String, Value>,
    ) -> Result<()> {
        self.record(Call::CreateSubResource(
            resource.name.clone(),
            sub_resources.keys().cloned().collect(),
        ));
        self.check_write("create sub-resource")?;
        let mut resources = self.resources.lock().unwrap();
        if let Some(current) = resources.get_mut(resource.self_link()) {
            current.sub_resources.extend(sub_resources);
        }
        Ok(())
    }

    async fn patch_sub_resources(
        &self,
        resource: &ResourceInstance,
        patches: &[Patch],
    ) -> Result<ResourceInstance> {
        self.record(Call::Patch(
            resource.name.clone(),
            patches.iter().map(|p| p.sub_resource().to_string()).collect(),
        ));
        self.check_write("patch")?;
        let mut resources = self.resources.lock().unwrap();
        let current = resources
            .get_mut(resource.self_link())
            .ok_or_else(|| AgentError::NotFound(resource.self_link().to_string()))?;
        for patch in patches {
            match patch.op {
                PatchOp::Add | PatchOp::Replace => {
                    current.set_sub_resource(patch.sub_resource(), patch.value.clone());
                }
                PatchOp::Remove => {
                    current.sub_resources.remove(patch.sub_resource());
                }
            }
        }
        Ok(current.clone())
    }

    async fn update_agent_status(&self, update: &StatusUpdate) -> Result<()> {
        self.record(Call::Status(update.state.to_string()));
        self.check_write("status")?;
        self.statuses.lock().unwrap().push(update.clone());
        Ok(())
    }
}

/// Replay endpoint over a fixed event log.
#[derive(Default)]
pub struct FakeHarvester {
    events: Mutex<Vec<WatchEvent>>,
    gone: Mutex<Option<i64>>,
    fail: AtomicBool,
    requests: Mutex<Vec<i64>>,
}

impl FakeHarvester {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: WatchEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Answer the next request with a purged sequence.
    pub fn gone_once(&self, max: i64) {
        *self.gone.lock().unwrap() = Some(max);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<i64> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Harvester for FakeHarvester {
    async fn receive_sync_events(
        &self,
        _topic_self_link: &str,
        sequence: i64,
        sink: Option<&mpsc::Sender<WatchEvent>>,
    ) -> std::result::Result<i64, HarvesterError> {
        self.requests.lock().unwrap().push(sequence);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HarvesterError::Remote {
                status: 500,
                body: "harvester down".to_string(),
            });
        }
        if let Some(max) = self.gone.lock().unwrap().take() {
            return Err(HarvesterError::SequenceGone {
                requested: sequence,
                max,
            });
        }

        let batch: Vec<WatchEvent> = {
            let events = self.events.lock().unwrap();
            if sequence <= 0 {
                events.last().cloned().into_iter().collect()
            } else {
                events
                    .iter()
                    .filter(|e| e.sequence_id() > sequence)
                    .cloned()
                    .collect()
            }
        };

        let mut last = 0;
        for event in batch {
            last = event.sequence_id();
            if let Some(sink) = sink {
                sink.send(event).await.map_err(|_| HarvesterError::SinkClosed)?;
            }
        }
        Ok(last)
    }
}

/// Watch transport whose channel the test drives.
#[derive(Default)]
pub struct FakeTransport {
    sender: Mutex<Option<mpsc::Sender<WatchEvent>>>,
    opened: Mutex<Vec<i64>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<i64> {
        self.opened.lock().unwrap().clone()
    }

    pub async fn send(&self, event: WatchEvent) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Simulate the connection dropping.
    pub fn drop_connection(&self) {
        self.sender.lock().unwrap().take();
    }
}

#[async_trait]
impl WatchTransport for FakeTransport {
    async fn open(&self, _topic_self_link: &str, sequence: i64) -> Result<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(16);
        *self.sender.lock().unwrap() = Some(tx);
        self.opened.lock().unwrap().push(sequence);
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    async fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}
