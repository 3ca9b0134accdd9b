//! In-process collaborators for tests and dry runs.
//!
//! None of these touch Docker, the network or a real bucket.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dsc_db::Database;
use dsc_types::{Channel, DiscoveryError, Event, MountMode, Result};
use serde_json::Value;

use crate::notify::{Notification, Publisher};
use crate::object_store::ObjectStore;
use crate::resolver::DomainResolver;
use crate::sandbox::{ContainerEngine, ContainerSpec, Sandbox, SandboxPolicy};
use crate::services::Services;
use crate::workspace::WorkspaceFactory;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulates what a container leaves behind in its workspace.
pub type OutputWriter = Arc<dyn Fn(&ContainerSpec) -> std::io::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create,
    Wait(String),
    Remove(String),
}

/// Container engine that records calls instead of running anything.
pub struct MockEngine {
    reachable: bool,
    fail_create: bool,
    fail_wait: bool,
    exit_code: i64,
    wait_delay: Option<Duration>,
    output: Option<OutputWriter>,
    counter: AtomicUsize,
    calls: Mutex<Vec<EngineCall>>,
    created: Mutex<Vec<ContainerSpec>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            reachable: true,
            fail_create: false,
            fail_wait: false,
            exit_code: 0,
            wait_delay: None,
            output: None,
            counter: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// An engine whose ping fails.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    /// Run `writer` against each created container's spec.
    pub fn with_output<F>(mut self, writer: F) -> Self
    where
        F: Fn(&ContainerSpec) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(writer));
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        locked(&self.calls).clone()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        locked(&self.created).clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(DiscoveryError::Container("connection refused".to_string()))
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        locked(&self.calls).push(EngineCall::Create);
        if self.fail_create {
            return Err(DiscoveryError::Container("create failed".to_string()));
        }
        locked(&self.created).push(spec.clone());

        if let Some(ref writer) = self.output {
            writer(spec)?;
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-{n}"))
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        locked(&self.calls).push(EngineCall::Wait(id.to_string()));
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_wait {
            return Err(DiscoveryError::Container(format!("lost container {id}")));
        }
        Ok(self.exit_code)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        locked(&self.calls).push(EngineCall::Remove(id.to_string()));
        Ok(())
    }
}

/// Resolver answering from a fixed set of routable names.
#[derive(Debug, Default)]
pub struct StaticResolver {
    routable: HashSet<String>,
    lookups: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn routable<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            routable: domains.into_iter().map(Into::into).collect(),
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// Every domain that reached the resolver, in order.
    pub fn lookups(&self) -> Vec<String> {
        locked(&self.lookups).clone()
    }
}

#[async_trait]
impl DomainResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> bool {
        locked(&self.lookups).push(domain.to_string());
        self.routable.contains(domain)
    }
}

/// Publisher that keeps everything it was given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingPublisher {
    pub fn notifications(&self) -> Vec<Notification> {
        locked(&self.sent).clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, channel: Channel, event: Event, payload: Value) {
        locked(&self.sent).push(Notification {
            channel,
            event,
            payload,
        });
    }
}

/// Object store holding uploads in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail: bool,
}

impl MemoryObjectStore {
    /// A store rejecting every upload.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        locked(&self.objects).keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        locked(&self.objects).get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, local_path: &Path, object_key: &str) -> Result<()> {
        if self.fail {
            return Err(DiscoveryError::Storage("bucket unavailable".to_string()));
        }
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| DiscoveryError::Storage(e.to_string()))?;
        locked(&self.objects).insert(object_key.to_string(), bytes);
        Ok(())
    }
}

/// Fully wired [`Services`] over the in-process collaborators.
pub struct Harness {
    pub services: Services,
    pub db: Arc<Database>,
    pub publisher: Arc<RecordingPublisher>,
    pub resolver: Arc<StaticResolver>,
    pub engine: Arc<MockEngine>,
    pub store: Arc<MemoryObjectStore>,
}

impl Harness {
    /// Workspaces are created under `workspace_base` without changing owner.
    pub async fn new(
        workspace_base: &Path,
        policy: SandboxPolicy,
        engine: MockEngine,
        resolver: StaticResolver,
        store: MemoryObjectStore,
    ) -> Result<Self> {
        let db = Database::in_memory().await?;
        db.initialize().await?;
        let db = Arc::new(db);

        let publisher = Arc::new(RecordingPublisher::default());
        let resolver = Arc::new(resolver);
        let engine = Arc::new(engine);
        let store = Arc::new(store);
        let sandbox = Sandbox::connect(policy, engine.clone()).await?;

        let services = Services {
            db: db.clone(),
            publisher: publisher.clone(),
            resolver: resolver.clone(),
            store: store.clone(),
            sandbox,
            workspaces: WorkspaceFactory::new(workspace_base, MountMode::ReadWrite, false),
        };

        Ok(Self {
            services,
            db,
            publisher,
            resolver,
            engine,
            store,
        })
    }
}
