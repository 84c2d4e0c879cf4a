//! Upstream registry.
//!
//! Owns every live [`UpstreamInstance`], drives connect/reconnect/health
//! lifecycle, and aggregates the per-upstream catalogs into one namespaced
//! view. Lifecycle changes for one name are serialized by a per-name async
//! lock; the instance map itself is only locked for short, await-free
//! sections, and any decision taken before an await is re-checked after it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use switchyard_core::catalog::{PromptItem, ResourceItem};
use switchyard_core::ticker::{TickFlow, Ticker};
use switchyard_core::{ToolCallResult, ToolSpec};
use switchyard_settings::{CapabilityFlags, ConfigHandle, ConflictPolicy, GatewayConfig, UpstreamConfig};

use crate::adapter::TransportAdapter;
use crate::errors::{Result, UpstreamError};
use crate::factory::AdapterFactory;
use crate::health::{HealthCheck, start_health_probe};
use crate::mapping::NameMapper;
use crate::status::{UpstreamStatus, UpstreamStatusStore};
use crate::supervisor::{ReconnectState, ReconnectSupervisor, Reconnector};
use crate::tool::{ToolBuildContext, build_tool_specs};

// ─────────────────────────────────────────────────────────────────────────────
// Instances
// ─────────────────────────────────────────────────────────────────────────────

/// A connected upstream. Replaced wholesale on reconnect.
pub struct UpstreamInstance {
    /// Upstream name.
    pub name: String,
    /// Namespace used for published names.
    pub namespace: String,
    /// Transport tag.
    pub transport: &'static str,
    /// Live connection.
    pub adapter: Arc<dyn TransportAdapter>,
    /// Published tools (already namespaced and conflict-filtered).
    pub tools: Vec<ToolSpec>,
    /// Which catalogs are bridged.
    pub capabilities: CapabilityFlags,
    /// Name mapping for resources and prompts.
    pub mapper: NameMapper,
    /// When this instance connected.
    pub connected_at: DateTime<Utc>,
    /// Install order; later generations win `last-wins` conflicts.
    pub generation: u64,
    call_timeout: std::time::Duration,
    health: Mutex<Option<Ticker>>,
    watch: CancellationToken,
}

impl std::fmt::Debug for UpstreamInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamInstance")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("tools", &self.tools.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl UpstreamInstance {
    /// Stop timers and close the connection.
    async fn dispose(&self) {
        if let Some(ticker) = self.health.lock().take() {
            ticker.stop();
        }
        self.watch.cancel();
        self.adapter.close().await;
        debug!(upstream = %self.name, generation = self.generation, "instance disposed");
    }
}

/// Adapter connected and catalog fetched, not yet published.
struct Prepared {
    config: UpstreamConfig,
    adapter: Arc<dyn TransportAdapter>,
    tools: Vec<ToolSpec>,
    mapper: NameMapper,
}

/// A resource in the merged listing.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResource {
    /// Owning upstream.
    pub upstream: String,
    /// Its namespace.
    pub namespace: String,
    /// The listed resource; `name` is mapped, `uri` kept.
    #[serde(flatten)]
    pub item: ResourceItem,
}

/// A prompt in the merged listing.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPrompt {
    /// Owning upstream.
    pub upstream: String,
    /// Its namespace.
    pub namespace: String,
    /// Name as known to the upstream.
    #[serde(skip)]
    pub original_name: String,
    /// The listed prompt with its published name.
    #[serde(flatten)]
    pub item: PromptItem,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of upstream connections.
pub struct UpstreamRegistry {
    me: Weak<Self>,
    config: ConfigHandle,
    factory: Arc<dyn AdapterFactory>,
    instances: RwLock<BTreeMap<String, Arc<UpstreamInstance>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    supervisor: ReconnectSupervisor,
    status: UpstreamStatusStore,
    resource_index: RwLock<HashMap<String, String>>,
    prompt_index: RwLock<HashMap<String, (String, String)>>,
    refresh: Mutex<Option<Ticker>>,
    config_task: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for UpstreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamRegistry")
            .field("instances", &self.instances.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl UpstreamRegistry {
    /// Create an empty registry. Nothing connects until
    /// [`init_upstreams`](Self::init_upstreams).
    pub fn new(config: ConfigHandle, factory: Arc<dyn AdapterFactory>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            factory,
            instances: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
            supervisor: ReconnectSupervisor::new(),
            status: UpstreamStatusStore::new(),
            resource_index: RwLock::new(HashMap::new()),
            prompt_index: RwLock::new(HashMap::new()),
            refresh: Mutex::new(None),
            config_task: Mutex::new(None),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    /// The config handle this registry follows.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Status sink shared with tool handlers.
    pub fn status_store(&self) -> &UpstreamStatusStore {
        &self.status
    }

    /// Reconnect supervisor.
    pub fn supervisor(&self) -> &ReconnectSupervisor {
        &self.supervisor
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(name.to_owned()).or_default())
    }

    fn instance(&self, name: &str) -> Option<Arc<UpstreamInstance>> {
        self.instances.read().get(name).cloned()
    }

    fn instances_by_generation(&self) -> Vec<Arc<UpstreamInstance>> {
        let mut all: Vec<_> = self.instances.read().values().cloned().collect();
        all.sort_by_key(|i| i.generation);
        all
    }

    /// Names of connected upstreams.
    pub fn connected_names(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }

    /// Number of connected upstreams.
    pub fn connected_count(&self) -> usize {
        self.instances.read().len()
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Connect every enabled upstream.
    ///
    /// Connections are opened concurrently, then published one by one in
    /// config order so conflict resolution does not depend on which
    /// upstream answered first. A failed upstream is handed to the
    /// supervisor and never blocks the others.
    pub async fn init_upstreams(&self) {
        let config = self.config.current();
        for upstream in &config.upstreams {
            self.status.register(&upstream.name, upstream.transport.kind());
        }

        let enabled: Vec<UpstreamConfig> = config.enabled_upstreams().cloned().collect();
        info!(count = enabled.len(), "connecting upstreams");
        let outcomes = join_all(enabled.iter().map(|u| self.prepare(u))).await;

        for (upstream, outcome) in enabled.iter().zip(outcomes) {
            let lock = self.lock_for(&upstream.name);
            let _guard = lock.lock().await;
            match outcome {
                Ok(prepared) => self.install(prepared),
                Err(e) => self.handle_connect_failure(upstream, &e),
            }
        }

        self.apply_refresh_interval(config.registry.refresh_interval_ms);
        info!(connected = self.connected_count(), "upstream initialization complete");
    }

    async fn prepare(&self, upstream: &UpstreamConfig) -> Result<Prepared> {
        let connect_timeout = upstream.limits.connect_timeout();
        let adapter = tokio::time::timeout(connect_timeout, self.factory.connect(upstream))
            .await
            .map_err(|_| UpstreamError::timeout("connect", connect_timeout))??;

        let items = if upstream.capabilities.bridge_tools {
            match tokio::time::timeout(connect_timeout, adapter.list_tools()).await {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    adapter.close().await;
                    return Err(e);
                }
                Err(_) => {
                    adapter.close().await;
                    return Err(UpstreamError::timeout("tools/list", connect_timeout));
                }
            }
        } else {
            Vec::new()
        };

        let mapper = NameMapper::new(upstream.namespace(), &upstream.mapping);
        let permits = upstream
            .limits
            .max_concurrent_calls
            .map(|n| Arc::new(Semaphore::new(n)));
        let ctx = ToolBuildContext {
            upstream: &upstream.name,
            mapper: &mapper,
            adapter: &adapter,
            permits,
            call_timeout: upstream.limits.call_timeout(),
            status: &self.status,
        };
        let tools = build_tool_specs(&ctx, items);

        Ok(Prepared {
            config: upstream.clone(),
            adapter,
            tools,
            mapper,
        })
    }

    /// Publish a prepared instance. Caller holds the per-name lock.
    fn install(&self, prepared: Prepared) {
        let Prepared {
            config,
            adapter,
            mut tools,
            mapper,
        } = prepared;
        let name = config.name.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (instance, replaced) = {
            let mut instances = self.instances.write();
            let taken: HashSet<&str> = instances
                .values()
                .filter(|i| i.name != name)
                .flat_map(|i| i.tools.iter().map(|t| t.name.as_str()))
                .collect();

            let mut seen = HashSet::new();
            tools.retain(|tool| {
                if !seen.insert(tool.name.clone()) {
                    warn!(upstream = %name, tool = %tool.name, "duplicate tool name within upstream, keeping first");
                    return false;
                }
                if taken.contains(tool.name.as_str()) {
                    match config.mapping.conflict_policy {
                        ConflictPolicy::Error => {
                            error!(upstream = %name, tool = %tool.name, "tool name conflict, not registering");
                            return false;
                        }
                        ConflictPolicy::LastWins => {
                            warn!(upstream = %name, tool = %tool.name, "tool name conflict, overriding earlier registration");
                        }
                    }
                }
                true
            });

            let instance = Arc::new(UpstreamInstance {
                name: name.clone(),
                namespace: config.namespace().to_owned(),
                transport: config.transport.kind(),
                adapter: Arc::clone(&adapter),
                tools,
                capabilities: config.capabilities.clone(),
                mapper,
                connected_at: Utc::now(),
                generation,
                call_timeout: config.limits.call_timeout(),
                health: Mutex::new(None),
                watch: self.shutdown.child_token(),
            });
            let replaced = instances.insert(name.clone(), Arc::clone(&instance));
            (instance, replaced)
        };

        if let Some(old) = replaced {
            // Only reachable if a caller skipped the per-name lock.
            warn!(upstream = %name, "replacing an instance that was not disposed");
            drop(tokio::spawn(async move { old.dispose().await }));
        }

        self.status
            .mark_connected(&name, instance.transport, instance.tools.len());
        self.supervisor.mark_connected(&name);
        self.start_health(&config, &instance);
        self.watch_disconnect(&instance);
        info!(
            upstream = %name,
            transport = instance.transport,
            tools = instance.tools.len(),
            generation,
            "upstream connected"
        );
    }

    fn start_health(&self, config: &UpstreamConfig, instance: &Arc<UpstreamInstance>) {
        if !config.reconnect.enabled || config.reconnect.heartbeat_ms == 0 {
            return;
        }
        let settings = self.config.current().registry.clone();
        let check = HealthCheck {
            upstream: instance.name.clone(),
            adapter: Arc::clone(&instance.adapter),
            interval: std::time::Duration::from_millis(config.reconnect.heartbeat_ms),
            probe_timeout: settings.health_probe_timeout(),
            threshold: settings.unhealthy_threshold,
            status: self.status.clone(),
        };
        let weak = self.me.clone();
        let name = instance.name.clone();
        let generation = instance.generation;
        let ticker = start_health_probe(check, &instance.watch, move || {
            if let Some(registry) = weak.upgrade() {
                let name = name.clone();
                drop(tokio::spawn(async move {
                    registry
                        .handle_unhealthy(&name, generation, "health probe failed".into())
                        .await;
                }));
            }
        });
        *instance.health.lock() = Some(ticker);
    }

    fn watch_disconnect(&self, instance: &Arc<UpstreamInstance>) {
        let Some(disconnected) = instance.adapter.disconnected() else {
            return;
        };
        let watch = instance.watch.clone();
        let weak = self.me.clone();
        let name = instance.name.clone();
        let generation = instance.generation;
        drop(tokio::spawn(async move {
            tokio::select! {
                biased;
                () = watch.cancelled() => {}
                () = disconnected.cancelled() => {
                    if let Some(registry) = weak.upgrade() {
                        registry
                            .handle_unhealthy(&name, generation, "connection closed".into())
                            .await;
                    }
                }
            }
        }));
    }

    fn handle_connect_failure(&self, upstream: &UpstreamConfig, e: &UpstreamError) {
        error!(upstream = %upstream.name, error = %e, "upstream connect failed");
        self.status.mark_disconnected(&upstream.name, Some(e.to_string()));
        let _ = self.schedule_reconnect(upstream);
    }

    /// Hand `upstream` to the supervisor. `false` when reconnects are off or
    /// the supervisor refused (retry already pending or budget exhausted).
    fn schedule_reconnect(&self, upstream: &UpstreamConfig) -> bool {
        if !upstream.enabled || !upstream.reconnect.enabled || self.shutdown.is_cancelled() {
            return false;
        }
        let Some(me) = self.me.upgrade() else { return false };
        let reconnector: Arc<dyn Reconnector> = me;
        let scheduled = self
            .supervisor
            .schedule(&upstream.name, upstream.reconnect.clone(), reconnector);
        if !scheduled {
            let state = self.supervisor.stats(&upstream.name).map(|s| s.state);
            debug!(upstream = %upstream.name, state = ?state, "reconnect not scheduled");
        }
        scheduled
    }

    /// Tear down an instance reported unhealthy, unless it has already been
    /// replaced, and hand the name to the supervisor.
    pub async fn handle_unhealthy(&self, name: &str, generation: u64, reason: String) {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let instance = {
            let mut instances = self.instances.write();
            if instances.get(name).map(|i| i.generation) != Some(generation) {
                debug!(upstream = %name, generation, "stale unhealthy report ignored");
                return;
            }
            instances.remove(name)
        };
        let Some(instance) = instance else { return };

        warn!(upstream = %name, reason = %reason, "upstream marked disconnected");
        instance.dispose().await;
        self.forget_indexes(name);
        self.status.mark_disconnected(name, Some(reason));
        if let Some(upstream) = self.config.upstream(name) {
            let _ = self.schedule_reconnect(&upstream);
        }
    }

    /// Dispose the current instance of `name` (if any), re-resolve its
    /// config, connect and republish. Serialized per name, so overlapping
    /// calls never leave two live adapters.
    pub async fn reconnect_upstream(&self, name: &str) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(UpstreamError::Closed);
        }

        let old = self.instances.write().remove(name);
        if let Some(old) = old {
            old.dispose().await;
            self.forget_indexes(name);
        }

        let Some(upstream) = self.config.upstream(name).filter(|u| u.enabled) else {
            self.status.mark_disconnected(name, None);
            return Err(UpstreamError::UnknownUpstream(name.to_owned()));
        };

        match self.prepare(&upstream).await {
            Ok(prepared) => {
                let still_wanted = self.config.upstream(name).is_some_and(|u| u == upstream);
                if self.shutdown.is_cancelled() || !still_wanted {
                    prepared.adapter.close().await;
                    debug!(upstream = %name, "config changed while connecting, discarding");
                    return Err(UpstreamError::Closed);
                }
                self.install(prepared);
                self.status.record_reconnect(name);
                Ok(())
            }
            Err(e) => {
                warn!(upstream = %name, error = %e, "reconnect failed");
                self.status.mark_disconnected(name, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Operator-triggered reconnect. Clears an `Exhausted` supervisor state;
    /// on failure the supervisor takes over again.
    pub async fn manual_reconnect(&self, name: &str) -> Result<()> {
        let Some(upstream) = self.config.upstream(name) else {
            return Err(UpstreamError::UnknownUpstream(name.to_owned()));
        };
        self.supervisor.cancel(name);
        match self.reconnect_upstream(name).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.schedule_reconnect(&upstream);
                Err(e)
            }
        }
    }

    /// Re-run [`reconnect_upstream`](Self::reconnect_upstream) for every
    /// enabled upstream not currently in the supervisor's hands.
    pub async fn refresh_all(&self) {
        let config = self.config.current();
        for upstream in config.enabled_upstreams() {
            let busy = self.supervisor.stats(&upstream.name).is_some_and(|s| {
                matches!(
                    s.state,
                    ReconnectState::Scheduled | ReconnectState::Attempting | ReconnectState::Exhausted
                )
            });
            if busy {
                continue;
            }
            if let Err(e) = self.reconnect_upstream(&upstream.name).await {
                self.handle_connect_failure(upstream, &e);
            }
        }
    }

    /// (Re)schedule the periodic refresh; `0` disables it.
    pub fn apply_refresh_interval(&self, interval_ms: u64) {
        let mut refresh = self.refresh.lock();
        let period = std::time::Duration::from_millis(interval_ms);
        if let Some(current) = refresh.as_ref() {
            if interval_ms > 0 && current.period() == period && !current.is_stopped() {
                return;
            }
            current.stop();
        }
        *refresh = None;
        if interval_ms == 0 {
            return;
        }

        let weak = self.me.clone();
        *refresh = Some(Ticker::spawn_with_parent(
            "registry-refresh",
            period,
            &self.shutdown,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(registry) = weak.upgrade() else {
                        return TickFlow::Stop;
                    };
                    debug!("refreshing upstream catalogs");
                    registry.refresh_all().await;
                    TickFlow::Continue
                }
            },
        ));
        info!(interval_ms, "catalog refresh scheduled");
    }

    /// Interval of the running refresh ticker, if any.
    pub fn refresh_interval(&self) -> Option<std::time::Duration> {
        self.refresh
            .lock()
            .as_ref()
            .filter(|t| !t.is_stopped())
            .map(Ticker::period)
    }

    /// React to a config replacement: removed or disabled upstreams are
    /// cancelled and disposed; added or changed ones are reset in the
    /// supervisor and reconnected; the refresh timer follows the interval.
    pub async fn apply_config(&self, previous: &GatewayConfig, next: &GatewayConfig) {
        let before: HashMap<&str, &UpstreamConfig> =
            previous.enabled_upstreams().map(|u| (u.name.as_str(), u)).collect();
        let after: HashMap<&str, &UpstreamConfig> =
            next.enabled_upstreams().map(|u| (u.name.as_str(), u)).collect();

        for name in before.keys().filter(|n| !after.contains_key(*n)) {
            info!(upstream = %name, "upstream removed or disabled");
            self.supervisor.cancel(name);
            self.remove_instance(name).await;
            if next.upstream(name).is_none() {
                self.status.remove(name);
            }
        }

        for upstream in &next.upstreams {
            self.status.register(&upstream.name, upstream.transport.kind());
        }

        for upstream in next.enabled_upstreams() {
            if before.get(upstream.name.as_str()) == Some(&upstream) {
                continue;
            }
            info!(upstream = %upstream.name, "upstream added or changed");
            self.supervisor.cancel(&upstream.name);
            if let Err(e) = self.reconnect_upstream(&upstream.name).await {
                self.handle_connect_failure(upstream, &e);
            }
        }

        if previous.registry.refresh_interval_ms != next.registry.refresh_interval_ms {
            self.apply_refresh_interval(next.registry.refresh_interval_ms);
        }
    }

    /// Follow config replacements until shutdown.
    pub fn watch_config(&self) {
        let Some(registry) = self.me.upgrade() else { return };
        let mut rx = self.config.subscribe();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut previous = rx.borrow_and_update().clone();
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let next = rx.borrow_and_update().clone();
                registry.apply_config(&previous, &next).await;
                previous = next;
            }
        });
        if let Some(old) = self.config_task.lock().replace(handle) {
            old.abort();
        }
    }

    async fn remove_instance(&self, name: &str) {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        let instance = self.instances.write().remove(name);
        if let Some(instance) = instance {
            instance.dispose().await;
            self.forget_indexes(name);
            self.status.mark_disconnected(name, None);
        }
    }

    fn forget_indexes(&self, name: &str) {
        self.resource_index.write().retain(|_, owner| owner != name);
        self.prompt_index.write().retain(|_, (owner, _)| owner != name);
    }

    /// Dispose every instance and stop all timers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(ticker) = self.refresh.lock().take() {
            ticker.stop();
        }
        if let Some(task) = self.config_task.lock().take() {
            task.abort();
        }
        self.supervisor.shutdown();
        let drained: Vec<_> = std::mem::take(&mut *self.instances.write()).into_values().collect();
        for instance in drained {
            instance.dispose().await;
            self.status.mark_disconnected(&instance.name, None);
        }
        info!("upstream registry shut down");
    }

    // ── Aggregation ────────────────────────────────────────────────────────

    /// Merged tool catalog. Under `last-wins` the most recently installed
    /// upstream owns a contested name.
    pub fn get_aggregated_tools(&self) -> Vec<ToolSpec> {
        let mut merged: Vec<ToolSpec> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for instance in self.instances_by_generation() {
            for tool in &instance.tools {
                match index.get(&tool.name) {
                    Some(&at) => merged[at] = tool.clone(),
                    None => {
                        let _ = index.insert(tool.name.clone(), merged.len());
                        merged.push(tool.clone());
                    }
                }
            }
        }
        merged
    }

    /// Public descriptors of the merged catalog.
    pub fn get_all_tools(&self) -> Vec<switchyard_core::catalog::ToolDescriptor> {
        self.get_aggregated_tools().iter().map(ToolSpec::descriptor).collect()
    }

    /// One tool by published name.
    pub fn tool(&self, name: &str) -> Option<ToolSpec> {
        self.get_aggregated_tools().into_iter().find(|t| t.name == name)
    }

    /// Call a tool by published name. Validation and upstream failures are
    /// reported inside the result.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolCallResult> {
        let tool = self
            .tool(name)
            .ok_or_else(|| UpstreamError::UnknownTool(name.to_owned()))?;
        Ok(tool.call(arguments).await)
    }

    /// Merged resource listing. Each upstream is asked concurrently under
    /// the aggregation timeout; failures are logged and skipped.
    pub async fn get_aggregated_resources(&self) -> Vec<UpstreamResource> {
        let timeout = self.config.current().registry.aggregation_timeout();
        let instances: Vec<_> = self
            .instances_by_generation()
            .into_iter()
            .filter(|i| i.capabilities.bridge_resources)
            .collect();

        let results = join_all(instances.iter().map(|instance| async move {
            tokio::time::timeout(timeout, instance.adapter.list_resources()).await
        }))
        .await;

        let mut merged = Vec::new();
        for (instance, outcome) in instances.iter().zip(results) {
            let Some(items) = aggregation_outcome(&instance.name, "resources/list", timeout, outcome) else {
                continue;
            };
            self.status.set_resource_count(&instance.name, items.len());
            {
                let mut index = self.resource_index.write();
                index.retain(|_, owner| owner != &instance.name);
                for item in &items {
                    let _ = index.insert(item.uri.clone(), instance.name.clone());
                }
            }
            merged.extend(items.into_iter().map(|mut item| {
                item.name = Some(instance.mapper.resource(item.name.as_deref().unwrap_or(&item.uri)));
                UpstreamResource {
                    upstream: instance.name.clone(),
                    namespace: instance.namespace.clone(),
                    item,
                }
            }));
        }
        merged
    }

    /// Merged prompt listing, same failure rules as resources.
    pub async fn get_aggregated_prompts(&self) -> Vec<UpstreamPrompt> {
        let timeout = self.config.current().registry.aggregation_timeout();
        let instances: Vec<_> = self
            .instances_by_generation()
            .into_iter()
            .filter(|i| i.capabilities.bridge_prompts)
            .collect();

        let results = join_all(instances.iter().map(|instance| async move {
            tokio::time::timeout(timeout, instance.adapter.list_prompts()).await
        }))
        .await;

        let mut merged = Vec::new();
        for (instance, outcome) in instances.iter().zip(results) {
            let Some(items) = aggregation_outcome(&instance.name, "prompts/list", timeout, outcome) else {
                continue;
            };
            self.status.set_prompt_count(&instance.name, items.len());
            let prompts: Vec<UpstreamPrompt> = items
                .into_iter()
                .map(|mut item| {
                    let original_name = std::mem::take(&mut item.name);
                    item.name = instance.mapper.prompt(&original_name);
                    UpstreamPrompt {
                        upstream: instance.name.clone(),
                        namespace: instance.namespace.clone(),
                        original_name,
                        item,
                    }
                })
                .collect();
            {
                let mut index = self.prompt_index.write();
                index.retain(|_, (owner, _)| owner != &instance.name);
                for prompt in &prompts {
                    let _ = index.insert(
                        prompt.item.name.clone(),
                        (instance.name.clone(), prompt.original_name.clone()),
                    );
                }
            }
            merged.extend(prompts);
        }
        merged
    }

    /// Read a resource from a named upstream.
    pub async fn read_aggregated_resource(&self, upstream: &str, uri: &str) -> Result<Value> {
        let instance = self
            .instance(upstream)
            .ok_or_else(|| UpstreamError::UnknownUpstream(upstream.to_owned()))?;
        tokio::time::timeout(instance.call_timeout, instance.adapter.read_resource(uri))
            .await
            .map_err(|_| UpstreamError::timeout("resources/read", instance.call_timeout))?
    }

    /// Render a prompt on a named upstream. `name` is the upstream's own
    /// prompt name.
    pub async fn get_aggregated_prompt(
        &self,
        upstream: &str,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value> {
        let instance = self
            .instance(upstream)
            .ok_or_else(|| UpstreamError::UnknownUpstream(upstream.to_owned()))?;
        tokio::time::timeout(instance.call_timeout, instance.adapter.get_prompt(name, arguments))
            .await
            .map_err(|_| UpstreamError::timeout("prompts/get", instance.call_timeout))?
    }

    /// Upstream owning `uri`, from the last aggregation (refreshed once on
    /// a miss).
    pub async fn resolve_resource(&self, uri: &str) -> Option<String> {
        if let Some(owner) = self.resource_index.read().get(uri).cloned() {
            return Some(owner);
        }
        let _ = self.get_aggregated_resources().await;
        self.resource_index.read().get(uri).cloned()
    }

    /// `(upstream, original name)` of a published prompt name, refreshed
    /// once on a miss.
    pub async fn resolve_prompt(&self, name: &str) -> Option<(String, String)> {
        if let Some(found) = self.prompt_index.read().get(name).cloned() {
            return Some(found);
        }
        let _ = self.get_aggregated_prompts().await;
        self.prompt_index.read().get(name).cloned()
    }

    /// Status of every configured upstream, with supervisor state merged in.
    pub fn status(&self) -> Vec<UpstreamStatus> {
        let mut all = self.status.snapshot();
        let stats = self.supervisor.all_stats();
        for status in &mut all {
            status.supervisor = stats.get(&status.name).cloned();
        }
        all
    }
}

/// Unwrap one upstream's listing result, logging the skip reasons.
fn aggregation_outcome<T>(
    upstream: &str,
    operation: &str,
    timeout: std::time::Duration,
    outcome: std::result::Result<Result<Vec<T>>, tokio::time::error::Elapsed>,
) -> Option<Vec<T>> {
    match outcome {
        Ok(Ok(items)) => Some(items),
        Ok(Err(e)) if e.is_unsupported() => {
            debug!(upstream, operation, "capability not supported, skipping");
            None
        }
        Ok(Err(e)) => {
            warn!(upstream, operation, error = %e, "listing failed, skipping upstream");
            None
        }
        Err(_) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(upstream, operation, timeout_ms, "listing timed out, skipping upstream");
            None
        }
    }
}

#[async_trait]
impl Reconnector for UpstreamRegistry {
    async fn reconnect(&self, name: &str) -> bool {
        self.reconnect_upstream(name).await.is_ok()
    }
}
