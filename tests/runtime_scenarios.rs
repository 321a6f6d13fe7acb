//! End-to-end runtime scenarios: spec resources flowing through
//! controllers, teardown via finalizers, and convergence under churn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use steward_core::bus::WatchSelector;
use steward_core::resource::{Resource, ResourceId, ResourceKind, Typed};
use steward_core::runtime::{Controller, ControllerContext, ControllerHealth, HealthCondition, Runtime};
use steward_core::state::Writer;
use steward_core::types::{
    BackoffConfig, Config, ControllerName, Error, Namespace, ResourceType, SchedulerConfig,
    TeardownConfig,
};
use steward_core::util::poll;
use steward_core::{EventKind, Result, WatchItem};

fn fast_config() -> Config {
    Config {
        scheduler: SchedulerConfig {
            reconcile_timeout: Duration::from_secs(5),
            watchdog_interval: Some(Duration::from_millis(200)),
            shutdown_grace: Duration::from_secs(1),
        },
        backoff: BackoffConfig {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(50),
            factor: 2.0,
            jitter: 0.1,
        },
        teardown: TeardownConfig {
            scan_interval: Duration::from_millis(25),
            stuck_threshold: Duration::from_millis(50),
        },
        ..Default::default()
    }
}

async fn eventually<F, Fut>(what: &str, check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<()>>>,
{
    poll::until(Duration::from_secs(10), Duration::from_millis(10), check)
        .await
        .unwrap_or_else(|err| panic!("{} did not happen: {}", what, err));
}

// =============================================================================
// File render scenario
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EtcFileSpecPayload {
    contents: String,
    mode: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EtcFileStatusPayload {
    spec_version: u64,
    path: String,
}

struct EtcFile;
impl ResourceKind for EtcFile {
    type Spec = EtcFileSpecPayload;
    type Status = serde_json::Value;
    const TYPE: &'static str = "EtcFileSpec";
    const DEFAULT_NAMESPACE: &'static str = "files";
}

struct EtcFileStatus;
impl ResourceKind for EtcFileStatus {
    type Spec = EtcFileStatusPayload;
    type Status = serde_json::Value;
    const TYPE: &'static str = "EtcFileStatus";
    const DEFAULT_NAMESPACE: &'static str = "files";
}

/// Renders EtcFileSpec resources into real files under a directory and
/// records success in EtcFileStatus resources it owns. Holds a finalizer
/// on every spec until the on-disk artifact is removed.
struct FileWriterController {
    dir: PathBuf,
}

#[async_trait]
impl Controller for FileWriterController {
    fn name(&self) -> ControllerName {
        ControllerName::from("files.writer")
    }

    fn inputs(&self) -> Vec<WatchSelector> {
        vec![WatchSelector::kind("files", EtcFile::TYPE)]
    }

    fn outputs(&self) -> Vec<ResourceType> {
        vec![ResourceType::from(EtcFileStatus::TYPE)]
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<()> {
        let namespace = Namespace::from("files");
        let specs = ctx
            .list(&namespace, &EtcFile::resource_type(), &Default::default())
            .await;

        for resource in specs.items {
            let typed = Typed::<EtcFile>::from_resource(resource)?;
            let name = typed.id().name.as_str().to_string();
            let status_id = ResourceId::new("files", EtcFileStatus::TYPE, name.as_str());
            let path = self.dir.join(&name);

            if typed.metadata().is_tearing_down() {
                if typed.metadata().finalizers.contains(&ctx.finalizer()) {
                    if path.exists() {
                        std::fs::remove_file(&path)?;
                    }
                    if ctx.get(&status_id).await.is_some() {
                        ctx.mark_for_destroy(&status_id).await?;
                    }
                    ctx.remove_finalizer(typed.id()).await?;
                }
                continue;
            }

            // Finalizer first: the artifact must never outlive our chance
            // to clean it up.
            ctx.add_finalizer(typed.id()).await?;

            let spec = typed.spec()?;
            std::fs::write(&path, spec.contents.as_bytes())?;

            let status = EtcFileStatusPayload {
                spec_version: typed.metadata().version,
                path: path.display().to_string(),
            };
            match ctx.get(&status_id).await {
                None => {
                    let output = Typed::<EtcFileStatus>::new(name.as_str(), status)?;
                    ctx.create(output.into_inner()).await?;
                }
                Some(existing) => {
                    let desired = serde_json::to_value(&status)?;
                    if existing.spec != desired {
                        ctx.update(&status_id, existing.metadata.version, |r| {
                            r.spec = desired.clone();
                            Ok(())
                        })
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn file_render_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(fast_config());
    runtime.register_kind::<EtcFile>().unwrap();
    runtime.register_kind::<EtcFileStatus>().unwrap();
    runtime
        .register_controller(Arc::new(FileWriterController {
            dir: dir.path().to_path_buf(),
        }))
        .await
        .unwrap();
    runtime.start().await.unwrap();

    let store = runtime.store();
    let spec = Typed::<EtcFile>::new(
        "hosts",
        EtcFileSpecPayload {
            contents: "127.0.0.1 localhost".to_string(),
            mode: 0o644,
        },
    )
    .unwrap();
    let spec_id = spec.id().clone();
    store
        .create(spec.into_inner(), &Writer::Anonymous)
        .await
        .unwrap();

    // The controller renders the file and records success.
    let rendered = dir.path().join("hosts");
    let status_id = ResourceId::new("files", EtcFileStatus::TYPE, "hosts");
    eventually("file rendered with status", || {
        let store = store.clone();
        let rendered = rendered.clone();
        let status_id = status_id.clone();
        async move {
            let on_disk = std::fs::read_to_string(&rendered).ok();
            let status = store.get(&status_id).await;
            Ok((on_disk.as_deref() == Some("127.0.0.1 localhost") && status.is_some())
                .then_some(()))
        }
    })
    .await;

    // The finalizer is held while the artifact exists.
    let current = store.get(&spec_id).await.unwrap();
    assert!(!current.metadata.finalizers.is_empty());

    // Deleting the spec tears it down; the controller removes the artifact,
    // releases its finalizer, and the spec is physically destroyed.
    store
        .mark_for_destroy(&spec_id, &Writer::Anonymous)
        .await
        .unwrap();

    eventually("spec destroyed after teardown", || {
        let store = store.clone();
        let spec_id = spec_id.clone();
        async move { Ok(store.get(&spec_id).await.is_none().then_some(())) }
    })
    .await;

    assert!(!rendered.exists());
    assert!(store.get(&status_id).await.is_none());

    runtime.shutdown().await;
}

// =============================================================================
// Endpoint update scenario
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClusterEndpointSpec {
    url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClusterEndpointStatus {
    ready: bool,
}

struct ClusterEndpoint;
impl ResourceKind for ClusterEndpoint {
    type Spec = ClusterEndpointSpec;
    type Status = ClusterEndpointStatus;
    const TYPE: &'static str = "ClusterEndpoint";
    const DEFAULT_NAMESPACE: &'static str = "cluster";
}

/// Observes cluster endpoints and reports readiness in their status.
/// The probe here is a stand-in: the reserved port marks an endpoint
/// unreachable.
struct EndpointMonitorController;

#[async_trait]
impl Controller for EndpointMonitorController {
    fn name(&self) -> ControllerName {
        ControllerName::from("cluster.endpoint-monitor")
    }

    fn inputs(&self) -> Vec<WatchSelector> {
        vec![WatchSelector::kind("cluster", ClusterEndpoint::TYPE)]
    }

    fn outputs(&self) -> Vec<ResourceType> {
        Vec::new()
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<()> {
        let namespace = Namespace::from("cluster");
        let endpoints = ctx
            .list(&namespace, &ClusterEndpoint::resource_type(), &Default::default())
            .await;

        for resource in endpoints.items {
            if resource.metadata.is_tearing_down() {
                continue;
            }
            let typed = Typed::<ClusterEndpoint>::from_resource(resource)?;
            let ready = !typed.spec()?.url.ends_with(":40443");

            if typed.status()?.map(|s| s.ready) != Some(ready) {
                let version = typed.metadata().version;
                let id = typed.id().clone();
                ctx.update(&id, version, |r| {
                    r.status = Some(serde_json::json!({ "ready": ready }));
                    Ok(())
                })
                .await?;
            }
        }
        Ok(())
    }
}

async fn readiness(store: &Arc<steward_core::Store>, id: &ResourceId) -> Option<bool> {
    let resource = store.get(id).await?;
    let typed = Typed::<ClusterEndpoint>::from_resource(resource).ok()?;
    typed.status().ok()?.map(|s| s.ready)
}

#[tokio::test]
async fn endpoint_update_with_stale_retry() {
    let runtime = Runtime::new(fast_config());
    runtime.register_kind::<ClusterEndpoint>().unwrap();

    let store = runtime.store();
    store
        .set_status_writer(
            ResourceType::from(ClusterEndpoint::TYPE),
            ControllerName::from("cluster.endpoint-monitor"),
        )
        .await;

    runtime
        .register_controller(Arc::new(EndpointMonitorController))
        .await
        .unwrap();
    runtime.start().await.unwrap();

    let endpoint = Typed::<ClusterEndpoint>::new(
        "control-plane",
        ClusterEndpointSpec {
            url: "https://10.5.0.2:6443".to_string(),
        },
    )
    .unwrap();
    let id = endpoint.id().clone();
    store
        .create(endpoint.into_inner(), &Writer::Anonymous)
        .await
        .unwrap();

    eventually("endpoint ready", || {
        let store = store.clone();
        let id = id.clone();
        async move { Ok((readiness(&store, &id).await == Some(true)).then_some(())) }
    })
    .await;

    // Point the endpoint at an unreachable URL, with the right version.
    let current = store.get(&id).await.unwrap();
    let old_url = Typed::<ClusterEndpoint>::from_resource(current.clone())
        .unwrap()
        .spec()
        .unwrap()
        .url;
    let stale_version = current.metadata.version;

    let updated = store
        .update(&id, stale_version, &Writer::Anonymous, |r| {
            r.spec = serde_json::json!({"url": "https://127.0.0.1:40443"});
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(updated.metadata.version, stale_version + 1);

    // A caller retrying with the old version must re-read first.
    let conflict = store
        .update(&id, stale_version, &Writer::Anonymous, |r| {
            r.spec = serde_json::json!({"url": "https://127.0.0.1:50443"});
            Ok(())
        })
        .await;
    assert!(matches!(conflict, Err(Error::VersionConflict(_))));

    eventually("endpoint reported not ready", || {
        let store = store.clone();
        let id = id.clone();
        async move { Ok((readiness(&store, &id).await == Some(false)).then_some(())) }
    })
    .await;

    // Revert after a fresh read; readiness converges back.
    let current = store.get(&id).await.unwrap();
    store
        .update(&id, current.metadata.version, &Writer::Anonymous, |r| {
            r.spec = serde_json::json!({ "url": old_url });
            Ok(())
        })
        .await
        .unwrap();

    eventually("endpoint ready again", || {
        let store = store.clone();
        let id = id.clone();
        async move { Ok((readiness(&store, &id).await == Some(true)).then_some(())) }
    })
    .await;

    runtime.shutdown().await;
}

// =============================================================================
// Coalescing under burst writes
// =============================================================================

struct BurstInput;
impl ResourceKind for BurstInput {
    type Spec = serde_json::Value;
    type Status = serde_json::Value;
    const TYPE: &'static str = "BurstInput";
    const DEFAULT_NAMESPACE: &'static str = "test";
}

/// Counts reconciliations; the first run blocks until released so a burst
/// of input events lands while a run is in flight.
struct BurstController {
    runs: Arc<AtomicU32>,
    release: Arc<Notify>,
}

#[async_trait]
impl Controller for BurstController {
    fn name(&self) -> ControllerName {
        ControllerName::from("test.burst")
    }

    fn inputs(&self) -> Vec<WatchSelector> {
        vec![WatchSelector::kind("test", BurstInput::TYPE)]
    }

    fn outputs(&self) -> Vec<ResourceType> {
        Vec::new()
    }

    async fn reconcile(&self, _ctx: &ControllerContext) -> Result<()> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if run == 0 {
            self.release.notified().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn burst_of_events_coalesces_into_one_queued_run() {
    let mut config = fast_config();
    // No watchdog: only event-driven runs count.
    config.scheduler.watchdog_interval = None;

    let runs = Arc::new(AtomicU32::new(0));
    let release = Arc::new(Notify::new());

    let runtime = Runtime::new(config);
    runtime
        .register_controller(Arc::new(BurstController {
            runs: runs.clone(),
            release: release.clone(),
        }))
        .await
        .unwrap();
    runtime.start().await.unwrap();

    // Wait for the first (blocked) run to start.
    let runs_probe = runs.clone();
    eventually("first run in flight", move || {
        let runs = runs_probe.clone();
        async move { Ok((runs.load(Ordering::SeqCst) == 1).then_some(())) }
    })
    .await;

    // Burst: 10 mutations while the run is in flight.
    let store = runtime.store();
    let id = ResourceId::new("test", BurstInput::TYPE, "burst");
    let mut version = store
        .create(
            Resource::new(id.clone(), serde_json::json!({"n": 0})),
            &Writer::Anonymous,
        )
        .await
        .unwrap()
        .metadata
        .version;
    for n in 1..10 {
        version = store
            .update(&id, version, &Writer::Anonymous, |r| {
                r.spec = serde_json::json!({ "n": n });
                Ok(())
            })
            .await
            .unwrap()
            .metadata
            .version;
    }

    release.notify_one();

    // The burst collapses into a single follow-up run.
    let runs_probe = runs.clone();
    eventually("queued run executed", move || {
        let runs = runs_probe.clone();
        async move { Ok((runs.load(Ordering::SeqCst) >= 2).then_some(())) }
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let total = runs.load(Ordering::SeqCst);
    assert!(total <= 3, "expected coalesced runs, saw {}", total);

    runtime.shutdown().await;
}

// =============================================================================
// Stuck teardown surfacing
// =============================================================================

struct StickyThing;
impl ResourceKind for StickyThing {
    type Spec = serde_json::Value;
    type Status = serde_json::Value;
    const TYPE: &'static str = "StickyThing";
    const DEFAULT_NAMESPACE: &'static str = "test";
}

/// Attaches its finalizer and never releases it.
struct StickyController;

#[async_trait]
impl Controller for StickyController {
    fn name(&self) -> ControllerName {
        ControllerName::from("test.sticky")
    }

    fn inputs(&self) -> Vec<WatchSelector> {
        vec![WatchSelector::kind("test", StickyThing::TYPE)]
    }

    fn outputs(&self) -> Vec<ResourceType> {
        Vec::new()
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<()> {
        let namespace = Namespace::from("test");
        let things = ctx
            .list(&namespace, &StickyThing::resource_type(), &Default::default())
            .await;
        for thing in things.items {
            ctx.add_finalizer(thing.id()).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn stuck_teardown_is_surfaced_as_health_condition() {
    let runtime = Runtime::new(fast_config());
    runtime
        .register_controller(Arc::new(StickyController))
        .await
        .unwrap();
    runtime.start().await.unwrap();

    let store = runtime.store();

    // Watch the health stream; a condition flip is observable even if a
    // later successful run resets it.
    let mut health_watch = store
        .bus()
        .subscribe(
            WatchSelector::kind("runtime", ControllerHealth::TYPE)
                .with_name("test.sticky"),
            None,
        )
        .await
        .unwrap();

    let id = ResourceId::new("test", StickyThing::TYPE, "anchor");
    store
        .create(
            Resource::new(id.clone(), serde_json::json!({})),
            &Writer::Anonymous,
        )
        .await
        .unwrap();

    eventually("finalizer attached", || {
        let store = store.clone();
        let id = id.clone();
        async move {
            Ok(store
                .get(&id)
                .await
                .is_some_and(|r| !r.metadata.finalizers.is_empty())
                .then_some(()))
        }
    })
    .await;

    store.mark_for_destroy(&id, &Writer::Anonymous).await.unwrap();

    // The resource stays tearing down; the monitor flags the holder.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no stuck-teardown condition observed"
        );
        match health_watch.recv().await {
            WatchItem::Event(event) if event.kind != EventKind::Destroyed => {
                let typed = Typed::<ControllerHealth>::from_resource(event.resource).unwrap();
                if let Ok(Some(status)) = typed.status() {
                    if status.condition == HealthCondition::StuckTeardown {
                        break;
                    }
                }
            }
            WatchItem::Event(_) => {}
            other => panic!("health watch ended early: {:?}", other),
        }
    }

    // Still tearing down, still holding the finalizer.
    let lingering = store.get(&id).await.unwrap();
    assert!(lingering.metadata.is_tearing_down());
    assert!(!lingering.metadata.finalizers.is_empty());

    runtime.shutdown().await;
}
