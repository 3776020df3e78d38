//! # Watch Loop
//!
//! One kube-runtime `Controller` per primary kind, each watching the kind
//! itself, the children it owns, and the dependencies its reconcilers
//! track. A controller whose stream ends is restarted until shutdown.

use super::error_policy::{handle_controller_error, handle_reconciliation_error, reset_backoff};
use super::{resource_key, ControllerContext, ControllerKind};
use crate::apis::{Application, ClusterBuilder, Container, Function, Gateway, Image, Processor, PulsarGateway, ScaledObject, Stream};
use crate::config::ControllerConfig;
use crate::constants::BUILDERS_CONFIGMAP;
use crate::controller::build::{application_reconciler, container_reconciler, function_reconciler, ClusterBuilderReconciler};
use crate::controller::client::{Object, ObjectKey};
use crate::controller::error::Error;
use crate::controller::reconciler::{KeyReconciler, ReconcileContext};
use crate::controller::streaming::{processor_reconciler, pulsar_gateway_reconciler};
use crate::controller::tracker::Tracker;
use crate::server::ServerState;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, controller::Action, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Run the selected controllers until a shutdown signal arrives
///
/// Readiness is flipped to false on SIGINT/SIGTERM; each controller drains
/// through `shutdown_on_signal` and its supervisor exits.
pub async fn run_watch_loop(
    client: kube::Client,
    reconcile: ReconcileContext,
    config: ControllerConfig,
    server_state: Arc<ServerState>,
    kinds: &[ControllerKind],
) -> Result<(), anyhow::Error> {
    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let sweeper = spawn_tracker_sweep(reconcile.tracker.clone(), config.tracker_sweep_interval());

    let supervisors = kinds.iter().map(|&kind| {
        let ctx = Arc::new(ControllerContext::new(
            kind,
            reconciler_for(kind),
            reconcile.clone(),
            config.clone(),
        ));
        supervise(client.clone(), ctx, server_state.clone())
    });
    info!(
        "Starting {} controllers: {}",
        kinds.len(),
        kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    );
    futures::future::join_all(supervisors).await;

    sweeper.abort();
    info!("Controllers stopped gracefully");
    Ok(())
}

/// Reconciler run by the controller for `kind`
pub fn reconciler_for(kind: ControllerKind) -> Box<dyn KeyReconciler> {
    match kind {
        ControllerKind::Function => Box::new(function_reconciler()),
        ControllerKind::Application => Box::new(application_reconciler()),
        ControllerKind::Container => Box::new(container_reconciler()),
        ControllerKind::ClusterBuilder => Box::new(ClusterBuilderReconciler::new()),
        ControllerKind::Processor => Box::new(processor_reconciler()),
        ControllerKind::PulsarGateway => Box::new(pulsar_gateway_reconciler()),
    }
}

/// Keep one controller running, restarting its stream when it ends
async fn supervise(client: kube::Client, ctx: Arc<ControllerContext>, server_state: Arc<ServerState>) {
    let kind = ctx.kind;
    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting {} watch loop", kind);
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            resource.kind = kind.as_str(),
            operation = "watch_loop"
        );
        info!("Starting {} controller watch loop...", kind);
        let tracker = ctx.reconcile.tracker.clone();
        let run = match kind {
            ControllerKind::Function => run_controller(
                Controller::new(Api::<Function>::all(client.clone()), watcher::Config::default().any_semantic())
                    .owns(Api::<Image>::all(client.clone()), watcher::Config::default())
                    .watches(
                        Api::<ConfigMap>::all(client.clone()),
                        watcher::Config::default(),
                        tracked::<Function, ConfigMap>(tracker),
                    ),
                ctx.clone(),
            )
            .boxed_local(),
            ControllerKind::Application => run_controller(
                Controller::new(Api::<Application>::all(client.clone()), watcher::Config::default().any_semantic())
                    .owns(Api::<Image>::all(client.clone()), watcher::Config::default())
                    .watches(
                        Api::<ConfigMap>::all(client.clone()),
                        watcher::Config::default(),
                        tracked::<Application, ConfigMap>(tracker),
                    ),
                ctx.clone(),
            )
            .boxed_local(),
            ControllerKind::Container => run_controller(
                Controller::new(Api::<Container>::all(client.clone()), watcher::Config::default().any_semantic())
                    .watches(
                        Api::<ConfigMap>::all(client.clone()),
                        watcher::Config::default(),
                        tracked::<Container, ConfigMap>(tracker),
                    ),
                ctx.clone(),
            )
            .boxed_local(),
            ControllerKind::ClusterBuilder => {
                let namespace = ctx.reconcile.system_namespace.clone();
                // The controller only runs keys it has cached, so the ConfigMap must exist first
                reconcile_key(&ctx, Some(namespace.as_str()), BUILDERS_CONFIGMAP).await;
                let builders = ObjectRef::<ConfigMap>::new(BUILDERS_CONFIGMAP).within(&namespace);
                run_controller(
                    Controller::new(
                        Api::<ConfigMap>::namespaced(client.clone(), &namespace),
                        watcher::Config::default().fields(&format!("metadata.name={BUILDERS_CONFIGMAP}")),
                    )
                    .watches(
                        Api::<ClusterBuilder>::all(client.clone()),
                        watcher::Config::default(),
                        move |_| Some(builders.clone()),
                    ),
                    ctx.clone(),
                )
                .boxed_local()
            }
            ControllerKind::Processor => run_controller(
                Controller::new(Api::<Processor>::all(client.clone()), watcher::Config::default().any_semantic())
                    .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
                    .owns(Api::<ScaledObject>::all(client.clone()), watcher::Config::default())
                    .watches(
                        Api::<ConfigMap>::all(client.clone()),
                        watcher::Config::default(),
                        tracked::<Processor, ConfigMap>(tracker.clone()),
                    )
                    .watches(
                        Api::<Stream>::all(client.clone()),
                        watcher::Config::default(),
                        tracked::<Processor, Stream>(tracker),
                    ),
                ctx.clone(),
            )
            .boxed_local(),
            ControllerKind::PulsarGateway => run_controller(
                Controller::new(Api::<PulsarGateway>::all(client.clone()), watcher::Config::default().any_semantic())
                    .owns(Api::<Gateway>::all(client.clone()), watcher::Config::default())
                    .watches(
                        Api::<ConfigMap>::all(client.clone()),
                        watcher::Config::default(),
                        tracked::<PulsarGateway, ConfigMap>(tracker),
                    ),
                ctx.clone(),
            )
            .boxed_local(),
        };
        run.instrument(watch_span).await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting {} watch loop", kind);
            break;
        }

        let delay = ctx.config.watch_restart_delay_duration();
        warn!("{} controller watch stream ended, restarting in {:?}...", kind, delay);
        tokio::time::sleep(delay).await;
    }
}

/// Drive one controller's stream to completion
async fn run_controller<K: Object>(controller: Controller<K>, ctx: Arc<ControllerContext>) {
    let kind = ctx.kind;
    let backoff_start_ms = ctx.config.backoff_start_ms;
    let backoff_max_ms = ctx.config.backoff_max_ms;
    let restart_delay = ctx.config.watch_restart_delay_duration();
    let concurrency = match kind {
        // Every pass rewrites the same ConfigMap
        ControllerKind::ClusterBuilder => 1,
        _ => ctx.config.max_concurrent_reconciliations,
    };
    let backoff = Arc::new(AtomicU64::new(backoff_start_ms));
    let uncached = ctx.clone();

    controller
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile::<K>, handle_reconciliation_error::<K>, ctx)
        .filter_map(move |result| {
            let backoff = backoff.clone();
            let ctx = uncached.clone();
            async move {
                match result {
                    Ok((reference, action)) => {
                        backoff.store(backoff_start_ms, Ordering::Relaxed);
                        debug!(resource = %reference, action = ?action, "watch.event.reconciled");
                        Some(())
                    }
                    Err(controller::Error::ObjectNotFound(reference)) => {
                        // Missing parents are a no-op, a missing builders ConfigMap is recreated
                        reconcile_key(&ctx, reference.namespace.as_deref(), &reference.name).await;
                        None
                    }
                    Err(e) => {
                        handle_controller_error(kind.as_str(), &e, &backoff, backoff_max_ms, restart_delay).await;
                        None
                    }
                }
            }
        })
        .for_each(|()| futures::future::ready(()))
        .await;
}

/// Reconcile the object a watch event points at
async fn reconcile<K: Object>(obj: Arc<K>, ctx: Arc<ControllerContext>) -> Result<Action, Error> {
    let (namespace, name) = (obj.namespace(), obj.name_any());
    let reconcile_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch.reconcile",
        resource.kind = ctx.kind.as_str(),
        resource.name = name.as_str(),
        resource.namespace = namespace.as_deref().unwrap_or_default(),
        resource.version = obj.meta().resource_version.as_deref().unwrap_or("unknown"),
        resource.generation = obj.meta().generation.unwrap_or(0),
        event.r#type = "watch_triggered"
    );

    ctx.reconciler
        .reconcile(&ctx.reconcile, namespace.as_deref(), &name)
        .instrument(reconcile_span)
        .await?;

    reset_backoff(&ctx, &resource_key(namespace.as_deref(), &name));
    Ok(Action::requeue(ctx.config.resync_period()))
}

/// Reconcile a key the controller cache cannot hand over
async fn reconcile_key(ctx: &ControllerContext, namespace: Option<&str>, name: &str) {
    match ctx.reconciler.reconcile(&ctx.reconcile, namespace, name).await {
        Ok(()) => debug!("Reconciled uncached {} {}", ctx.kind, resource_key(namespace, name)),
        Err(e) => warn!("{} reconcile of uncached {} failed: {}", ctx.kind, resource_key(namespace, name), e),
    }
}

/// Map a changed dependency to the `K` parents that read it
fn tracked<K, W>(tracker: Arc<Tracker>) -> impl Fn(W) -> Vec<ObjectRef<K>> + Send + Sync + 'static
where
    K: Object,
    W: Object,
{
    move |watched: W| {
        tracker
            .lookup(&ObjectKey::for_object(&watched))
            .into_iter()
            .filter(|parent| parent.is_kind::<K>())
            .map(|parent| parent.to_object_ref::<K>())
            .collect()
    }
}

/// Periodically drop expired tracker entries and publish the gauge
fn spawn_tracker_sweep(tracker: Arc<Tracker>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep_tracker(&tracker);
        }
    })
}

/// Sweep once, returning how many watched objects were dropped
fn sweep_tracker(tracker: &Tracker) -> usize {
    let before = tracker.len();
    let left = tracker.sweep();
    let dropped = before.saturating_sub(left);
    if dropped > 0 {
        debug!("Tracker sweep dropped {} watched objects, {} left", dropped, left);
    }
    dropped
}

/// Resolve on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
