// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::StreamExt;
use glue_operator::{
    cluster::KubeClusterClient,
    config::OperatorConfig,
    constants::{
        CLEANUP_REQUEUE_DURATION_SECS, ERROR_REQUEUE_DURATION_SECS, REQUEUE_WHEN_READY_SECS,
    },
    context::Context,
    crd::{Glue, GlueOperator},
    glue_errors::GlueError,
    identity::InstanceId,
    metrics,
    labels::{FOR_GLUE_OPERATOR_LABEL_KEY, FOR_GLUE_OPERATOR_LABEL_VALUE},
    reconcilers::{operators_for_glue, reconcile_glue, reconcile_glue_operator},
    watches::KubeWatchBackend,
};
use kube::{
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let config = OperatorConfig::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("glue-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: OperatorConfig) -> Result<()> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting Glue Operator");
    debug!("Configuration: {:?}", config);

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let (glue_trigger, glue_events) = unbounded();
    let (operator_trigger, operator_events) = unbounded();
    let ctx = Arc::new(Context::new(
        &config,
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(KubeWatchBackend::new(client.clone())),
        glue_trigger,
        operator_trigger,
    )?);

    info!("Starting all controllers");

    // Controllers should never exit - if one does, log it and exit the main process
    tokio::select! {
        result = run_glue_controller(client.clone(), ctx.clone(), &config, glue_events) => {
            error!("CRITICAL: Glue controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Glue controller exited unexpectedly without error")
        }
        result = run_glue_operator_controller(client.clone(), ctx.clone(), &config, operator_events) => {
            error!("CRITICAL: GlueOperator controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("GlueOperator controller exited unexpectedly without error")
        }
        result = shutdown_signal() => {
            result?;
            info!("Shutdown signal received, stopping controllers");
            Ok(())
        }
    }
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => Ok(()),
            result = tokio::signal::ctrl_c() => Ok(result?),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}

fn object_ref<K>(id: InstanceId) -> ObjectRef<K>
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef::new(&id.name).within(&id.namespace)
}

/// Run the `Glue` controller
async fn run_glue_controller(
    client: Client,
    ctx: Arc<Context>,
    config: &OperatorConfig,
    events: UnboundedReceiver<InstanceId>,
) -> Result<()> {
    info!("Starting Glue controller");

    let api = Api::<Glue>::all(client);
    let mut watcher_config = watcher::Config::default();
    if let Some(selector) = config.glue_label_selector.as_deref() {
        debug!("Glue controller restricted to label selector {}", selector);
        watcher_config = watcher_config.labels(selector);
    }

    Controller::new(api, watcher_config)
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .reconcile_on(events.map(object_ref::<Glue>))
        .run(reconcile_glue_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `GlueOperator` controller
async fn run_glue_operator_controller(
    client: Client,
    ctx: Arc<Context>,
    config: &OperatorConfig,
    events: UnboundedReceiver<InstanceId>,
) -> Result<()> {
    info!("Starting GlueOperator controller");

    let api = Api::<GlueOperator>::all(client.clone());
    let glues = Api::<Glue>::all(client);
    let generated = watcher::Config::default().labels(&format!(
        "{FOR_GLUE_OPERATOR_LABEL_KEY}={FOR_GLUE_OPERATOR_LABEL_VALUE}"
    ));
    let mapper_ctx = ctx.clone();

    // Drift in a generated Glue re-runs the operators watching its parent kind
    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .watches(glues, generated, move |glue| {
            operators_for_glue(&mapper_ctx, &glue)
                .into_iter()
                .map(object_ref::<GlueOperator>)
                .collect::<Vec<_>>()
        })
        .reconcile_on(events.map(object_ref::<GlueOperator>))
        .run(reconcile_glue_operator_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `Glue`
async fn reconcile_glue_wrapper(
    glue: Arc<Glue>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    debug!(
        glue_name = %glue.name_any(),
        namespace = ?glue.namespace(),
        "Reconcile wrapper called for Glue"
    );

    match reconcile_glue(&ctx, &glue).await {
        Ok(()) => {
            debug!("Successfully reconciled Glue: {}", glue.name_any());
            Ok(Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)))
        }
        Err(e) => Err(anyhow::Error::from(e).into()),
    }
}

/// Reconcile wrapper for `GlueOperator`
async fn reconcile_glue_operator_wrapper(
    operator: Arc<GlueOperator>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    debug!(
        operator_name = %operator.name_any(),
        namespace = ?operator.namespace(),
        "Reconcile wrapper called for GlueOperator"
    );

    match reconcile_glue_operator(&ctx, &operator).await {
        Ok(()) => {
            debug!("Successfully reconciled GlueOperator: {}", operator.name_any());
            Ok(Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)))
        }
        Err(e) => Err(anyhow::Error::from(e).into()),
    }
}

/// Requeue decision for a failed reconciliation.
///
/// Validation errors wait for the next spec change, pending cleanups are polled
/// quickly and everything else is retried with a fixed delay.
fn requeue_for(err: &ReconcileError) -> (Action, &'static str) {
    match err.0.downcast_ref::<GlueError>() {
        Some(GlueError::CleanupPending { .. }) => (
            Action::requeue(Duration::from_secs(CLEANUP_REQUEUE_DURATION_SECS)),
            "cleanup_pending",
        ),
        Some(e) if !e.is_retryable() => (Action::await_change(), "terminal"),
        _ => (
            Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS)),
            "error",
        ),
    }
}

/// Error policy shared by both controllers
fn error_policy<K>(resource: Arc<K>, err: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let kind = K::kind(&());
    let (action, reason) = requeue_for(err);
    match reason {
        "cleanup_pending" => debug!("{} {}: {}", kind, resource.name_any(), err),
        _ => error!("Failed to reconcile {} {}: {}", kind, resource.name_any(), err),
    }
    metrics::record_reconciliation_requeue(&kind, reason);
    action
}
