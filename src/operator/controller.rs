//! `kube::runtime::Controller` wiring for the reconciler.
//!
//! The controller's work queue guarantees a single in-flight pass per object
//! key; this module only maps pass outcomes to requeue actions.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, CustomResourceExt, ResourceExt};

use crate::config::OperatorConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::operator::crd::HTTPScaledObject;
use crate::operator::reconciler::{AppKey, ReconcileError, ReconcileOutcome, Reconciler};

/// Requeue delays after a pass.
#[derive(Debug, Clone, Copy)]
pub struct RequeuePolicy {
    pub on_error: Duration,
    pub on_success: Duration,
}

impl From<&OperatorConfig> for RequeuePolicy {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            on_error: Duration::from_millis(config.error_requeue_ms),
            on_success: Duration::from_secs(config.drift_requeue_secs),
        }
    }
}

impl RequeuePolicy {
    pub fn after(&self, outcome: &ReconcileOutcome) -> Action {
        match outcome {
            ReconcileOutcome::Gone => Action::await_change(),
            _ => Action::requeue(self.on_success),
        }
    }
}

pub struct Context {
    pub reconciler: Reconciler,
    pub requeue: RequeuePolicy,
}

async fn reconcile(app: Arc<HTTPScaledObject>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let key = AppKey::new(app.namespace().unwrap_or_default(), app.name_any());
    let outcome = ctx.reconciler.reconcile(&key).await?;
    metrics::record_reconcile(outcome.label());
    tracing::debug!(app = %key, outcome = outcome.label(), "Reconcile pass finished");
    Ok(ctx.requeue.after(&outcome))
}

fn error_policy(app: Arc<HTTPScaledObject>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    metrics::record_reconcile("error");
    tracing::warn!(
        app = %app.name_any(),
        namespace = %app.namespace().unwrap_or_default(),
        error = %error,
        retry_ms = ctx.requeue.on_error.as_millis() as u64,
        "Reconcile pass failed, retrying"
    );
    Action::requeue(ctx.requeue.on_error)
}

/// Server-side apply the `HTTPScaledObject` CRD.
pub async fn install_crd(client: Client, field_manager: &str) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let crd = HTTPScaledObject::crd();
    let name = crd.name_any();
    crds.patch(&name, &PatchParams::apply(field_manager).force(), &Patch::Apply(&crd))
        .await?;
    tracing::info!(crd = %name, "CRD applied");
    Ok(())
}

/// Watch `HTTPScaledObject`s (and the objects they own) until shutdown.
pub async fn run(client: Client, namespace: Option<&str>, ctx: Arc<Context>, shutdown: Shutdown) {
    let (apps, deployments, services): (Api<HTTPScaledObject>, Api<Deployment>, Api<Service>) = match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client)),
    };

    tracing::info!(namespace = namespace.unwrap_or("*"), "Controller starting");

    Controller::new(apps, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .owns(services, watcher::Config::default())
        .graceful_shutdown_on(shutdown.signalled())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Controller event error");
            }
        })
        .await;

    tracing::info!("Controller stopped");
}
