//! Reconciliation state machine for `HTTPScaledObject`.
//!
//! # Pass Structure
//! ```text
//! get_app ──▶ gone? ──▶ Gone (terminal success)
//!    │
//!    ├─ deleting ──▶ all Terminating ──▶ delete each object in order
//!    │                  404 = success, other error = Error + abort
//!    │              ──▶ patch status ──▶ drop route ──▶ drop finalizer
//!    │
//!    └─ live ──▶ ensure finalizer ──▶ all Pending ──▶ apply each object in order
//!                   first error = Error + abort, earlier Created kept
//!               ──▶ patch status ──▶ register route
//! ```
//!
//! # Design Decisions
//! - No rollback: a partial set stays in place and is visible in status
//! - Objects are written with server-side apply, so re-running a pass adopts
//!   whatever an earlier, interrupted pass left behind
//! - The owning object disappearing mid-pass ends the pass successfully
//! - Status is patched once at the end of the pass, success or failure

use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use thiserror::Error;

use crate::operator::client::{is_not_found, ClusterClient};
use crate::operator::crd::{HTTPScaledObject, HTTPScaledObjectStatus, ResourceStatus, FINALIZER};
use crate::operator::registry::RouteRegistry;
use crate::operator::resources::{ManagedResource, ManagedResourceSet, ResourceFactory, ResourceKind, Topology};

/// Namespace and name of one declared application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub namespace: String,
    pub name: String,
}

impl AppKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Apply,
    Delete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Apply => "applying",
            Step::Delete => "deleting",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetching {key} failed: {source}")]
    Fetch {
        key: AppKey,
        #[source]
        source: kube::Error,
    },

    #[error("{step} {resource} ({kind} {object}) of {key} failed: {source}")]
    Resource {
        key: AppKey,
        resource: ManagedResource,
        step: Step,
        kind: ResourceKind,
        object: String,
        #[source]
        source: kube::Error,
    },

    #[error("updating finalizers of {key} failed: {source}")]
    Finalizer {
        key: AppKey,
        #[source]
        source: kube::Error,
    },

    #[error("patching status of {key} failed: {source}")]
    Status {
        key: AppKey,
        #[source]
        source: kube::Error,
    },
}

impl ReconcileError {
    /// The sub-resource that failed, if the error came from one.
    pub fn resource(&self) -> Option<ManagedResource> {
        match self {
            ReconcileError::Resource { resource, .. } => Some(*resource),
            _ => None,
        }
    }
}

/// How a successful pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The declared application no longer exists.
    Gone,
    /// Every managed resource is in place.
    Created(HTTPScaledObjectStatus),
    /// Every managed resource was removed and the finalizer released.
    Deleted(HTTPScaledObjectStatus),
    /// The spec cannot produce a managed set; nothing was written but status.
    Rejected(String),
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Gone => "gone",
            ReconcileOutcome::Created(_) => "created",
            ReconcileOutcome::Deleted(_) => "deleted",
            ReconcileOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Converges one declared application at a time.
///
/// Callers must not run two passes for the same key concurrently.
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    factory: Arc<dyn ResourceFactory>,
    topology: Topology,
    registry: Arc<RouteRegistry>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        factory: Arc<dyn ResourceFactory>,
        topology: Topology,
        registry: Arc<RouteRegistry>,
    ) -> Self {
        Self {
            client,
            factory,
            topology,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Run one pass for `key`.
    pub async fn reconcile(&self, key: &AppKey) -> Result<ReconcileOutcome, ReconcileError> {
        let app = match self.client.get_app(&key.namespace, &key.name).await {
            Ok(Some(app)) => app,
            Ok(None) => return Ok(self.gone(key)),
            Err(e) if is_not_found(&e) => return Ok(self.gone(key)),
            Err(source) => {
                return Err(ReconcileError::Fetch {
                    key: key.clone(),
                    source,
                })
            }
        };

        if app.is_deleting() {
            self.remove(key, &app).await
        } else {
            self.create(key, &app).await
        }
    }

    fn gone(&self, key: &AppKey) -> ReconcileOutcome {
        tracing::debug!(app = %key, "Application no longer exists");
        self.registry.remove(&key.namespace, &key.name);
        ReconcileOutcome::Gone
    }

    async fn create(&self, key: &AppKey, app: &HTTPScaledObject) -> Result<ReconcileOutcome, ReconcileError> {
        if let Some(reason) = invalid_spec(app) {
            tracing::warn!(app = %key, reason = %reason, "Rejecting application spec");
            self.registry.remove(&key.namespace, &key.name);
            let status = HTTPScaledObjectStatus::all(ResourceStatus::Error);
            return match self.write_status(key, &status).await? {
                true => Ok(ReconcileOutcome::Rejected(reason)),
                false => Ok(self.gone(key)),
            };
        }

        if !app.has_finalizer() {
            let mut finalizers = app.metadata.finalizers.clone().unwrap_or_default();
            finalizers.push(FINALIZER.to_string());
            match self.client.set_finalizers(&key.namespace, &key.name, finalizers).await {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => return Ok(self.gone(key)),
                Err(source) => {
                    return Err(ReconcileError::Finalizer {
                        key: key.clone(),
                        source,
                    })
                }
            }
        }

        let set = ManagedResourceSet::new(&app.spec, &key.namespace, &self.topology);
        let owner = app.controller_owner_ref(&());
        let mut status = HTTPScaledObjectStatus::all(ResourceStatus::Pending);
        tracing::info!(app = %key, app_name = %set.app, image = %set.image, port = set.port, "Applying managed resources");

        let applied = self.apply_all(key, &set, owner, &mut status).await;
        let present = self.write_status(key, &status).await;

        match (applied, present) {
            (_, Ok(false)) => Ok(self.gone(key)),
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(true)) => {
                self.registry.upsert(&key.namespace, &key.name, set.route());
                tracing::info!(app = %key, "Managed resources ready");
                Ok(ReconcileOutcome::Created(status))
            }
        }
    }

    async fn apply_all(
        &self,
        key: &AppKey,
        set: &ManagedResourceSet,
        owner: Option<OwnerReference>,
        status: &mut HTTPScaledObjectStatus,
    ) -> Result<(), ReconcileError> {
        for resource in ManagedResource::ALL {
            for params in set.params(resource) {
                let mut descriptor = self.factory.build(&params);
                if let Some(owner) = &owner {
                    descriptor.set_owner(owner.clone());
                }
                if let Err(source) = self.client.apply(&key.namespace, &descriptor).await {
                    tracing::error!(app = %key, resource = %resource, object = %params.name(), error = %source, "Apply failed");
                    status.set(resource, ResourceStatus::Error);
                    return Err(ReconcileError::Resource {
                        key: key.clone(),
                        resource,
                        step: Step::Apply,
                        kind: params.kind(),
                        object: params.name().to_string(),
                        source,
                    });
                }
            }
            status.set(resource, ResourceStatus::Created);
        }
        Ok(())
    }

    async fn remove(&self, key: &AppKey, app: &HTTPScaledObject) -> Result<ReconcileOutcome, ReconcileError> {
        if !app.has_finalizer() {
            // Nothing of ours holds the object; the API server finishes deletion.
            return Ok(self.gone(key));
        }

        let set = ManagedResourceSet::new(&app.spec, &key.namespace, &self.topology);
        let mut status = HTTPScaledObjectStatus::all(ResourceStatus::Terminating);
        tracing::info!(app = %key, app_name = %set.app, "Deleting managed resources");

        let deleted = self.delete_all(key, &set, &mut status).await;
        let present = self.write_status(key, &status).await;

        match (deleted, present) {
            (_, Ok(false)) => return Ok(self.gone(key)),
            (Err(e), _) => return Err(e),
            (Ok(()), Err(e)) => return Err(e),
            (Ok(()), Ok(true)) => {}
        }

        self.registry.remove(&key.namespace, &key.name);

        let finalizers: Vec<String> = app
            .metadata
            .finalizers
            .iter()
            .flatten()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        match self.client.set_finalizers(&key.namespace, &key.name, finalizers).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => return Ok(ReconcileOutcome::Gone),
            Err(source) => {
                return Err(ReconcileError::Finalizer {
                    key: key.clone(),
                    source,
                })
            }
        }

        tracing::info!(app = %key, "Managed resources removed");
        Ok(ReconcileOutcome::Deleted(status))
    }

    async fn delete_all(
        &self,
        key: &AppKey,
        set: &ManagedResourceSet,
        status: &mut HTTPScaledObjectStatus,
    ) -> Result<(), ReconcileError> {
        for resource in ManagedResource::ALL {
            for (kind, object) in set.objects(resource) {
                match self.client.delete(&key.namespace, kind, &object).await {
                    Ok(()) => {}
                    Err(e) if is_not_found(&e) => {
                        tracing::debug!(app = %key, kind = %kind, object = %object, "Already absent");
                    }
                    Err(source) => {
                        tracing::error!(app = %key, resource = %resource, object = %object, error = %source, "Delete failed");
                        status.set(resource, ResourceStatus::Error);
                        return Err(ReconcileError::Resource {
                            key: key.clone(),
                            resource,
                            step: Step::Delete,
                            kind,
                            object,
                            source,
                        });
                    }
                }
            }
            status.set(resource, ResourceStatus::Deleted);
        }
        Ok(())
    }

    /// Patch status. `Ok(false)` means the application is gone.
    async fn write_status(&self, key: &AppKey, status: &HTTPScaledObjectStatus) -> Result<bool, ReconcileError> {
        match self.client.patch_status(&key.namespace, &key.name, status).await {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(source) => {
                tracing::warn!(app = %key, error = %source, "Status patch failed");
                Err(ReconcileError::Status {
                    key: key.clone(),
                    source,
                })
            }
        }
    }
}

fn invalid_spec(app: &HTTPScaledObject) -> Option<String> {
    let spec = &app.spec;
    if spec.app_name.trim().is_empty() {
        return Some("app_name must not be empty".into());
    }
    if spec.container_image.trim().is_empty() {
        return Some("container_image must not be empty".into());
    }
    if spec.port == 0 {
        return Some("port must be greater than 0".into());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::operator::crd::HTTPScaledObjectSpec;
    use crate::operator::resources::{KubeResourceFactory, ResourceDescriptor};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::core::ErrorResponse;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("injected {}", code),
            reason: "Injected".into(),
            code,
        })
    }

    #[derive(Default)]
    struct FakeState {
        app: Option<HTTPScaledObject>,
        objects: BTreeMap<(ResourceKind, String), ResourceDescriptor>,
        statuses: Vec<HTTPScaledObjectStatus>,
        fail_apply: HashSet<String>,
        fail_delete: HashSet<String>,
        vanish_on_status: bool,
        deletes: usize,
    }

    /// In-memory cluster with one declared application.
    #[derive(Default)]
    struct FakeCluster {
        state: Mutex<FakeState>,
    }

    impl FakeCluster {
        fn with_app(app: HTTPScaledObject) -> Arc<Self> {
            let fake = Self::default();
            fake.state.lock().unwrap().app = Some(app);
            Arc::new(fake)
        }

        fn object_names(&self) -> Vec<(ResourceKind, String)> {
            self.state.lock().unwrap().objects.keys().cloned().collect()
        }

        fn last_status(&self) -> HTTPScaledObjectStatus {
            self.state.lock().unwrap().statuses.last().cloned().unwrap()
        }

        fn mark_deleted(&self) {
            let mut state = self.state.lock().unwrap();
            if let Some(app) = state.app.as_mut() {
                app.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
            }
        }

        fn finalizers(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state
                .app
                .as_ref()
                .and_then(|a| a.metadata.finalizers.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn get_app(&self, _namespace: &str, _name: &str) -> Result<Option<HTTPScaledObject>, kube::Error> {
            Ok(self.state.lock().unwrap().app.clone())
        }

        async fn apply(&self, _namespace: &str, resource: &ResourceDescriptor) -> Result<(), kube::Error> {
            let mut state = self.state.lock().unwrap();
            let name = resource.name().to_string();
            if state.fail_apply.contains(&name) {
                return Err(api_error(500));
            }
            state.objects.insert((resource.kind(), name), resource.clone());
            Ok(())
        }

        async fn delete(&self, _namespace: &str, kind: ResourceKind, name: &str) -> Result<(), kube::Error> {
            let mut state = self.state.lock().unwrap();
            state.deletes += 1;
            if state.fail_delete.contains(name) {
                return Err(api_error(500));
            }
            match state.objects.remove(&(kind, name.to_string())) {
                Some(_) => Ok(()),
                None => Err(api_error(404)),
            }
        }

        async fn patch_status(
            &self,
            _namespace: &str,
            _name: &str,
            status: &HTTPScaledObjectStatus,
        ) -> Result<(), kube::Error> {
            let mut state = self.state.lock().unwrap();
            if state.vanish_on_status {
                state.app = None;
            }
            if state.app.is_none() {
                return Err(api_error(404));
            }
            state.statuses.push(status.clone());
            Ok(())
        }

        async fn set_finalizers(&self, _namespace: &str, _name: &str, finalizers: Vec<String>) -> Result<(), kube::Error> {
            let mut state = self.state.lock().unwrap();
            match state.app.as_mut() {
                Some(app) => {
                    app.metadata.finalizers = Some(finalizers);
                    Ok(())
                }
                None => Err(api_error(404)),
            }
        }
    }

    fn demo_app() -> HTTPScaledObject {
        let mut app = HTTPScaledObject::new(
            "demo",
            HTTPScaledObjectSpec {
                app_name: "demo".into(),
                container_image: "demo:v1".into(),
                port: 8080,
            },
        );
        app.metadata.namespace = Some("apps".into());
        app.metadata.uid = Some("uid-1".into());
        app
    }

    fn reconciler(fake: Arc<FakeCluster>) -> Reconciler {
        let topology = Topology::from(&OperatorConfig::default());
        Reconciler::new(
            fake,
            Arc::new(KubeResourceFactory),
            topology,
            Arc::new(RouteRegistry::new()),
        )
    }

    fn key() -> AppKey {
        AppKey::new("apps", "demo")
    }

    #[tokio::test]
    async fn test_demo_creates_full_set() {
        let fake = FakeCluster::with_app(demo_app());
        let reconciler = reconciler(fake.clone());

        let outcome = reconciler.reconcile(&key()).await.unwrap();
        let ReconcileOutcome::Created(status) = outcome else {
            panic!("expected Created, got {:?}", outcome);
        };
        assert!(status.ready);
        for resource in ManagedResource::ALL {
            assert_eq!(status.get(resource), ResourceStatus::Created);
        }
        assert_eq!(fake.last_status(), status);

        let names = fake.object_names();
        assert_eq!(names.len(), 7);
        for name in ["demo", "demo-interceptor", "demo-ext-scaler"] {
            assert!(names.contains(&(ResourceKind::Deployment, name.to_string())));
            assert!(names.contains(&(ResourceKind::Service, name.to_string())));
        }
        assert!(names.contains(&(ResourceKind::ScaledObject, "demo".to_string())));

        let state = fake.state.lock().unwrap();
        let ResourceDescriptor::ScaledObject(object) = &state.objects[&(ResourceKind::ScaledObject, "demo".to_string())]
        else {
            panic!("expected a scaled object");
        };
        assert_eq!(
            object.data["spec"]["triggers"][0]["metadata"]["scalerAddress"],
            "demo-ext-scaler.apps.svc.cluster.local:8080"
        );
        let owners = object.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners[0].uid, "uid-1");
        assert_eq!(owners[0].controller, Some(true));
        drop(state);

        assert_eq!(fake.finalizers(), vec![FINALIZER.to_string()]);
        assert_eq!(reconciler.registry().document().routes[0].host, "demo");
    }

    #[tokio::test]
    async fn test_repeated_pass_is_idempotent() {
        let fake = FakeCluster::with_app(demo_app());
        let reconciler = reconciler(fake.clone());

        reconciler.reconcile(&key()).await.unwrap();
        let second = reconciler.reconcile(&key()).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::Created(_)));
        assert_eq!(fake.object_names().len(), 7);
        assert_eq!(fake.finalizers(), vec![FINALIZER.to_string()]);
    }

    #[tokio::test]
    async fn test_create_is_fail_fast_without_rollback() {
        let fake = FakeCluster::with_app(demo_app());
        fake.state.lock().unwrap().fail_apply.insert("demo-ext-scaler".into());
        let reconciler = reconciler(fake.clone());

        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert_eq!(err.resource(), Some(ManagedResource::ExternalScaler));

        let status = fake.last_status();
        assert_eq!(status.deployment_status, ResourceStatus::Created);
        assert_eq!(status.service_status, ResourceStatus::Created);
        assert_eq!(status.interceptor_status, ResourceStatus::Created);
        assert_eq!(status.external_scaler_status, ResourceStatus::Error);
        assert_eq!(status.scaled_object_status, ResourceStatus::Pending);
        assert!(!status.ready);

        // Earlier objects stay, nothing after the failure was attempted.
        let names = fake.object_names();
        assert_eq!(names.len(), 4);
        assert!(!names.contains(&(ResourceKind::ScaledObject, "demo".to_string())));
        assert!(reconciler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_everything_and_releases_finalizer() {
        let fake = FakeCluster::with_app(demo_app());
        let reconciler = reconciler(fake.clone());
        reconciler.reconcile(&key()).await.unwrap();

        fake.mark_deleted();
        let outcome = reconciler.reconcile(&key()).await.unwrap();
        let ReconcileOutcome::Deleted(status) = outcome else {
            panic!("expected Deleted, got {:?}", outcome);
        };
        for resource in ManagedResource::ALL {
            assert_eq!(status.get(resource), ResourceStatus::Deleted);
        }
        assert!(!status.ready);
        assert!(fake.object_names().is_empty());
        assert!(fake.finalizers().is_empty());
        assert!(reconciler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_absent_resources_is_not_an_error() {
        let mut app = demo_app();
        app.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        let fake = FakeCluster::with_app(app);
        fake.mark_deleted();
        let reconciler = reconciler(fake.clone());

        // Nothing was ever created; every delete answers 404.
        let outcome = reconciler.reconcile(&key()).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Deleted(_)));
        assert_eq!(fake.state.lock().unwrap().deletes, 7);
    }

    #[tokio::test]
    async fn test_delete_error_aborts_and_marks_one_resource() {
        let fake = FakeCluster::with_app(demo_app());
        let reconciler = reconciler(fake.clone());
        reconciler.reconcile(&key()).await.unwrap();

        fake.mark_deleted();
        fake.state.lock().unwrap().fail_delete.insert("demo-interceptor".into());
        let err = reconciler.reconcile(&key()).await.unwrap_err();
        assert_eq!(err.resource(), Some(ManagedResource::Interceptor));

        let status = fake.last_status();
        assert_eq!(status.deployment_status, ResourceStatus::Deleted);
        assert_eq!(status.service_status, ResourceStatus::Deleted);
        assert_eq!(status.interceptor_status, ResourceStatus::Error);
        assert_eq!(status.external_scaler_status, ResourceStatus::Terminating);
        assert_eq!(status.scaled_object_status, ResourceStatus::Terminating);
        assert_eq!(fake.finalizers(), vec![FINALIZER.to_string()]);

        // The retried pass completes once the error clears.
        fake.state.lock().unwrap().fail_delete.clear();
        assert!(matches!(reconciler.reconcile(&key()).await.unwrap(), ReconcileOutcome::Deleted(_)));
    }

    #[tokio::test]
    async fn test_missing_app_is_terminal_success() {
        let fake = Arc::new(FakeCluster::default());
        let reconciler = reconciler(fake.clone());
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), ReconcileOutcome::Gone);
        assert!(fake.object_names().is_empty());
    }

    #[tokio::test]
    async fn test_app_vanishing_mid_pass_is_terminal_success() {
        let fake = FakeCluster::with_app(demo_app());
        {
            let mut state = fake.state.lock().unwrap();
            state.vanish_on_status = true;
            state.fail_apply.insert("demo-interceptor".into());
        }
        let reconciler = reconciler(fake.clone());
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), ReconcileOutcome::Gone);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_with_error_status() {
        let mut app = demo_app();
        app.spec.port = 0;
        let fake = FakeCluster::with_app(app);
        let reconciler = reconciler(fake.clone());

        let outcome = reconciler.reconcile(&key()).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Rejected(_)));
        assert!(fake.object_names().is_empty());
        assert_eq!(fake.last_status(), HTTPScaledObjectStatus::all(ResourceStatus::Error));
    }
}
