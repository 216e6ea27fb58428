//! Cluster access used by the reconciler.
//!
//! The reconciler only talks to the cluster through [`ClusterClient`], which
//! keeps the state machine testable against an in-memory fake.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::Client;
use serde_json::json;

use crate::operator::crd::{HTTPScaledObject, HTTPScaledObjectStatus};
use crate::operator::resources::{scaled_object_resource, ResourceDescriptor, ResourceKind};

/// `true` when the API server answered 404.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Current state of the declared application; `None` once it is gone.
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<HTTPScaledObject>, kube::Error>;

    /// Create or adopt `resource`, converging it to the descriptor.
    async fn apply(&self, namespace: &str, resource: &ResourceDescriptor) -> Result<(), kube::Error>;

    /// Delete one object. A missing object surfaces as a 404 error.
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<(), kube::Error>;

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HTTPScaledObjectStatus,
    ) -> Result<(), kube::Error>;

    /// Replace the finalizer list of the declared application.
    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<(), kube::Error>;
}

/// [`ClusterClient`] backed by the API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }

    fn scaled_objects(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &scaled_object_resource())
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<Option<HTTPScaledObject>, kube::Error> {
        let api: Api<HTTPScaledObject> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn apply(&self, namespace: &str, resource: &ResourceDescriptor) -> Result<(), kube::Error> {
        let params = self.apply_params();
        let name = resource.name();
        match resource {
            ResourceDescriptor::Deployment(deployment) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(deployment)).await?;
            }
            ResourceDescriptor::Service(service) => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(service)).await?;
            }
            ResourceDescriptor::ScaledObject(object) => {
                self.scaled_objects(namespace)
                    .patch(name, &params, &Patch::Apply(object))
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<(), kube::Error> {
        let params = DeleteParams::background();
        match kind {
            ResourceKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.delete(name, &params).await?;
            }
            ResourceKind::Service => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                api.delete(name, &params).await?;
            }
            ResourceKind::ScaledObject => {
                self.scaled_objects(namespace).delete(name, &params).await?;
            }
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HTTPScaledObjectStatus,
    ) -> Result<(), kube::Error> {
        let api: Api<HTTPScaledObject> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<(), kube::Error> {
        let api: Api<HTTPScaledObject> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }
}
