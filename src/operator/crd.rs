//! `HTTPScaledObject` custom resource (`http.keda.sh/v1alpha1`).

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::operator::resources::ManagedResource;

/// Finalizer held on every `HTTPScaledObject` while its managed resources exist.
pub const FINALIZER: &str = "http.keda.sh/managed-resources";

/// Desired state of one HTTP-scaled application.
#[allow(clippy::upper_case_acronyms)]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "http.keda.sh",
    version = "v1alpha1",
    kind = "HTTPScaledObject",
    plural = "httpscaledobjects",
    shortname = "httpso",
    namespaced,
    status = "HTTPScaledObjectStatus",
    printcolumn = r#"{"name":"App","type":"string","jsonPath":".spec.app_name"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
pub struct HTTPScaledObjectSpec {
    pub app_name: String,
    #[serde(alias = "container")]
    pub container_image: String,
    pub port: u16,
}

/// Lifecycle of one managed sub-resource.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ResourceStatus {
    #[default]
    Unknown,
    Pending,
    Created,
    Error,
    Terminating,
    Deleted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Unknown => "Unknown",
            ResourceStatus::Pending => "Pending",
            ResourceStatus::Created => "Created",
            ResourceStatus::Error => "Error",
            ResourceStatus::Terminating => "Terminating",
            ResourceStatus::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// Observed state, written only by the reconciler.
///
/// `ready` is recomputed on every [`HTTPScaledObjectStatus::set`] and is
/// true exactly when all five sub-resources are `Created`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct HTTPScaledObjectStatus {
    #[serde(default)]
    pub service_status: ResourceStatus,
    #[serde(default)]
    pub deployment_status: ResourceStatus,
    #[serde(default)]
    pub scaled_object_status: ResourceStatus,
    #[serde(default)]
    pub interceptor_status: ResourceStatus,
    #[serde(default)]
    pub external_scaler_status: ResourceStatus,
    #[serde(default)]
    pub ready: bool,
}

impl HTTPScaledObjectStatus {
    /// Every sub-resource in `status`.
    pub fn all(status: ResourceStatus) -> Self {
        let mut out = Self::default();
        for resource in ManagedResource::ALL {
            out.set(resource, status);
        }
        out
    }

    pub fn get(&self, resource: ManagedResource) -> ResourceStatus {
        match resource {
            ManagedResource::Deployment => self.deployment_status,
            ManagedResource::Service => self.service_status,
            ManagedResource::Interceptor => self.interceptor_status,
            ManagedResource::ExternalScaler => self.external_scaler_status,
            ManagedResource::ScaledObject => self.scaled_object_status,
        }
    }

    pub fn set(&mut self, resource: ManagedResource, status: ResourceStatus) {
        let slot = match resource {
            ManagedResource::Deployment => &mut self.deployment_status,
            ManagedResource::Service => &mut self.service_status,
            ManagedResource::Interceptor => &mut self.interceptor_status,
            ManagedResource::ExternalScaler => &mut self.external_scaler_status,
            ManagedResource::ScaledObject => &mut self.scaled_object_status,
        };
        *slot = status;
        self.ready = ManagedResource::ALL
            .iter()
            .all(|r| self.get(*r) == ResourceStatus::Created);
    }
}

impl HTTPScaledObject {
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == FINALIZER))
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
