//! Managed resource set of one application and the factory that builds it.
//!
//! # Responsibilities
//! - Derive every managed name, port and address from the application spec
//! - Describe each object as [`ResourceParams`]
//! - Turn params into concrete cluster objects through [`ResourceFactory`]
//!
//! Everything here is a pure function of `(spec, namespace, topology)`.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;

use crate::config::OperatorConfig;
use crate::operator::crd::HTTPScaledObjectSpec;
use crate::routing::{Backend, RouteEntry};

pub const INTERCEPTOR_SUFFIX: &str = "-interceptor";
pub const EXTERNAL_SCALER_SUFFIX: &str = "-ext-scaler";

const APP_LABEL: &str = "app";
const OWNER_LABEL: &str = "http.keda.sh/app";

/// One status-tracked slot of the managed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedResource {
    /// User application deployment.
    Deployment,
    /// User application service.
    Service,
    /// Interceptor deployment and service.
    Interceptor,
    /// External scaler deployment and service.
    ExternalScaler,
    /// KEDA `ScaledObject` bound to the external scaler.
    ScaledObject,
}

impl ManagedResource {
    /// Creation order.
    pub const ALL: [ManagedResource; 5] = [
        ManagedResource::Deployment,
        ManagedResource::Service,
        ManagedResource::Interceptor,
        ManagedResource::ExternalScaler,
        ManagedResource::ScaledObject,
    ];
}

impl fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagedResource::Deployment => "deployment",
            ManagedResource::Service => "service",
            ManagedResource::Interceptor => "interceptor",
            ManagedResource::ExternalScaler => "external scaler",
            ManagedResource::ScaledObject => "scaled object",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Deployment,
    Service,
    ScaledObject,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ScaledObject => "ScaledObject",
        };
        f.write_str(s)
    }
}

/// Cluster-wide constants the operator stamps into every set.
#[derive(Debug, Clone)]
pub struct Topology {
    pub cluster_domain: String,
    pub interceptor_image: String,
    pub scaler_image: String,
    pub exposed_port: u16,
    pub interceptor_admin_port: u16,
    /// `<svc>.<namespace>.<cluster-domain>` of the operator's admin service.
    pub operator_service_host: String,
    pub operator_service_port: u16,
}

impl From<&OperatorConfig> for Topology {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            cluster_domain: config.cluster_domain.clone(),
            interceptor_image: config.interceptor_image_ref(),
            scaler_image: config.scaler_image_ref(),
            exposed_port: config.exposed_port,
            interceptor_admin_port: config.interceptor_admin_port,
            operator_service_host: format!(
                "{}.{}.{}",
                config.admin_service_name, config.admin_service_namespace, config.cluster_domain
            ),
            operator_service_port: config.admin_service_port,
        }
    }
}

/// Input to [`ResourceFactory::build`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceParams {
    Deployment {
        namespace: String,
        name: String,
        app: String,
        image: String,
        ports: Vec<(String, u16)>,
        env: Vec<(String, String)>,
    },
    Service {
        namespace: String,
        name: String,
        app: String,
        ports: Vec<(String, u16)>,
    },
    ScaledObject {
        namespace: String,
        name: String,
        app: String,
        target_deployment: String,
        scaler_address: String,
    },
}

impl ResourceParams {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceParams::Deployment { .. } => ResourceKind::Deployment,
            ResourceParams::Service { .. } => ResourceKind::Service,
            ResourceParams::ScaledObject { .. } => ResourceKind::ScaledObject,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceParams::Deployment { name, .. }
            | ResourceParams::Service { name, .. }
            | ResourceParams::ScaledObject { name, .. } => name,
        }
    }
}

/// A fully built cluster object, ready to be applied.
#[derive(Debug, Clone)]
pub enum ResourceDescriptor {
    Deployment(Deployment),
    Service(Service),
    ScaledObject(DynamicObject),
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDescriptor::Deployment(_) => ResourceKind::Deployment,
            ResourceDescriptor::Service(_) => ResourceKind::Service,
            ResourceDescriptor::ScaledObject(_) => ResourceKind::ScaledObject,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ResourceDescriptor::Deployment(d) => &d.metadata,
            ResourceDescriptor::Service(s) => &s.metadata,
            ResourceDescriptor::ScaledObject(o) => &o.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ResourceDescriptor::Deployment(d) => &mut d.metadata,
            ResourceDescriptor::Service(s) => &mut s.metadata,
            ResourceDescriptor::ScaledObject(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Make `owner` the controlling owner of this object.
    pub fn set_owner(&mut self, owner: OwnerReference) {
        self.metadata_mut().owner_references = Some(vec![owner]);
    }
}

/// Narrow capability the reconciler uses to obtain concrete objects.
pub trait ResourceFactory: Send + Sync {
    fn build(&self, params: &ResourceParams) -> ResourceDescriptor;
}

/// Derived names and addresses of one application's managed set.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedResourceSet {
    pub namespace: String,
    pub app: String,
    pub image: String,
    pub port: u16,
    pub interceptor: String,
    pub external_scaler: String,
    interceptor_image: String,
    scaler_image: String,
    topology_ports: (u16, u16),
    scaler_address: String,
    app_address: String,
    operator_service: (String, u16),
}

impl ManagedResourceSet {
    pub fn new(spec: &HTTPScaledObjectSpec, namespace: &str, topology: &Topology) -> Self {
        let app = spec.app_name.clone();
        let external_scaler = format!("{}{}", app, EXTERNAL_SCALER_SUFFIX);
        Self {
            namespace: namespace.to_string(),
            image: spec.container_image.clone(),
            port: spec.port,
            interceptor: format!("{}{}", app, INTERCEPTOR_SUFFIX),
            scaler_address: format!(
                "{}.{}.{}:{}",
                external_scaler, namespace, topology.cluster_domain, topology.exposed_port
            ),
            app_address: format!("{}.{}.{}", app, namespace, topology.cluster_domain),
            external_scaler,
            interceptor_image: topology.interceptor_image.clone(),
            scaler_image: topology.scaler_image.clone(),
            topology_ports: (topology.exposed_port, topology.interceptor_admin_port),
            operator_service: (topology.operator_service_host.clone(), topology.operator_service_port),
            app,
        }
    }

    /// `<app>-ext-scaler.<ns>.<cluster-domain>:<port>`, the ScaledObject's target.
    pub fn scaler_address(&self) -> &str {
        &self.scaler_address
    }

    /// Control-plane route for this application.
    pub fn route(&self) -> RouteEntry {
        RouteEntry {
            host: self.app.clone(),
            path_prefix: None,
            backend: Backend::new(self.app_address.clone(), self.port),
        }
    }

    /// Objects backing `resource`, in apply order.
    pub fn params(&self, resource: ManagedResource) -> Vec<ResourceParams> {
        let (exposed, admin) = self.topology_ports;
        match resource {
            ManagedResource::Deployment => vec![self.deployment(
                &self.app,
                &self.image,
                vec![("http".into(), self.port)],
                Vec::new(),
            )],
            ManagedResource::Service => vec![self.service(&self.app, vec![("http".into(), self.port)])],
            ManagedResource::Interceptor => {
                let ports = vec![("proxy".to_string(), exposed), ("admin".to_string(), admin)];
                let env = vec![
                    ("KEDA_HTTP_SERVICE_NAME".to_string(), self.app.clone()),
                    ("KEDA_HTTP_SERVICE_PORT".to_string(), self.port.to_string()),
                    ("KEDA_HTTP_OPERATOR_SERVICE_NAME".to_string(), self.operator_service.0.clone()),
                    ("KEDA_HTTP_OPERATOR_SERVICE_PORT".to_string(), self.operator_service.1.to_string()),
                ];
                vec![
                    self.deployment(&self.interceptor, &self.interceptor_image, ports.clone(), env),
                    self.service(&self.interceptor, ports),
                ]
            }
            ManagedResource::ExternalScaler => {
                let ports = vec![("grpc".to_string(), exposed)];
                let env = vec![
                    ("KEDA_HTTP_SCALER_PORT".to_string(), exposed.to_string()),
                    ("KEDA_HTTP_SCALER_TARGET_NAMESPACE".to_string(), self.namespace.clone()),
                    ("KEDA_HTTP_SCALER_TARGET_SERVICE".to_string(), self.interceptor.clone()),
                    ("KEDA_HTTP_SCALER_TARGET_ADMIN_PORT".to_string(), admin.to_string()),
                ];
                vec![
                    self.deployment(&self.external_scaler, &self.scaler_image, ports.clone(), env),
                    self.service(&self.external_scaler, ports),
                ]
            }
            ManagedResource::ScaledObject => vec![ResourceParams::ScaledObject {
                namespace: self.namespace.clone(),
                name: self.app.clone(),
                app: self.app.clone(),
                target_deployment: self.app.clone(),
                scaler_address: self.scaler_address.clone(),
            }],
        }
    }

    /// `(kind, name)` of every object backing `resource`, in delete order.
    pub fn objects(&self, resource: ManagedResource) -> Vec<(ResourceKind, String)> {
        self.params(resource)
            .iter()
            .map(|p| (p.kind(), p.name().to_string()))
            .collect()
    }

    fn deployment(
        &self,
        name: &str,
        image: &str,
        ports: Vec<(String, u16)>,
        env: Vec<(String, String)>,
    ) -> ResourceParams {
        ResourceParams::Deployment {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            app: self.app.clone(),
            image: image.to_string(),
            ports,
            env,
        }
    }

    fn service(&self, name: &str, ports: Vec<(String, u16)>) -> ResourceParams {
        ResourceParams::Service {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            app: self.app.clone(),
            ports,
        }
    }
}

/// Builds plain `apps/v1`, `v1` and `keda.sh/v1alpha1` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeResourceFactory;

/// `keda.sh/v1alpha1 ScaledObject`.
pub fn scaled_object_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("keda.sh", "v1alpha1", "ScaledObject"))
}

fn labels(name: &str, app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), name.to_string()),
        (OWNER_LABEL.to_string(), app.to_string()),
    ])
}

fn meta(namespace: &str, name: &str, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(name, app)),
        ..Default::default()
    }
}

impl ResourceFactory for KubeResourceFactory {
    fn build(&self, params: &ResourceParams) -> ResourceDescriptor {
        match params {
            ResourceParams::Deployment {
                namespace,
                name,
                app,
                image,
                ports,
                env,
            } => {
                let selector = BTreeMap::from([(APP_LABEL.to_string(), name.clone())]);
                let container = Container {
                    name: name.clone(),
                    image: Some(image.clone()),
                    ports: Some(
                        ports
                            .iter()
                            .map(|(port_name, port)| ContainerPort {
                                name: Some(port_name.clone()),
                                container_port: i32::from(*port),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    env: (!env.is_empty()).then(|| {
                        env.iter()
                            .map(|(k, v)| EnvVar {
                                name: k.clone(),
                                value: Some(v.clone()),
                                ..Default::default()
                            })
                            .collect()
                    }),
                    ..Default::default()
                };
                ResourceDescriptor::Deployment(Deployment {
                    metadata: meta(namespace, name, app),
                    spec: Some(DeploymentSpec {
                        replicas: Some(1),
                        selector: LabelSelector {
                            match_labels: Some(selector),
                            ..Default::default()
                        },
                        template: PodTemplateSpec {
                            metadata: Some(ObjectMeta {
                                labels: Some(labels(name, app)),
                                ..Default::default()
                            }),
                            spec: Some(PodSpec {
                                containers: vec![container],
                                ..Default::default()
                            }),
                        },
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            }
            ResourceParams::Service {
                namespace,
                name,
                app,
                ports,
            } => ResourceDescriptor::Service(Service {
                metadata: meta(namespace, name, app),
                spec: Some(ServiceSpec {
                    selector: Some(BTreeMap::from([(APP_LABEL.to_string(), name.clone())])),
                    ports: Some(
                        ports
                            .iter()
                            .map(|(port_name, port)| ServicePort {
                                name: Some(port_name.clone()),
                                port: i32::from(*port),
                                target_port: Some(IntOrString::Int(i32::from(*port))),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ResourceParams::ScaledObject {
                namespace,
                name,
                app,
                target_deployment,
                scaler_address,
            } => {
                let mut object = DynamicObject::new(name, &scaled_object_resource()).within(namespace);
                object.metadata.labels = Some(labels(name, app));
                object.data = json!({
                    "spec": {
                        "scaleTargetRef": { "name": target_deployment },
                        "minReplicaCount": 0,
                        "triggers": [{
                            "type": "external",
                            "metadata": { "scalerAddress": scaler_address },
                        }],
                    }
                });
                ResourceDescriptor::ScaledObject(object)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> KubeResourceFactory {
        KubeResourceFactory
    }

    fn topology() -> Topology {
        Topology::from(&OperatorConfig::default())
    }

    fn demo() -> ManagedResourceSet {
        let spec = HTTPScaledObjectSpec {
            app_name: "demo".into(),
            container_image: "demo:v1".into(),
            port: 8080,
        };
        ManagedResourceSet::new(&spec, "apps", &topology())
    }

    #[test]
    fn test_names_are_derived_from_app() {
        let set = demo();
        let names: Vec<_> = ManagedResource::ALL
            .iter()
            .flat_map(|r| set.objects(*r))
            .collect();
        assert_eq!(
            names,
            vec![
                (ResourceKind::Deployment, "demo".to_string()),
                (ResourceKind::Service, "demo".to_string()),
                (ResourceKind::Deployment, "demo-interceptor".to_string()),
                (ResourceKind::Service, "demo-interceptor".to_string()),
                (ResourceKind::Deployment, "demo-ext-scaler".to_string()),
                (ResourceKind::Service, "demo-ext-scaler".to_string()),
                (ResourceKind::ScaledObject, "demo".to_string()),
            ]
        );
        assert_eq!(set.scaler_address(), "demo-ext-scaler.apps.svc.cluster.local:8080");
    }

    #[test]
    fn test_interceptor_gets_app_coordinates() {
        let set = demo();
        let params = set.params(ManagedResource::Interceptor);
        let ResourceParams::Deployment { env, .. } = &params[0] else {
            panic!("interceptor starts with its deployment");
        };
        assert!(env.contains(&("KEDA_HTTP_SERVICE_NAME".into(), "demo".into())));
        assert!(env.contains(&("KEDA_HTTP_SERVICE_PORT".into(), "8080".into())));
        assert!(env.contains(&(
            "KEDA_HTTP_OPERATOR_SERVICE_NAME".into(),
            "http-autoscaler-operator.keda.svc.cluster.local".into()
        )));
    }

    #[test]
    fn test_factory_builds_user_deployment() {
        let set = demo();
        let factory = factory();
        let ResourceDescriptor::Deployment(deployment) = factory.build(&set.params(ManagedResource::Deployment)[0])
        else {
            panic!("expected a deployment");
        };
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("demo:v1"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
    }

    #[test]
    fn test_sidecar_images_come_from_topology() {
        let set = demo();
        let topology = topology();
        for (resource, expected) in [
            (ManagedResource::Interceptor, &topology.interceptor_image),
            (ManagedResource::ExternalScaler, &topology.scaler_image),
        ] {
            let params = &set.params(resource)[0];
            let ResourceParams::Deployment { image, .. } = params else {
                panic!("{} starts with its deployment", resource);
            };
            assert_eq!(image, expected);

            let ResourceDescriptor::Deployment(deployment) = factory().build(params) else {
                panic!("expected a deployment");
            };
            let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
            assert_eq!(container.image.as_deref(), Some(expected.as_str()));
        }
    }

    #[test]
    fn test_operator_service_is_fully_qualified() {
        let config = OperatorConfig {
            admin_service_namespace: "control".into(),
            cluster_domain: "svc.example.internal".into(),
            ..OperatorConfig::default()
        };
        let topology = Topology::from(&config);
        assert_eq!(
            topology.operator_service_host,
            "http-autoscaler-operator.control.svc.example.internal"
        );
    }

    #[test]
    fn test_scaled_object_targets_scaler() {
        let set = demo();
        let factory = factory();
        let descriptor = factory.build(&set.params(ManagedResource::ScaledObject)[0]);
        let ResourceDescriptor::ScaledObject(object) = &descriptor else {
            panic!("expected a scaled object");
        };
        assert_eq!(descriptor.name(), "demo");
        assert_eq!(object.data["spec"]["scaleTargetRef"]["name"], "demo");
        assert_eq!(
            object.data["spec"]["triggers"][0]["metadata"]["scalerAddress"],
            "demo-ext-scaler.apps.svc.cluster.local:8080"
        );
    }

    #[test]
    fn test_route_points_at_app_service() {
        let route = demo().route();
        assert_eq!(route.host, "demo");
        assert_eq!(route.backend.authority(), "demo.apps.svc.cluster.local:8080");
    }
}
