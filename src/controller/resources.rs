//! # Resource Builder
//!
//! Pure construction of the desired gateway objects from [`GatewayOptions`].
//! Nothing here reads the cluster. The watched-secret annotations are
//! computed by the caller and passed in.
//!
//! Fields the API server would default on write (secret volume modes,
//! port protocols) are set explicitly so that the mutators compare like
//! with like and a converged object stays converged.

use crate::constants::{
    ADMIN_PORTAL_URL_KEY, CA_BUNDLE_KEY, CA_CERTIFICATES_VOLUME_NAME, CUSTOM_ENVS_MOUNT_BASE_PATH,
    CUSTOM_POLICIES_MOUNT_BASE_PATH, DEFAULT_GATEWAY_METRICS_PORT, DEFAULT_HTTP_PORT,
    DEFAULT_MANAGEMENT_PORT, EMBEDDED_CONFIGURATION_KEY, EMBEDDED_CONFIGURATION_MOUNT_PATH,
    EMBEDDED_CONFIGURATION_VOLUME_NAME, HASHED_SECRET_NAME, HTTPS_CERTIFICATES_MOUNT_PATH,
    HTTPS_CERTIFICATES_VOLUME_NAME, OPENTELEMETRY_MOUNT_BASE_PATH, OPENTELEMETRY_VOLUME_NAME,
    TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TRACING_CONFIG_KEY, TRACING_CONFIG_MOUNT_BASE_PATH,
};
use crate::controller::options::GatewayOptions;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricSpec, MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, KeyToPath, PodSpec,
    PodTemplateSpec, Probe, Secret, SecretKeySelector, SecretVolumeSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Mode the API server assigns to secret volumes that do not set one
const DEFAULT_SECRET_VOLUME_MODE: i32 = 0o644;

const HPA_MIN_REPLICAS: i32 = 1;
const HPA_MAX_REPLICAS: i32 = 5;
const HPA_TARGET_UTILIZATION: i32 = 90;

#[derive(Debug, Clone, Copy)]
pub struct ResourceBuilder<'a> {
    options: &'a GatewayOptions,
}

impl<'a> ResourceBuilder<'a> {
    pub fn new(options: &'a GatewayOptions) -> Self {
        Self { options }
    }

    fn meta(&self, name: &str, owned: bool) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.options.namespace.clone()),
            labels: Some(self.options.common_labels.clone()),
            owner_references: owned.then(|| vec![self.options.owner.clone()]),
            ..Default::default()
        }
    }

    pub fn deployment(&self, watched_annotations: &BTreeMap<String, String>) -> Deployment {
        let o = self.options;
        let mut annotations = BTreeMap::from([
            ("prometheus.io/scrape".to_string(), "true".to_string()),
            (
                "prometheus.io/port".to_string(),
                DEFAULT_GATEWAY_METRICS_PORT.to_string(),
            ),
        ]);
        annotations.extend(watched_annotations.clone());

        let container = Container {
            name: o.deployment_name.clone(),
            image: Some(o.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            ports: Some(self.container_ports()),
            resources: Some(o.resources.clone()),
            liveness_probe: Some(probe("/status/live", 10, 10)),
            readiness_probe: Some(probe("/status/ready", 15, 30)),
            volume_mounts: non_empty(self.volume_mounts()),
            env: non_empty(self.env()),
            ..Default::default()
        };

        Deployment {
            metadata: self.meta(&o.deployment_name, true),
            spec: Some(DeploymentSpec {
                replicas: (!o.hpa).then_some(o.replicas),
                selector: LabelSelector {
                    match_labels: Some(o.pod_label_selector.clone()),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(o.pod_template_labels.clone()),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(o.service_account_name.clone()),
                        volumes: non_empty(self.volumes()),
                        containers: vec![container],
                        affinity: o.spec.affinity.clone(),
                        tolerations: o.spec.tolerations.clone(),
                        topology_spread_constraints: o.spec.topology_spread_constraints.clone(),
                        priority_class_name: o.spec.priority_class_name.clone(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn service(&self) -> Service {
        let o = self.options;
        let mut ports = vec![
            service_port("proxy", DEFAULT_HTTP_PORT),
            service_port("management", DEFAULT_MANAGEMENT_PORT),
        ];
        if let Some(https_port) = o.https_port {
            ports.push(service_port("httpsproxy", https_port));
        }
        Service {
            metadata: self.meta(&o.service_name, true),
            spec: Some(ServiceSpec {
                ports: Some(ports),
                selector: Some(o.pod_label_selector.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// The Ingress for `exposedHost`. Without one the object only serves as
    /// a deletion marker.
    pub fn ingress(&self) -> Ingress {
        let o = self.options;
        let mut ingress = Ingress {
            metadata: self.meta(&o.deployment_name, true),
            ..Default::default()
        };
        let Some(exposed) = &o.exposed_host else {
            return ingress;
        };
        ingress.spec = Some(IngressSpec {
            ingress_class_name: exposed.ingress_class_name.clone(),
            tls: exposed.tls.clone(),
            rules: Some(vec![IngressRule {
                host: Some(exposed.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: o.service_name.clone(),
                                port: Some(ServiceBackendPort {
                                    name: Some("proxy".to_string()),
                                    number: None,
                                }),
                            }),
                            ..Default::default()
                        },
                        ..Default::default()
                    }],
                }),
            }]),
            ..Default::default()
        });
        ingress
    }

    /// Per-namespace record of watched secret content hashes. Shared by every
    /// gateway in the namespace, so it carries no owner reference.
    pub fn hashed_secret(&self, data: BTreeMap<String, String>) -> Secret {
        Secret {
            metadata: self.meta(HASHED_SECRET_NAME, false),
            string_data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    pub fn horizontal_pod_autoscaler(&self) -> HorizontalPodAutoscaler {
        let o = self.options;
        let utilization = |resource: &str| MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: resource.to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(HPA_TARGET_UTILIZATION),
                    ..Default::default()
                },
            }),
            ..Default::default()
        };
        HorizontalPodAutoscaler {
            metadata: self.meta(&o.name, true),
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: "Deployment".to_string(),
                    name: o.deployment_name.clone(),
                },
                min_replicas: Some(HPA_MIN_REPLICAS),
                max_replicas: HPA_MAX_REPLICAS,
                metrics: Some(vec![utilization("memory"), utilization("cpu")]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn pod_disruption_budget(&self) -> PodDisruptionBudget {
        let o = self.options;
        let (min_available, max_unavailable) = match &o.pod_disruption_budget {
            Some(pdb) if pdb.min_available.is_some() || pdb.max_unavailable.is_some() => {
                (pdb.min_available.clone(), pdb.max_unavailable.clone())
            }
            _ => (None, Some(IntOrString::Int(1))),
        };
        PodDisruptionBudget {
            metadata: self.meta(&o.deployment_name, true),
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(o.pod_label_selector.clone()),
                    ..Default::default()
                }),
                min_available,
                max_unavailable,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container_ports(&self) -> Vec<ContainerPort> {
        let mut ports = vec![
            container_port("proxy", DEFAULT_HTTP_PORT),
            container_port("management", DEFAULT_MANAGEMENT_PORT),
            container_port("metrics", DEFAULT_GATEWAY_METRICS_PORT),
        ];
        if let Some(https_port) = self.options.https_port {
            ports.push(container_port("httpsproxy", https_port));
        }
        ports
    }

    fn volumes(&self) -> Vec<Volume> {
        let o = self.options;
        let mut volumes = Vec::new();
        if let Some(secret) = &o.gateway_configuration_secret {
            volumes.push(secret_volume(
                EMBEDDED_CONFIGURATION_VOLUME_NAME,
                secret_name(secret),
                Some((EMBEDDED_CONFIGURATION_KEY, EMBEDDED_CONFIGURATION_KEY)),
            ));
        }
        if let Some(secret) = &o.https_certificate_secret {
            volumes.push(secret_volume(
                HTTPS_CERTIFICATES_VOLUME_NAME,
                secret_name(secret),
                None,
            ));
        }
        if let Some(secret) = &o.ca_certificate_secret {
            volumes.push(secret_volume(
                CA_CERTIFICATES_VOLUME_NAME,
                secret_name(secret),
                Some((CA_BUNDLE_KEY, CA_BUNDLE_KEY)),
            ));
        }
        for policy in &o.custom_policies {
            volumes.push(secret_volume(
                &policy_volume_name(&policy.name, &policy.version),
                secret_name(&policy.secret),
                None,
            ));
        }
        for secret in &o.custom_environments {
            volumes.push(secret_volume(
                &custom_env_volume_name(secret_name(secret)),
                secret_name(secret),
                None,
            ));
        }
        if let Some(secret) = o.tracing.secret.as_ref().filter(|_| o.tracing.enabled) {
            let name = tracing_volume_name(&o.tracing.library, secret_name(secret));
            volumes.push(secret_volume(
                &name,
                secret_name(secret),
                Some((TRACING_CONFIG_KEY, name.as_str())),
            ));
        }
        if let Some(secret) = o.opentelemetry.secret.as_ref().filter(|_| o.opentelemetry.enabled) {
            let mut volume = secret_volume(OPENTELEMETRY_VOLUME_NAME, secret_name(secret), None);
            if let Some(source) = volume.secret.as_mut() {
                source.optional = Some(false);
            }
            volumes.push(volume);
        }
        volumes
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        let o = self.options;
        let mut mounts = Vec::new();
        if o.gateway_configuration_secret.is_some() {
            mounts.push(mount(
                EMBEDDED_CONFIGURATION_VOLUME_NAME,
                EMBEDDED_CONFIGURATION_MOUNT_PATH,
                true,
            ));
        }
        if o.https_certificate_secret.is_some() {
            mounts.push(mount(
                HTTPS_CERTIFICATES_VOLUME_NAME,
                HTTPS_CERTIFICATES_MOUNT_PATH,
                true,
            ));
        }
        if o.ca_certificate_secret.is_some() {
            mounts.push(mount(
                CA_CERTIFICATES_VOLUME_NAME,
                HTTPS_CERTIFICATES_MOUNT_PATH,
                true,
            ));
        }
        for policy in &o.custom_policies {
            mounts.push(mount(
                &policy_volume_name(&policy.name, &policy.version),
                &format!(
                    "{CUSTOM_POLICIES_MOUNT_BASE_PATH}/{}/{}",
                    policy.name, policy.version
                ),
                true,
            ));
        }
        for secret in &o.custom_environments {
            let name = secret_name(secret);
            mounts.push(mount(
                &custom_env_volume_name(name),
                &format!("{CUSTOM_ENVS_MOUNT_BASE_PATH}/{name}"),
                true,
            ));
        }
        if let Some(secret) = o.tracing.secret.as_ref().filter(|_| o.tracing.enabled) {
            mounts.push(mount(
                &tracing_volume_name(&o.tracing.library, secret_name(secret)),
                TRACING_CONFIG_MOUNT_BASE_PATH,
                false,
            ));
        }
        if o.opentelemetry.enabled {
            mounts.push(mount(
                OPENTELEMETRY_VOLUME_NAME,
                OPENTELEMETRY_MOUNT_BASE_PATH,
                true,
            ));
        }
        mounts
    }

    /// Container environment, in a stable order
    fn env(&self) -> Vec<EnvVar> {
        let o = self.options;
        let s = &o.spec;
        let mut env = Vec::new();
        if let Some(secret) = &o.admin_portal_secret {
            env.push(env_from_secret(
                "THREESCALE_PORTAL_ENDPOINT",
                secret_name(secret),
                ADMIN_PORTAL_URL_KEY,
            ));
        }
        let mut set = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                env.push(env_value(name, value));
            }
        };

        set("THREESCALE_DEPLOYMENT_ENV", s.deployment_environment.clone());
        set("RESOLVER", s.dns_resolver_address.clone());
        set(
            "APICAST_SERVICES_LIST",
            s.enabled_services
                .as_ref()
                .map(|services| services.join(","))
                .filter(|joined| !joined.is_empty()),
        );
        set("APICAST_CONFIGURATION_LOADER", s.configuration_load_mode.clone());
        set("APICAST_LOG_LEVEL", s.log_level.clone());
        set("APICAST_PATH_ROUTING", s.path_routing_enabled.map(|v| v.to_string()));
        set("APICAST_RESPONSE_CODES", s.response_codes_included.map(|v| v.to_string()));
        set(
            "APICAST_CONFIGURATION_CACHE",
            s.cache_configuration_seconds.map(|v| v.to_string()),
        );
        set("APICAST_MANAGEMENT_API", s.management_api_scope.clone());
        set(
            "OPENSSL_VERIFY",
            s.openssl_peer_verification_enabled.map(|v| v.to_string()),
        );
        set(
            "THREESCALE_CONFIG_FILE",
            o.gateway_configuration_secret.as_ref().map(|_| {
                format!("{EMBEDDED_CONFIGURATION_MOUNT_PATH}/{EMBEDDED_CONFIGURATION_KEY}")
            }),
        );
        set("APICAST_UPSTREAM_RETRY_CASES", s.upstream_retry_cases.clone());
        set("APICAST_CACHE_MAX_TIME", s.cache_max_time.clone());
        set("APICAST_CACHE_STATUS_CODES", s.cache_status_codes.clone());
        set("APICAST_SERVICE_CACHE_SIZE", s.service_cache_size.map(|v| v.to_string()));
        set("APICAST_OIDC_LOG_LEVEL", s.oidc_log_level.clone());
        set(
            "APICAST_LOAD_SERVICES_WHEN_NEEDED",
            s.load_services_when_needed.map(|v| v.to_string()),
        );
        set("APICAST_SERVICES_FILTER_BY_URL", s.services_filter_by_url.clone());
        for (service_id, version) in s.service_configuration_version_override.iter().flatten() {
            set(
                &format!("APICAST_SERVICE_{service_id}_CONFIGURATION_VERSION"),
                Some(version.clone()),
            );
        }
        set("APICAST_HTTPS_PORT", o.https_port.map(|v| v.to_string()));
        set("APICAST_HTTPS_VERIFY_DEPTH", s.https_verify_depth.map(|v| v.to_string()));
        if o.https_certificate_secret.is_some() {
            set(
                "APICAST_HTTPS_CERTIFICATE",
                Some(format!("{HTTPS_CERTIFICATES_MOUNT_PATH}/{TLS_CERT_KEY}")),
            );
            set(
                "APICAST_HTTPS_CERTIFICATE_KEY",
                Some(format!("{HTTPS_CERTIFICATES_MOUNT_PATH}/{TLS_PRIVATE_KEY_KEY}")),
            );
        }
        set(
            "SSL_CERT_FILE",
            o.ca_certificate_secret
                .as_ref()
                .map(|_| format!("{HTTPS_CERTIFICATES_MOUNT_PATH}/{CA_BUNDLE_KEY}")),
        );
        set("APICAST_WORKERS", s.workers.map(|v| v.to_string()));
        set("TZ", s.timezone.clone());
        set("APICAST_EXTENDED_METRICS", s.extended_metrics.map(|v| v.to_string()));

        let custom_env_paths: Vec<String> = o
            .custom_environments
            .iter()
            .flat_map(|secret| {
                let name = secret_name(secret);
                secret
                    .data
                    .iter()
                    .flat_map(|data| data.keys())
                    .map(move |key| format!("{CUSTOM_ENVS_MOUNT_BASE_PATH}/{name}/{key}"))
            })
            .collect();
        set(
            "APICAST_ENVIRONMENT",
            (!custom_env_paths.is_empty()).then(|| custom_env_paths.join(":")),
        );

        if o.tracing.enabled {
            set("OPENTRACING_TRACER", Some(o.tracing.library.clone()));
            set(
                "OPENTRACING_CONFIG",
                o.tracing.secret.as_ref().map(|secret| {
                    format!(
                        "{TRACING_CONFIG_MOUNT_BASE_PATH}/{}",
                        tracing_volume_name(&o.tracing.library, secret_name(secret))
                    )
                }),
            );
        }

        set("ALL_PROXY", s.all_proxy.clone());
        set("HTTP_PROXY", s.http_proxy.clone());
        set("HTTPS_PROXY", s.https_proxy.clone());
        set("NO_PROXY", s.no_proxy.clone());

        if o.opentelemetry.enabled {
            set("OPENTELEMETRY", Some("1".to_string()));
            set("OPENTELEMETRY_CONFIG", Some(o.opentelemetry.config_file.clone()));
        }

        env
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn secret_name(secret: &Secret) -> &str {
    secret.metadata.name.as_deref().unwrap_or_default()
}

/// Lowercase and keep only characters valid in a DNS-1123 label
fn dns1123(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

pub fn policy_volume_name(name: &str, version: &str) -> String {
    format!("policy-{}-{}", dns1123(version), dns1123(name))
}

pub fn custom_env_volume_name(secret_name: &str) -> String {
    format!("custom-env-{secret_name}")
}

pub fn tracing_volume_name(library: &str, secret_name: &str) -> String {
    format!("tracing-config-{library}-{secret_name}")
}

fn env_value(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        value_from: None,
    }
}

fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::String(name.to_string())),
        ..Default::default()
    }
}

fn probe(path: &str, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(DEFAULT_MANAGEMENT_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(5),
        period_seconds: Some(period),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str, item: Option<(&str, &str)>) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            items: item.map(|(key, path)| {
                vec![KeyToPath {
                    key: key.to_string(),
                    path: path.to_string(),
                    mode: None,
                }]
            }),
            default_mode: Some(DEFAULT_SECRET_VOLUME_MODE),
            optional: None,
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::convergence::MemoryStore;
    use crate::controller::options::OptionsProvider;
    use crate::crd::{
        APIcast, APIcastSpec, CustomEnvironment, CustomPolicy, ExposedHost, OpenTracing, SecretRef,
    };
    use kube::api::ObjectMeta as Meta;

    fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: Meta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            string_data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    async fn options(spec: APIcastSpec) -> GatewayOptions {
        let store = MemoryStore::new();
        store
            .seed(secret("portal", &[("AdminPortalURL", "https://token@admin.example.com")]))
            .unwrap();
        store
            .seed(secret("policy", &[("init.lua", "--"), ("apicast-policy.json", "{}")]))
            .unwrap();
        store
            .seed(secret("envs", &[("b.lua", "--"), ("a.lua", "--")]))
            .unwrap();
        store.seed(secret("tracing", &[("config", "{}")])).unwrap();

        let mut cr = APIcast::new("gw", spec);
        cr.metadata.namespace = Some("ns".to_string());
        cr.metadata.uid = Some("cr-uid".to_string());
        OptionsProvider::gateway_options(&cr, &store).await.unwrap()
    }

    fn portal_spec() -> APIcastSpec {
        APIcastSpec {
            admin_portal_credentials_ref: Some(SecretRef::new("portal")),
            ..Default::default()
        }
    }

    fn env_names(deployment: &Deployment) -> Vec<String> {
        container(deployment)
            .env
            .iter()
            .flatten()
            .map(|e| e.name.clone())
            .collect()
    }

    fn env_value_of(deployment: &Deployment, name: &str) -> Option<String> {
        container(deployment)
            .env
            .iter()
            .flatten()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    }

    fn container(deployment: &Deployment) -> &Container {
        &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    mod deployment_tests {
        use super::*;

        #[tokio::test]
        async fn test_minimal_deployment_shape() {
            let options = options(portal_spec()).await;
            let deployment = ResourceBuilder::new(&options).deployment(&BTreeMap::new());
            let spec = deployment.spec.as_ref().unwrap();

            assert_eq!(deployment.metadata.name.as_deref(), Some("apicast-gw"));
            assert_eq!(spec.replicas, Some(1));
            assert_eq!(
                spec.selector.match_labels.as_ref().unwrap()["deployment"],
                "apicast-gw"
            );
            let annotations = spec.template.metadata.as_ref().unwrap().annotations.as_ref().unwrap();
            assert_eq!(annotations["prometheus.io/port"], "9421");

            let c = container(&deployment);
            assert_eq!(c.name, "apicast-gw");
            assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));
            assert_eq!(c.ports.as_ref().unwrap().len(), 3);
            assert_eq!(
                c.liveness_probe.as_ref().unwrap().http_get.as_ref().unwrap().path.as_deref(),
                Some("/status/live")
            );
            assert!(c.volume_mounts.is_none());
            assert_eq!(env_names(&deployment), vec!["THREESCALE_PORTAL_ENDPOINT"]);
            assert_eq!(
                deployment.metadata.owner_references.as_ref().unwrap()[0].uid,
                "cr-uid"
            );
        }

        #[tokio::test]
        async fn test_hpa_leaves_replicas_unset() {
            let options = options(APIcastSpec {
                hpa: true,
                replicas: Some(3),
                ..portal_spec()
            })
            .await;
            let deployment = ResourceBuilder::new(&options).deployment(&BTreeMap::new());
            assert_eq!(deployment.spec.unwrap().replicas, None);
        }

        #[tokio::test]
        async fn test_watched_annotations_are_merged() {
            let options = options(portal_spec()).await;
            let watched = BTreeMap::from([(
                "apicast.apps.3scale.net/admin-portal-secret-resource-version".to_string(),
                "7".to_string(),
            )]);
            let deployment = ResourceBuilder::new(&options).deployment(&watched);
            let annotations = deployment
                .spec
                .unwrap()
                .template
                .metadata
                .unwrap()
                .annotations
                .unwrap();
            assert_eq!(annotations.len(), 3);
            assert_eq!(
                annotations["apicast.apps.3scale.net/admin-portal-secret-resource-version"],
                "7"
            );
        }

        #[tokio::test]
        async fn test_env_follows_fixed_order() {
            let options = options(APIcastSpec {
                log_level: Some("debug".to_string()),
                dns_resolver_address: Some("8.8.8.8".to_string()),
                enabled_services: Some(vec!["1".to_string(), "2".to_string()]),
                no_proxy: Some("localhost".to_string()),
                service_configuration_version_override: Some(BTreeMap::from([
                    ("20".to_string(), "3".to_string()),
                    ("10".to_string(), "1".to_string()),
                ])),
                ..portal_spec()
            })
            .await;
            let deployment = ResourceBuilder::new(&options).deployment(&BTreeMap::new());

            assert_eq!(
                env_names(&deployment),
                vec![
                    "THREESCALE_PORTAL_ENDPOINT",
                    "RESOLVER",
                    "APICAST_SERVICES_LIST",
                    "APICAST_LOG_LEVEL",
                    "APICAST_SERVICE_10_CONFIGURATION_VERSION",
                    "APICAST_SERVICE_20_CONFIGURATION_VERSION",
                    "NO_PROXY",
                ]
            );
            assert_eq!(
                env_value_of(&deployment, "APICAST_SERVICES_LIST").as_deref(),
                Some("1,2")
            );
        }

        #[tokio::test]
        async fn test_custom_policy_and_environment_mounts() {
            let options = options(APIcastSpec {
                custom_policies: vec![CustomPolicy {
                    name: "My_Policy".to_string(),
                    version: "0.1".to_string(),
                    secret_ref: Some(SecretRef::new("policy")),
                }],
                custom_environments: vec![CustomEnvironment {
                    secret_ref: Some(SecretRef::new("envs")),
                }],
                ..portal_spec()
            })
            .await;
            let deployment = ResourceBuilder::new(&options).deployment(&BTreeMap::new());
            let mounts = container(&deployment).volume_mounts.clone().unwrap();

            assert_eq!(mounts[0].name, "policy-01-mypolicy");
            assert_eq!(mounts[0].mount_path, "/opt/app-root/src/policies/My_Policy/0.1");
            assert_eq!(mounts[1].name, "custom-env-envs");
            assert_eq!(
                env_value_of(&deployment, "APICAST_ENVIRONMENT").as_deref(),
                Some(
                    "/opt/app-root/src/custom-environments/envs/a.lua:\
                     /opt/app-root/src/custom-environments/envs/b.lua"
                )
            );
        }

        #[tokio::test]
        async fn test_tracing_volume_and_env() {
            let options = options(APIcastSpec {
                open_tracing: Some(OpenTracing {
                    enabled: Some(true),
                    tracing_library: None,
                    tracing_config_secret_ref: Some(SecretRef::new("tracing")),
                }),
                ..portal_spec()
            })
            .await;
            let deployment = ResourceBuilder::new(&options).deployment(&BTreeMap::new());
            let volumes = deployment
                .spec
                .as_ref()
                .unwrap()
                .template
                .spec
                .as_ref()
                .unwrap()
                .volumes
                .clone()
                .unwrap();

            assert_eq!(volumes[0].name, "tracing-config-jaeger-tracing");
            let items = volumes[0].secret.as_ref().unwrap().items.as_ref().unwrap();
            assert_eq!(items[0].path, "tracing-config-jaeger-tracing");
            assert_eq!(
                env_value_of(&deployment, "OPENTRACING_CONFIG").as_deref(),
                Some("/opt/app-root/src/tracing-configs/tracing-config-jaeger-tracing")
            );
        }
    }

    mod service_tests {
        use super::*;

        #[tokio::test]
        async fn test_service_ports_and_selector() {
            let options = options(portal_spec()).await;
            let service = ResourceBuilder::new(&options).service();
            let spec = service.spec.unwrap();
            let ports = spec.ports.unwrap();

            assert_eq!(ports.len(), 2);
            assert_eq!(ports[0].port, 8080);
            assert_eq!(ports[0].target_port, Some(IntOrString::String("proxy".into())));
            assert_eq!(spec.selector.unwrap()["deployment"], "apicast-gw");
        }

        #[test]
        fn test_dns1123_strips_invalid_characters() {
            assert_eq!(dns1123("My_Policy.v2"), "mypolicyv2");
            assert_eq!(policy_volume_name("a-b", "1.0"), "policy-10-a-b");
        }
    }

    mod ingress_tests {
        use super::*;

        #[tokio::test]
        async fn test_ingress_without_host_is_bare_marker() {
            let options = options(portal_spec()).await;
            let ingress = ResourceBuilder::new(&options).ingress();
            assert_eq!(ingress.metadata.name.as_deref(), Some("apicast-gw"));
            assert!(ingress.spec.is_none());
        }

        #[tokio::test]
        async fn test_ingress_routes_host_to_proxy_port() {
            let options = options(APIcastSpec {
                exposed_host: Some(ExposedHost {
                    host: "gw.example.com".to_string(),
                    tls: None,
                    ingress_class_name: Some("nginx".to_string()),
                }),
                ..portal_spec()
            })
            .await;
            let spec = ResourceBuilder::new(&options).ingress().spec.unwrap();
            let rule = &spec.rules.unwrap()[0];
            let path = &rule.http.as_ref().unwrap().paths[0];

            assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
            assert_eq!(rule.host.as_deref(), Some("gw.example.com"));
            assert_eq!(path.path_type, "ImplementationSpecific");
            let backend = path.backend.service.as_ref().unwrap();
            assert_eq!(backend.name, "apicast-gw");
            assert_eq!(backend.port.as_ref().unwrap().name.as_deref(), Some("proxy"));
        }
    }

    mod autoscaling_tests {
        use super::*;
        use crate::crd::PodDisruptionBudgetSpec as PdbSettings;

        #[tokio::test]
        async fn test_hpa_targets_workload() {
            let options = options(portal_spec()).await;
            let hpa = ResourceBuilder::new(&options).horizontal_pod_autoscaler();
            let spec = hpa.spec.unwrap();

            assert_eq!(hpa.metadata.name.as_deref(), Some("gw"));
            assert_eq!(spec.scale_target_ref.name, "apicast-gw");
            assert_eq!(spec.max_replicas, 5);
            let metrics = spec.metrics.unwrap();
            assert_eq!(metrics[0].resource.as_ref().unwrap().name, "memory");
            assert_eq!(metrics[1].resource.as_ref().unwrap().name, "cpu");
        }

        #[tokio::test]
        async fn test_pdb_defaults_to_one_unavailable() {
            let options = options(APIcastSpec {
                pod_disruption_budget: Some(PdbSettings {
                    enabled: true,
                    ..Default::default()
                }),
                ..portal_spec()
            })
            .await;
            let spec = ResourceBuilder::new(&options).pod_disruption_budget().spec.unwrap();
            assert_eq!(spec.max_unavailable, Some(IntOrString::Int(1)));
            assert_eq!(spec.min_available, None);
        }

        #[tokio::test]
        async fn test_pdb_uses_explicit_min_available() {
            let options = options(APIcastSpec {
                pod_disruption_budget: Some(PdbSettings {
                    enabled: true,
                    min_available: Some(IntOrString::String("50%".into())),
                    max_unavailable: None,
                }),
                ..portal_spec()
            })
            .await;
            let spec = ResourceBuilder::new(&options).pod_disruption_budget().spec.unwrap();
            assert_eq!(spec.min_available, Some(IntOrString::String("50%".into())));
            assert_eq!(spec.max_unavailable, None);
        }
    }

    #[tokio::test]
    async fn test_hashed_secret_has_no_owner() {
        let options = options(portal_spec()).await;
        let secret = ResourceBuilder::new(&options)
            .hashed_secret(BTreeMap::from([("portal".to_string(), "abc".to_string())]));
        assert_eq!(secret.metadata.name.as_deref(), Some("hashed-secret-data"));
        assert!(secret.metadata.owner_references.is_none());
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    }
}
