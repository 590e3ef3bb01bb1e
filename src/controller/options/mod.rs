//! # Options Provider
//!
//! Resolves an [`APIcast`] CR plus the secrets it references into
//! [`GatewayOptions`], the fully defaulted input of the resource builder.
//!
//! Every referenced secret is read once per pass through a [`SecretReader`]
//! and checked for the keys the gateway needs. The resolved secrets double
//! as the watched-secret set handed to the secret change tracker.

mod validation;

pub use validation::OptionsError;

use crate::constants::{
    APICAST_IMAGE_ENV, DEFAULT_APICAST_IMAGE, DEFAULT_HTTPS_PORT, DEFAULT_SERVICE_ACCOUNT,
    DEFAULT_TRACING_LIBRARY, DEPLOYMENT_SELECTOR_LABEL, LEGACY_SELECTOR_LABEL,
    OPENTELEMETRY_MOUNT_BASE_PATH, THREESCALE_RELEASE, WORKLOAD_NAME_PREFIX,
};
use crate::controller::convergence::ClusterStore;
use crate::controller::error::ConvergeError;
use crate::controller::secret_tracker::{SecretRole, WatchedSecret};
use crate::crd::{APIcast, APIcastSpec, ExposedHost, PodDisruptionBudgetSpec, SecretRef};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ResourceRequirements, Secret};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Read access to Secrets, the only cluster reads options resolution needs
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, ConvergeError>;
}

#[async_trait]
impl<S: ClusterStore> SecretReader for S {
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ConvergeError> {
        self.get::<Secret>(namespace, name).await
    }
}

#[derive(Debug, Clone)]
pub struct CustomPolicyOptions {
    pub name: String,
    pub version: String,
    pub secret: Secret,
}

#[derive(Debug, Clone, Default)]
pub struct TracingOptions {
    pub enabled: bool,
    pub library: String,
    pub secret: Option<Secret>,
}

#[derive(Debug, Clone, Default)]
pub struct OpenTelemetryOptions {
    pub enabled: bool,
    pub secret: Option<Secret>,
    /// Absolute path of the config file inside the container
    pub config_file: String,
}

/// Everything the resource builder needs, with defaults applied
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub name: String,
    pub namespace: String,
    pub owner: OwnerReference,
    pub deployment_name: String,
    pub service_name: String,
    pub replicas: i32,
    pub hpa: bool,
    pub service_account_name: String,
    pub image: String,
    pub pod_label_selector: BTreeMap<String, String>,
    pub common_labels: BTreeMap<String, String>,
    pub pod_template_labels: BTreeMap<String, String>,
    pub exposed_host: Option<ExposedHost>,
    pub resources: ResourceRequirements,
    pub https_port: Option<i32>,
    pub admin_portal_secret: Option<Secret>,
    pub gateway_configuration_secret: Option<Secret>,
    pub https_certificate_secret: Option<Secret>,
    pub ca_certificate_secret: Option<Secret>,
    pub custom_policies: Vec<CustomPolicyOptions>,
    pub custom_environments: Vec<Secret>,
    pub tracing: TracingOptions,
    pub opentelemetry: OpenTelemetryOptions,
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
    /// Gateway tuning values passed through to the container environment
    pub spec: APIcastSpec,
}

impl GatewayOptions {
    /// Secrets whose changes may roll the gateway, tagged with their role
    pub fn watched_secrets(&self) -> Vec<WatchedSecret> {
        let mut watched = Vec::new();
        let mut push = |role, secret: &Option<Secret>| {
            if let Some(secret) = secret {
                watched.push(WatchedSecret::new(role, secret.clone()));
            }
        };
        push(SecretRole::AdminPortal, &self.admin_portal_secret);
        push(SecretRole::GatewayConfiguration, &self.gateway_configuration_secret);
        push(SecretRole::HttpsCertificate, &self.https_certificate_secret);
        push(SecretRole::CaCertificate, &self.ca_certificate_secret);
        if self.tracing.enabled {
            push(SecretRole::OpenTracing, &self.tracing.secret);
        }
        if self.opentelemetry.enabled {
            push(SecretRole::OpenTelemetry, &self.opentelemetry.secret);
        }
        for secret in &self.custom_environments {
            watched.push(WatchedSecret::new(SecretRole::CustomEnvironment, secret.clone()));
        }
        for policy in &self.custom_policies {
            watched.push(WatchedSecret::new(SecretRole::CustomPolicy, policy.secret.clone()));
        }
        watched
    }

    /// UIDs of every secret the CR references, watched or not
    pub fn secret_uids(&self) -> BTreeSet<String> {
        let mut secrets: Vec<&Secret> = Vec::new();
        secrets.extend(self.admin_portal_secret.iter());
        secrets.extend(self.gateway_configuration_secret.iter());
        secrets.extend(self.https_certificate_secret.iter());
        secrets.extend(self.ca_certificate_secret.iter());
        secrets.extend(self.tracing.secret.iter());
        secrets.extend(self.opentelemetry.secret.iter());
        secrets.extend(self.custom_environments.iter());
        secrets.extend(self.custom_policies.iter().map(|p| &p.secret));
        secrets
            .into_iter()
            .filter_map(|s| s.metadata.uid.clone())
            .collect()
    }
}

/// `apicast-<name>`, shared by the Deployment, Service, Ingress and PDB
pub fn workload_name(cr_name: &str) -> String {
    format!("{WORKLOAD_NAME_PREFIX}{cr_name}")
}

/// Gateway image used when the CR does not pin one
pub fn default_image() -> String {
    std::env::var(APICAST_IMAGE_ENV)
        .ok()
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| DEFAULT_APICAST_IMAGE.to_string())
}

/// Product metering labels stamped on the gateway pods
pub fn metering_labels() -> BTreeMap<String, String> {
    [
        ("com.company", "Red_Hat"),
        ("rht.prod_name", "Red_Hat_Integration"),
        ("rht.prod_ver", "2021.Q4"),
        ("rht.comp", "3scale_apicast"),
        (LEGACY_SELECTOR_LABEL, THREESCALE_RELEASE),
        ("rht.subcomp", "apicast"),
        ("rht.subcomp_t", "application"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn common_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "apicast".to_string()),
        ("threescale_component".to_string(), "apicast".to_string()),
    ])
}

/// Container resources applied when the CR does not set any. With an
/// autoscaler the requests equal the limits so utilization targets are
/// computed against the full allowance.
pub fn default_resources(hpa: bool) -> ResourceRequirements {
    let list = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    let limits = list("1", "128Mi");
    let requests = if hpa {
        limits.clone()
    } else {
        list("500m", "64Mi")
    };
    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

/// Builds [`GatewayOptions`] for one CR
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsProvider;

impl OptionsProvider {
    pub async fn gateway_options<R>(cr: &APIcast, secrets: &R) -> Result<GatewayOptions, OptionsError>
    where
        R: SecretReader + ?Sized,
    {
        let spec = &cr.spec;
        let name = cr.name_any();
        let namespace = cr.namespace().ok_or(OptionsError::MissingNamespace)?;
        let owner = cr.owner_reference().ok_or(OptionsError::MissingUid)?;
        let deployment_name = workload_name(&name);

        let pod_label_selector = BTreeMap::from([(
            DEPLOYMENT_SELECTOR_LABEL.to_string(),
            deployment_name.clone(),
        )]);
        let mut pod_template_labels = metering_labels();
        pod_template_labels.extend(pod_label_selector.clone());

        let resolver = validation::Resolver {
            secrets,
            namespace: &namespace,
        };

        let admin_portal_secret = match &spec.admin_portal_credentials_ref {
            Some(secret_ref) => Some(resolver.admin_portal(secret_ref).await?),
            None => None,
        };
        let gateway_configuration_secret = match &spec.embedded_configuration_secret_ref {
            Some(secret_ref) => Some(resolver.embedded_configuration(secret_ref).await?),
            None => None,
        };
        if admin_portal_secret.is_none() && gateway_configuration_secret.is_none() {
            return Err(OptionsError::invalid(
                "spec",
                "one of adminPortalCredentialsRef or embeddedConfigurationSecretRef is required",
            ));
        }

        let https_certificate_secret = match &spec.https_certificate_secret_ref {
            Some(secret_ref) => Some(resolver.https_certificate(secret_ref).await?),
            None => None,
        };
        let ca_certificate_secret = match &spec.ca_certificate_secret_ref {
            Some(secret_ref) => Some(resolver.ca_certificate(secret_ref).await?),
            None => None,
        };

        let mut custom_policies = Vec::with_capacity(spec.custom_policies.len());
        for (idx, policy) in spec.custom_policies.iter().enumerate() {
            let secret = resolver
                .custom_policy(idx, policy.secret_ref.as_ref())
                .await?;
            custom_policies.push(CustomPolicyOptions {
                name: policy.name.clone(),
                version: policy.version.clone(),
                secret,
            });
        }

        let mut custom_environments = Vec::with_capacity(spec.custom_environments.len());
        for (idx, env) in spec.custom_environments.iter().enumerate() {
            custom_environments.push(
                resolver
                    .custom_environment(idx, env.secret_ref.as_ref())
                    .await?,
            );
        }

        let tracing = Self::tracing(cr, &resolver).await?;
        let opentelemetry = Self::opentelemetry(cr, &resolver).await?;

        let https_port = spec.https_port.or_else(|| {
            spec.https_certificate_secret_ref
                .as_ref()
                .map(|_| DEFAULT_HTTPS_PORT)
        });

        let options = GatewayOptions {
            name,
            namespace,
            owner,
            service_name: deployment_name.clone(),
            deployment_name,
            replicas: spec
                .replicas
                .map_or(1, |r| i32::try_from(r).unwrap_or(i32::MAX)),
            hpa: spec.hpa,
            service_account_name: spec
                .service_account
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string()),
            image: spec.image.clone().unwrap_or_else(default_image),
            pod_label_selector,
            common_labels: common_labels(),
            pod_template_labels,
            exposed_host: spec.exposed_host.clone(),
            resources: spec
                .resources
                .clone()
                .unwrap_or_else(|| default_resources(spec.hpa)),
            https_port,
            admin_portal_secret,
            gateway_configuration_secret,
            https_certificate_secret,
            ca_certificate_secret,
            custom_policies,
            custom_environments,
            tracing,
            opentelemetry,
            pod_disruption_budget: spec
                .pod_disruption_budget
                .clone()
                .filter(|pdb| pdb.enabled),
            spec: spec.clone(),
        };
        debug!(
            "Resolved options for {}/{} ({} watched secrets)",
            options.namespace,
            options.name,
            options.watched_secrets().len()
        );
        Ok(options)
    }

    async fn tracing<R>(
        cr: &APIcast,
        resolver: &validation::Resolver<'_, R>,
    ) -> Result<TracingOptions, OptionsError>
    where
        R: SecretReader + ?Sized,
    {
        let mut options = TracingOptions {
            enabled: cr.open_tracing_enabled(),
            library: DEFAULT_TRACING_LIBRARY.to_string(),
            secret: None,
        };
        let Some(spec) = cr.spec.open_tracing.as_ref().filter(|_| options.enabled) else {
            return Ok(options);
        };
        if let Some(library) = &spec.tracing_library {
            if library != DEFAULT_TRACING_LIBRARY {
                return Err(OptionsError::invalid(
                    "spec.openTracing.tracingLibrary",
                    "invalid tracing library specified",
                ));
            }
            options.library.clone_from(library);
        }
        if let Some(secret_ref) = &spec.tracing_config_secret_ref {
            options.secret = Some(resolver.tracing_config(secret_ref).await?);
        }
        Ok(options)
    }

    async fn opentelemetry<R>(
        cr: &APIcast,
        resolver: &validation::Resolver<'_, R>,
    ) -> Result<OpenTelemetryOptions, OptionsError>
    where
        R: SecretReader + ?Sized,
    {
        if !cr.open_telemetry_enabled() {
            return Ok(OpenTelemetryOptions::default());
        }
        let spec = cr.spec.open_telemetry.as_ref();
        let secret_ref = spec
            .and_then(|s| s.tracing_config_secret_ref.as_ref())
            .filter(|r: &&SecretRef| !r.name.is_empty())
            .ok_or_else(|| {
                OptionsError::invalid(
                    "spec.openTelemetry.tracingConfigSecretRef",
                    "tracing config secret name is empty",
                )
            })?;
        let key = spec
            .and_then(|s| s.tracing_config_secret_key.clone())
            .filter(|k| !k.is_empty());

        let (secret, config_key) = resolver.opentelemetry_config(secret_ref, key).await?;
        Ok(OpenTelemetryOptions {
            enabled: true,
            secret: Some(secret),
            config_file: format!("{OPENTELEMETRY_MOUNT_BASE_PATH}/{config_key}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CustomPolicy, OpenTelemetry};
    use k8s_openapi::ByteString;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Secrets(Mutex<BTreeMap<String, Secret>>);

    impl Secrets {
        fn with(self, name: &str, data: &[(&str, &str)]) -> Self {
            let secret = Secret {
                metadata: kube::api::ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some("ns".to_string()),
                    uid: Some(format!("uid-{name}")),
                    ..Default::default()
                },
                data: Some(
                    data.iter()
                        .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                        .collect(),
                ),
                ..Default::default()
            };
            self.0.lock().unwrap().insert(name.to_string(), secret);
            self
        }
    }

    #[async_trait]
    impl SecretReader for Secrets {
        async fn read_secret(
            &self,
            _namespace: &str,
            name: &str,
        ) -> Result<Option<Secret>, ConvergeError> {
            Ok(self.0.lock().unwrap().get(name).cloned())
        }
    }

    fn cr(spec: APIcastSpec) -> APIcast {
        let mut cr = APIcast::new("gw", spec);
        cr.metadata.namespace = Some("ns".to_string());
        cr.metadata.uid = Some("cr-uid".to_string());
        cr
    }

    fn portal_spec() -> APIcastSpec {
        APIcastSpec {
            admin_portal_credentials_ref: Some(SecretRef::new("portal")),
            ..Default::default()
        }
    }

    fn portal() -> Secrets {
        Secrets::default().with("portal", &[("AdminPortalURL", "https://token@admin.example.com")])
    }

    #[tokio::test]
    async fn test_defaults_are_applied() {
        let options = OptionsProvider::gateway_options(&cr(portal_spec()), &portal())
            .await
            .unwrap();

        assert_eq!(options.deployment_name, "apicast-gw");
        assert_eq!(options.service_name, "apicast-gw");
        assert_eq!(options.replicas, 1);
        assert_eq!(options.service_account_name, "default");
        assert_eq!(options.https_port, None);
        assert_eq!(options.pod_label_selector["deployment"], "apicast-gw");
        assert_eq!(options.pod_template_labels["rht.comp_ver"], THREESCALE_RELEASE);
        assert_eq!(options.pod_template_labels["deployment"], "apicast-gw");
        assert_eq!(options.owner.uid, "cr-uid");
        assert_eq!(
            options.resources.requests.as_ref().unwrap()["cpu"],
            Quantity("500m".to_string())
        );
    }

    #[tokio::test]
    async fn test_hpa_defaults_requests_to_limits() {
        let spec = APIcastSpec {
            hpa: true,
            ..portal_spec()
        };
        let options = OptionsProvider::gateway_options(&cr(spec), &portal())
            .await
            .unwrap();
        assert_eq!(options.resources.requests, options.resources.limits);
    }

    #[tokio::test]
    async fn test_one_configuration_source_required() {
        let err = OptionsProvider::gateway_options(&cr(APIcastSpec::default()), &Secrets::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OptionsError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_portal_url_needs_access_token() {
        let secrets =
            Secrets::default().with("portal", &[("AdminPortalURL", "https://admin.example.com")]);
        let err = OptionsProvider::gateway_options(&cr(portal_spec()), &secrets)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access Token"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_reported() {
        let err = OptionsProvider::gateway_options(&cr(portal_spec()), &Secrets::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OptionsError::SecretNotFound { .. }));
    }

    #[tokio::test]
    async fn test_https_port_defaults_with_certificate() {
        let spec = APIcastSpec {
            https_certificate_secret_ref: Some(SecretRef::new("tls")),
            ..portal_spec()
        };
        let mut secrets = portal().with("tls", &[("tls.crt", "c"), ("tls.key", "k")]);
        secrets
            .0
            .get_mut()
            .unwrap()
            .get_mut("tls")
            .unwrap()
            .type_ = Some("kubernetes.io/tls".to_string());

        let options = OptionsProvider::gateway_options(&cr(spec), &secrets)
            .await
            .unwrap();
        assert_eq!(options.https_port, Some(DEFAULT_HTTPS_PORT));
    }

    #[tokio::test]
    async fn test_watched_set_and_uids() {
        let spec = APIcastSpec {
            custom_policies: vec![CustomPolicy {
                name: "p".to_string(),
                version: "1".to_string(),
                secret_ref: Some(SecretRef::new("policy")),
            }],
            ..portal_spec()
        };
        let secrets = portal().with(
            "policy",
            &[("init.lua", "return {}"), ("apicast-policy.json", "{}")],
        );

        let options = OptionsProvider::gateway_options(&cr(spec), &secrets)
            .await
            .unwrap();
        let roles: Vec<_> = options.watched_secrets().iter().map(|w| w.role).collect();
        assert_eq!(roles, vec![SecretRole::AdminPortal, SecretRole::CustomPolicy]);
        assert_eq!(
            options.secret_uids(),
            BTreeSet::from(["uid-policy".to_string(), "uid-portal".to_string()])
        );
    }

    #[tokio::test]
    async fn test_opentelemetry_uses_first_sorted_key() {
        let spec = APIcastSpec {
            open_telemetry: Some(OpenTelemetry {
                enabled: Some(true),
                tracing_config_secret_ref: Some(SecretRef::new("otel")),
                tracing_config_secret_key: None,
            }),
            ..portal_spec()
        };
        let secrets = portal().with("otel", &[("z.json", "{}"), ("a.json", "{}")]);

        let options = OptionsProvider::gateway_options(&cr(spec), &secrets)
            .await
            .unwrap();
        assert_eq!(
            options.opentelemetry.config_file,
            "/opt/app-root/src/otel-configs/a.json"
        );
    }
}
