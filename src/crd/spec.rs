//! # APIcast Spec
//!
//! Main CRD specification types.

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration, TopologySpreadConstraint};
use k8s_openapi::api::networking::v1::IngressTLS;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::{json_schema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// APIcast Custom Resource Definition
///
/// Declares one APIcast gateway. The controller derives a Deployment and a
/// Service named `apicast-<name>` from it, plus optional Ingress,
/// HorizontalPodAutoscaler and PodDisruptionBudget objects.
///
/// # Example
///
/// ```yaml
/// apiVersion: apps.3scale.net/v1alpha1
/// kind: APIcast
/// metadata:
///   name: example
///   namespace: gateways
/// spec:
///   adminPortalCredentialsRef:
///     name: portal-endpoint
///   exposedHost:
///     host: api.example.com
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "APIcast",
    group = "apps.3scale.net",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::APIcastStatus",
    shortname = "apicast",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Image", "type":"string", "jsonPath":".status.image"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct APIcastSpec {
    /// Number of gateway replicas. Ignored while `hpa` is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i64>,
    /// Let a HorizontalPodAutoscaler own the replica count
    #[serde(default)]
    pub hpa: bool,
    /// Secret holding `AdminPortalURL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_portal_credentials_ref: Option<SecretRef>,
    /// Secret holding `config.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_configuration_secret_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Host exposed through an Ingress. No Ingress is kept when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_host: Option<ExposedHost>,

    // Gateway tuning, passed to the container as environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_resolver_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_load_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_routing_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_codes_included: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_configuration_seconds: Option<i64>,
    #[serde(default, rename = "managementAPIScope", skip_serializing_if = "Option::is_none")]
    pub management_api_scope: Option<String>,
    #[serde(default, rename = "openSSLPeerVerificationEnabled", skip_serializing_if = "Option::is_none")]
    pub openssl_peer_verification_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_retry_cases: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_max_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_status_codes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cache_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_services_when_needed: Option<bool>,
    #[serde(default, rename = "servicesFilterByURL", skip_serializing_if = "Option::is_none")]
    pub services_filter_by_url: Option<String>,
    /// Service ID to configuration version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_configuration_version_override: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_metrics: Option<bool>,

    /// Container resources. Defaults apply when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "object_schema")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_verify_depth: Option<i64>,
    /// Secret of type `kubernetes.io/tls`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_certificate_secret_ref: Option<SecretRef>,
    /// Secret holding `ca-bundle.crt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate_secret_ref: Option<SecretRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_policies: Vec<CustomPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_environments: Vec<CustomEnvironment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_tracing: Option<OpenTracing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_telemetry: Option<OpenTelemetry>,

    // Outbound proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,

    // Pod scheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "object_schema")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "object_list_schema")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "object_list_schema")]
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// PodDisruptionBudget for the gateway pods. Not created when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
}

/// Reference to a Secret in the CR's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SecretRef {
    #[serde(default)]
    pub name: String,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposedHost {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "object_list_schema")]
    pub tls: Option<Vec<IngressTLS>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomPolicy {
    pub name: String,
    pub version: String,
    /// Secret holding `init.lua` and `apicast-policy.json`
    #[serde(default)]
    pub secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomEnvironment {
    #[serde(default)]
    pub secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenTracing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Only `jaeger` is supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_config_secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenTelemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_config_secret_ref: Option<SecretRef>,
    /// Key of the config file in the secret. The first key in sorted order
    /// is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_config_secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string_schema")]
    pub min_available: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string_schema")]
    pub max_unavailable: Option<IntOrString>,
}

// Embedded core types are validated by the API server when the controller
// writes the derived objects, so the CRD keeps them opaque.
fn object_schema(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}

fn object_list_schema(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "array",
        "nullable": true,
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}

fn int_or_string_schema(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "nullable": true,
        "x-kubernetes-int-or-string": true
    })
}
