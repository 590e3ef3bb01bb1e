//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Runtime tunables can be overridden via environment variables (see
//! [`crate::config::ControllerConfig`]). Well-known names, label keys and
//! annotation keys are part of the on-cluster contract and are fixed.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default exponential backoff starting value for watch stream errors (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch stream errors (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Minimum Fibonacci backoff for failed reconciliations (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 5;

/// Maximum Fibonacci backoff for failed reconciliations (seconds)
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Requeue delay while a selector migration step is in flight (seconds)
pub const DEFAULT_MIGRATION_REQUEUE_SECS: u64 = 5;

/// Requeue delay after an optimistic concurrency conflict (seconds)
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 1;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "apicast-controller";

// ---------------------------------------------------------------------------
// Gateway workload
// ---------------------------------------------------------------------------

/// Prefix of every gateway Deployment/Service name (`apicast-<cr name>`)
pub const WORKLOAD_NAME_PREFIX: &str = "apicast-";

/// Reserved name of the temporary Deployment used during selector migration.
/// Must never match `apicast-<name>`.
pub const TEMP_DEPLOYMENT_NAME: &str = "tmp-upgrade-apicast";

/// Label added to the temporary Deployment selector and pod template
pub const TEMP_DEPLOYMENT_LABEL: &str = "3scale.io/temp";

/// Pod selector key shared by legacy, temporary and current Deployments
pub const DEPLOYMENT_SELECTOR_LABEL: &str = "deployment";

/// Legacy selector marker. Older releases put this versioned label into the
/// immutable Deployment selector.
pub const LEGACY_SELECTOR_LABEL: &str = "rht.comp_ver";

/// Name of the per-namespace Secret holding content hashes of watched secrets
pub const HASHED_SECRET_NAME: &str = "hashed-secret-data";

/// Label that opts a Secret into change-triggered restarts
pub const WATCHED_BY_LABEL: &str = "apicast.apps.3scale.net/watched-by";

/// Value written for [`WATCHED_BY_LABEL`] by tooling; presence of the key is what counts
pub const WATCHED_BY_VALUE: &str = "apicast";

/// Prefix of the CR labels that record which secrets (by UID) the CR references
pub const SECRET_LABEL_PREFIX: &str = "secret.apicast.apps.3scale.net/";

/// Value of every [`SECRET_LABEL_PREFIX`] label
pub const SECRET_LABEL_VALUE: &str = "true";

/// Default gateway image, overridable with `RELATED_IMAGE_APICAST`
pub const DEFAULT_APICAST_IMAGE: &str = "quay.io/3scale/3scale212:apicast-3scale-2.12.0-GA";

/// Environment variable overriding the default gateway image
pub const APICAST_IMAGE_ENV: &str = "RELATED_IMAGE_APICAST";

/// Release recorded in the metering labels
pub const THREESCALE_RELEASE: &str = "2.12";

pub const DEFAULT_HTTP_PORT: i32 = 8080;
pub const DEFAULT_HTTPS_PORT: i32 = 8443;
pub const DEFAULT_MANAGEMENT_PORT: i32 = 8090;
pub const DEFAULT_GATEWAY_METRICS_PORT: i32 = 9421;

pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
pub const DEFAULT_TRACING_LIBRARY: &str = "jaeger";

// Required secret keys
pub const ADMIN_PORTAL_URL_KEY: &str = "AdminPortalURL";
pub const EMBEDDED_CONFIGURATION_KEY: &str = "config.json";
pub const TRACING_CONFIG_KEY: &str = "config";
pub const CUSTOM_POLICY_INIT_KEY: &str = "init.lua";
pub const CUSTOM_POLICY_MANIFEST_KEY: &str = "apicast-policy.json";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

// Mount paths
pub const EMBEDDED_CONFIGURATION_MOUNT_PATH: &str = "/tmp/gateway-configuration-volume";
pub const EMBEDDED_CONFIGURATION_VOLUME_NAME: &str = "gateway-configuration-volume";
pub const HTTPS_CERTIFICATES_MOUNT_PATH: &str = "/var/run/secrets/apicast";
pub const HTTPS_CERTIFICATES_VOLUME_NAME: &str = "https-certificates";
pub const CA_CERTIFICATES_VOLUME_NAME: &str = "ca-certificate";
pub const CUSTOM_POLICIES_MOUNT_BASE_PATH: &str = "/opt/app-root/src/policies";
pub const CUSTOM_ENVS_MOUNT_BASE_PATH: &str = "/opt/app-root/src/custom-environments";
pub const TRACING_CONFIG_MOUNT_BASE_PATH: &str = "/opt/app-root/src/tracing-configs";
pub const OPENTELEMETRY_VOLUME_NAME: &str = "otel-volume";
pub const OPENTELEMETRY_MOUNT_BASE_PATH: &str = "/opt/app-root/src/otel-configs";

// Resource-version annotations written on the pod template
pub const ADMIN_PORTAL_SECRET_ANNOTATION: &str =
    "apicast.apps.3scale.net/admin-portal-secret-resource-version";
pub const GATEWAY_CONFIGURATION_SECRET_ANNOTATION: &str =
    "apicast.apps.3scale.net/gateway-configuration-secret-resource-version";
pub const HTTPS_CERT_SECRET_ANNOTATION: &str =
    "apicast.apps.3scale.net/https-cert-secret-resource-version";
pub const CA_CERT_SECRET_ANNOTATION: &str =
    "apicast.apps.3scale.net/ca-cert-secret-resource-version";
pub const OPENTRACING_SECRET_ANNOTATION: &str =
    "apicast.apps.3scale.net/opentracing-secret-resource-version";
pub const OPENTELEMETRY_SECRET_ANNOTATION: &str =
    "apicast.apps.3scale.net/opentelemetry-secret-resource-version";
pub const CUSTOM_ENV_SECRET_ANNOTATION_PREFIX: &str =
    "apicast.apps.3scale.net/customenv-secret-resource-version-";
pub const CUSTOM_POLICY_SECRET_ANNOTATION_PREFIX: &str =
    "apicast.apps.3scale.net/custompolicy-secret-resource-version-";

/// CR annotation recording the controller version that last reconciled it
pub const OPERATOR_VERSION_ANNOTATION: &str = "apicast.apps.3scale.net/operator-version";

/// Value written for [`OPERATOR_VERSION_ANNOTATION`]
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

// Status conditions
pub const READY_CONDITION: &str = "Ready";
pub const WARNING_CONDITION: &str = "Warning";
