//! Secret lookups and the key checks each referenced secret must pass.

use super::SecretReader;
use crate::constants::{
    ADMIN_PORTAL_URL_KEY, CUSTOM_POLICY_INIT_KEY, CUSTOM_POLICY_MANIFEST_KEY,
    EMBEDDED_CONFIGURATION_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE,
    TRACING_CONFIG_KEY,
};
use crate::controller::error::ConvergeError;
use crate::crd::SecretRef;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },

    #[error("{path}: secret {name} not found")]
    SecretNotFound { path: String, name: String },

    #[error("APIcast has no namespace")]
    MissingNamespace,

    #[error("APIcast has no UID yet")]
    MissingUid,

    #[error(transparent)]
    Store(#[from] ConvergeError),
}

impl OptionsError {
    pub(super) fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        OptionsError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Errors the user has to fix in the CR or its secrets, as opposed to
    /// transient cluster errors
    pub fn is_user_error(&self) -> bool {
        !matches!(self, OptionsError::Store(_))
    }
}

/// Keys present in `data` or `stringData`
fn secret_keys(secret: &Secret) -> BTreeSet<&str> {
    let data = secret.data.iter().flat_map(|d| d.keys());
    let string_data = secret.string_data.iter().flat_map(|d| d.keys());
    data.chain(string_data).map(String::as_str).collect()
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key).cloned())
        .or_else(|| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        })
}

fn require_key(secret: &Secret, path: &str, key: &str) -> Result<(), OptionsError> {
    if secret_keys(secret).contains(key) {
        Ok(())
    } else {
        Err(OptionsError::invalid(
            path,
            format!(
                "required key '{key}' not found in secret '{}'",
                secret.metadata.name.as_deref().unwrap_or_default()
            ),
        ))
    }
}

pub(super) struct Resolver<'a, R: ?Sized> {
    pub secrets: &'a R,
    pub namespace: &'a str,
}

impl<R: SecretReader + ?Sized> Resolver<'_, R> {
    async fn fetch(&self, path: &str, secret_ref: &SecretRef) -> Result<Secret, OptionsError> {
        if secret_ref.name.is_empty() {
            return Err(OptionsError::invalid(
                format!("{path}.name"),
                "secret name not provided",
            ));
        }
        self.secrets
            .read_secret(self.namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| OptionsError::SecretNotFound {
                path: path.to_string(),
                name: secret_ref.name.clone(),
            })
    }

    pub async fn admin_portal(&self, secret_ref: &SecretRef) -> Result<Secret, OptionsError> {
        const PATH: &str = "spec.adminPortalCredentialsRef";
        let secret = self.fetch(PATH, secret_ref).await?;
        require_key(&secret, PATH, ADMIN_PORTAL_URL_KEY)?;

        let raw = secret_value(&secret, ADMIN_PORTAL_URL_KEY).unwrap_or_default();
        let parsed = url::Url::parse(&raw).map_err(|e| {
            OptionsError::invalid(PATH, format!("{ADMIN_PORTAL_URL_KEY} is not a valid URL: {e}"))
        })?;
        if parsed.username().is_empty() {
            return Err(OptionsError::invalid(
                PATH,
                format!("Access Token required in {ADMIN_PORTAL_URL_KEY} URL"),
            ));
        }
        Ok(secret)
    }

    pub async fn embedded_configuration(
        &self,
        secret_ref: &SecretRef,
    ) -> Result<Secret, OptionsError> {
        const PATH: &str = "spec.embeddedConfigurationSecretRef";
        let secret = self.fetch(PATH, secret_ref).await?;
        require_key(&secret, PATH, EMBEDDED_CONFIGURATION_KEY)?;
        Ok(secret)
    }

    pub async fn https_certificate(&self, secret_ref: &SecretRef) -> Result<Secret, OptionsError> {
        const PATH: &str = "spec.httpsCertificateSecretRef";
        let secret = self.fetch(PATH, secret_ref).await?;
        if secret.type_.as_deref() != Some(TLS_SECRET_TYPE) {
            return Err(OptionsError::invalid(
                PATH,
                format!("required {TLS_SECRET_TYPE} secret type"),
            ));
        }
        require_key(&secret, PATH, TLS_CERT_KEY)?;
        require_key(&secret, PATH, TLS_PRIVATE_KEY_KEY)?;
        Ok(secret)
    }

    pub async fn ca_certificate(&self, secret_ref: &SecretRef) -> Result<Secret, OptionsError> {
        self.fetch("spec.caCertificateSecretRef", secret_ref).await
    }

    pub async fn custom_policy(
        &self,
        idx: usize,
        secret_ref: Option<&SecretRef>,
    ) -> Result<Secret, OptionsError> {
        let path = format!("spec.customPolicies[{idx}]");
        let secret_ref = secret_ref
            .ok_or_else(|| OptionsError::invalid(&path, "custom policy secret is mandatory"))?;
        let secret = self.fetch(&path, secret_ref).await?;
        require_key(&secret, &path, CUSTOM_POLICY_INIT_KEY)?;
        require_key(&secret, &path, CUSTOM_POLICY_MANIFEST_KEY)?;
        Ok(secret)
    }

    pub async fn custom_environment(
        &self,
        idx: usize,
        secret_ref: Option<&SecretRef>,
    ) -> Result<Secret, OptionsError> {
        let path = format!("spec.customEnvironments[{idx}]");
        let secret_ref = secret_ref.ok_or_else(|| {
            OptionsError::invalid(&path, "custom environment secret is mandatory")
        })?;
        let secret = self.fetch(&path, secret_ref).await?;
        if secret_keys(&secret).is_empty() {
            return Err(OptionsError::invalid(path, "empty secret"));
        }
        Ok(secret)
    }

    pub async fn tracing_config(&self, secret_ref: &SecretRef) -> Result<Secret, OptionsError> {
        const PATH: &str = "spec.openTracing.tracingConfigSecretRef";
        let secret = self.fetch(PATH, secret_ref).await?;
        require_key(&secret, PATH, TRACING_CONFIG_KEY)?;
        Ok(secret)
    }

    /// The OpenTelemetry secret and the key holding its config file
    pub async fn opentelemetry_config(
        &self,
        secret_ref: &SecretRef,
        key: Option<String>,
    ) -> Result<(Secret, String), OptionsError> {
        const PATH: &str = "spec.openTelemetry.tracingConfigSecretRef";
        let secret = self.fetch(PATH, secret_ref).await?;
        let key = match key {
            Some(key) => key,
            None => secret_keys(&secret)
                .first()
                .map(|k| (*k).to_string())
                .ok_or_else(|| OptionsError::invalid(PATH, "secret is empty, no key found"))?,
        };
        Ok((secret, key))
    }
}
