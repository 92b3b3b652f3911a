//! Store configuration and credential resolution
//!
//! Each side of a migration is described by a [`StoreConfig`]. It can be
//! resolved from `SRC_*` / `DEST_*` environment variables or from a bound
//! `s3` service in a `VCAP_SERVICES` document. Resolution happens once,
//! before the pipeline starts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Environment variable holding the service-binding document
pub const VCAP_SERVICES: &str = "VCAP_SERVICES";

/// Which end of the migration a config describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    fn env_prefix(self) -> &'static str {
        match self {
            Side::Source => "SRC",
            Side::Destination => "DEST",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Destination => "destination",
        }
    }
}

/// How a client authenticates
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Explicit access key pair
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    /// The SDK's default chain (environment, profile, instance metadata)
    DefaultChain,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"***")
                .finish(),
            Credentials::DefaultChain => f.write_str("DefaultChain"),
        }
    }
}

/// Connection settings for one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub credentials: Credentials,
}

impl StoreConfig {
    /// Resolve from environment variables, e.g. `SRC_BUCKET_NAME`
    ///
    /// Returns the config and the `*_PREFIX` value if one is set.
    pub fn from_env(side: Side) -> Result<(Self, Option<String>)> {
        Self::from_lookup(side, |name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an injectable variable lookup
    pub fn from_lookup<F>(side: Side, lookup: F) -> Result<(Self, Option<String>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = side.env_prefix();
        let var = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}")).filter(|value| !value.is_empty())
        };

        let bucket = var("BUCKET_NAME").ok_or_else(|| {
            Error::Config(format!(
                "{prefix}_BUCKET_NAME is not set for the {}",
                side.label()
            ))
        })?;

        let credentials = match (var("ACCESS_KEY_ID"), var("SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Credentials::Static {
                access_key_id,
                secret_access_key,
            },
            (None, None) => Credentials::DefaultChain,
            _ => {
                return Err(Error::Config(format!(
                    "{prefix}_ACCESS_KEY_ID and {prefix}_SECRET_ACCESS_KEY must be set together"
                )));
            }
        };

        let config = Self {
            bucket,
            region: var("REGION"),
            endpoint: var("ENDPOINT").as_deref().map(normalize_endpoint).transpose()?,
            credentials,
        };
        Ok((config, var("PREFIX")))
    }

    /// Resolve from the bound `s3` service called `name`
    pub fn from_service_binding(vcap_services: &str, name: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(vcap_services)
            .map_err(|e| Error::Config(format!("{VCAP_SERVICES} is not valid JSON: {e}")))?;

        let service = find_service(&doc, "s3", name).ok_or_else(|| {
            Error::Config(format!("no bound s3 service named '{name}' in {VCAP_SERVICES}"))
        })?;

        let binding: Binding = serde_json::from_value(service["credentials"].clone())
            .map_err(|e| Error::Config(format!("service '{name}' has invalid credentials: {e}")))?;

        // Bindings usually carry a bare host such as s3-us-gov-west-1.amazonaws.com
        let endpoint = binding
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(normalize_endpoint)
            .transpose()?;

        Ok(Self {
            bucket: binding.bucket,
            region: binding.region,
            endpoint,
            credentials: Credentials::Static {
                access_key_id: binding.access_key_id,
                secret_access_key: binding.secret_access_key,
            },
        })
    }

    /// Switch to the SDK's default credential chain
    pub fn with_default_chain(mut self) -> Self {
        self.credentials = Credentials::DefaultChain;
        self
    }
}

/// Turn an endpoint into an absolute URL, assuming `https://` for a bare host
pub fn normalize_endpoint(raw: &str) -> Result<String> {
    let raw = raw.trim().trim_end_matches('/');
    match raw.split_once("://") {
        None if !raw.is_empty() => Ok(format!("https://{raw}")),
        Some((scheme, host))
            if !host.is_empty()
                && (scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("http")) =>
        {
            Ok(raw.to_string())
        }
        _ => Err(Error::Config(format!(
            "endpoint '{raw}' is not an http or https URL"
        ))),
    }
}

#[derive(Deserialize)]
struct Binding {
    access_key_id: String,
    secret_access_key: String,
    bucket: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

/// Find a service instance by name, preferring the given label
fn find_service<'a>(doc: &'a Value, label: &str, name: &str) -> Option<&'a Value> {
    let by_name = |instances: &'a Value| {
        instances
            .as_array()?
            .iter()
            .find(|svc| svc.get("name").and_then(Value::as_str) == Some(name))
    };

    if let Some(found) = doc.get(label).and_then(by_name) {
        return Some(found);
    }
    // Brokered services may be listed under a provider-specific label
    doc.as_object()?.values().find_map(by_name)
}
