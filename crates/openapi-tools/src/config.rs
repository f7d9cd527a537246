use crate::error::{BridgeError, Result};
use crate::normalize::NormalizeOptions;
use async_trait::async_trait;
use bridge_http_tools::config::{ApiSettings, AuthConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Configuration for one API, as handed over by the external configuration loader.
///
/// Secrets inside `auth` must already be resolved.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Unique API name (registry key).
    pub name: String,

    /// Spec location (URL or file path). Only used as a hint: relative server URLs are resolved
    /// against it and the [`SpecLoader`] is asked to fetch it.
    pub spec: String,

    /// Override base URL from spec.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub settings: ApiSettings,

    /// `$ref` expansion options (depth bound, cycle policy).
    #[serde(default)]
    pub normalize: NormalizeOptions,
}

impl ApiConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, spec: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: spec.into(),
            base_url: None,
            auth: AuthConfig::None,
            settings: ApiSettings::default(),
            normalize: NormalizeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ApiSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_normalize_options(mut self, normalize: NormalizeOptions) -> Self {
        self.normalize = normalize;
        self
    }

    /// Validate everything that can be checked without the spec document.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an empty name, out-of-range settings, empty or
    /// unresolved credentials, a zero `normalize` bound, or a `baseUrl` that is not an absolute
    /// http(s) URL.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::Config("API name must not be empty".to_string()));
        }
        if self.normalize.max_ref_depth == 0 || self.normalize.max_expanded_nodes == 0 {
            return Err(BridgeError::Config(format!(
                "API '{}': normalize.maxRefDepth and normalize.maxExpandedNodes must be at least 1",
                self.name
            )));
        }
        self.settings
            .validate()
            .map_err(|e| prefix_config_error(&self.name, e.into()))?;
        self.auth
            .validate()
            .map_err(|e| prefix_config_error(&self.name, e.into()))?;
        if let Some(base) = &self.base_url {
            absolute_http_url(base).map_err(|msg| {
                BridgeError::Config(format!("API '{}': invalid baseUrl '{base}': {msg}", self.name))
            })?;
        }
        Ok(())
    }
}

fn prefix_config_error(api: &str, e: BridgeError) -> BridgeError {
    match e {
        BridgeError::Config(m) => BridgeError::Config(format!("API '{api}': {m}")),
        other => other,
    }
}

pub(crate) fn absolute_http_url(s: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(s).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err("must be an absolute http(s) URL".to_string()),
    }
}

/// A configuration entry paired with its already-parsed spec document.
#[derive(Debug, Clone)]
pub struct ApiSpecEntry {
    pub config: ApiConfig,
    pub document: Value,
}

impl ApiSpecEntry {
    #[must_use]
    pub fn new(config: ApiConfig, document: Value) -> Self {
        Self { config, document }
    }
}

/// Fetches raw spec documents. Implemented outside this crate (HTTP, filesystem, cache).
#[async_trait]
pub trait SpecLoader: Send + Sync {
    async fn load(&self, location: &str) -> anyhow::Result<Value>;
}

/// Parse spec text as JSON, falling back to YAML.
///
/// YAML mappings with non-string keys (unquoted `200:` response codes) are converted to string
/// keys.
///
/// # Errors
///
/// Returns the YAML parse error when the text is neither valid JSON nor valid YAML.
pub fn parse_document(text: &str) -> Result<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
    Ok(serde_json::to_value(yaml)?)
}
