//! Name-keyed registry of normalized APIs.
//!
//! Every configuration entry is registered independently: a bad spec or config is recorded as a
//! [`RegistrationFailure`] and the remaining entries still load. After loading the registry is
//! immutable and can be shared freely (`Arc<Registry>`), so lookups take no locks.

use crate::config::{ApiConfig, ApiSpecEntry, SpecLoader, absolute_http_url};
use crate::error::{BridgeError, Result};
use crate::model::ApiDescriptor;
use crate::normalize::SpecNormalizer;
use futures::StreamExt as _;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An entry that could not be registered.
#[derive(Debug)]
pub struct RegistrationFailure {
    pub name: String,
    pub error: BridgeError,
}

/// Short description of a registered API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSummary {
    pub name: String,
    pub base_url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub auth_type: String,
    pub endpoint_count: usize,
}

#[derive(Debug, Default)]
pub struct Registry {
    apis: HashMap<String, Arc<ApiDescriptor>>,
    order: Vec<String>,
    failures: Vec<RegistrationFailure>,
}

/// Build one descriptor from a config and its parsed document.
///
/// # Errors
///
/// Returns a config error for invalid settings/credentials or a missing base URL, and any
/// normalization error for the document.
pub fn build_descriptor(config: &ApiConfig, document: &Value) -> Result<ApiDescriptor> {
    config.validate()?;
    let spec = SpecNormalizer::with_options(config.normalize)
        .normalize_with_source(document, Some(&config.spec))?;

    let base_url = match (&config.base_url, &spec.base_url) {
        (Some(configured), _) => configured.clone(),
        (None, Some(from_spec)) => {
            absolute_http_url(from_spec).map_err(|msg| {
                BridgeError::Config(format!(
                    "API '{}': spec base URL '{from_spec}' is unusable ({msg}); set baseUrl explicitly",
                    config.name
                ))
            })?;
            from_spec.clone()
        }
        (None, None) => {
            return Err(BridgeError::Config(format!(
                "API '{}': spec declares no server URL; set baseUrl explicitly",
                config.name
            )));
        }
    };

    ApiDescriptor::new(
        config.name.clone(),
        base_url,
        config.auth.clone(),
        config.settings.clone(),
        spec,
    )
}

impl Registry {
    /// Register every entry. Never fails as a whole.
    #[must_use]
    pub fn load(entries: Vec<ApiSpecEntry>) -> Self {
        let (unique, mut failures) = split_duplicates(entries, |e| &e.config.name);

        let outcomes = unique
            .into_iter()
            .map(|(i, entry)| {
                let result = build_descriptor(&entry.config, &entry.document);
                (i, entry.config.name, result)
            })
            .collect();

        Self::from_outcomes(outcomes, &mut failures)
    }

    /// Fetch and register every config through `loader`, at most `concurrency` at a time.
    ///
    /// Entries are inserted in input order regardless of fetch completion order.
    pub async fn load_from(
        configs: Vec<ApiConfig>,
        loader: &dyn SpecLoader,
        concurrency: usize,
    ) -> Self {
        let (unique, mut failures) = split_duplicates(configs, |c| &c.name);

        let outcomes: Vec<(usize, String, Result<ApiDescriptor>)> =
            futures::stream::iter(unique)
                .map(|(i, config)| async move {
                    let result = fetch_and_build(&config, loader).await;
                    (i, config.name, result)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        Self::from_outcomes(outcomes, &mut failures)
    }

    fn from_outcomes(
        mut outcomes: Vec<(usize, String, Result<ApiDescriptor>)>,
        failures: &mut Vec<(usize, RegistrationFailure)>,
    ) -> Self {
        outcomes.sort_by_key(|(i, _, _)| *i);

        let mut registry = Registry::default();
        for (i, name, result) in outcomes {
            match result {
                Ok(api) => {
                    tracing::info!(
                        api = %name,
                        base_url = %api.base_url,
                        endpoints = api.endpoints().len(),
                        "Registered API"
                    );
                    registry.order.push(name.clone());
                    registry.apis.insert(name, Arc::new(api));
                }
                Err(error) => {
                    tracing::error!(api = %name, error = %error, "Failed to register API");
                    failures.push((i, RegistrationFailure { name, error }));
                }
            }
        }

        failures.sort_by_key(|(i, _)| *i);
        registry.failures = failures.drain(..).map(|(_, f)| f).collect();
        registry
    }

    /// Look up an API by name.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ApiNotFound`] listing the registered names.
    pub fn get(&self, name: &str) -> Result<Arc<ApiDescriptor>> {
        self.apis
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::ApiNotFound {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Registered names, in configuration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    #[must_use]
    pub fn list_apis(&self) -> Vec<ApiSummary> {
        self.order
            .iter()
            .filter_map(|n| self.apis.get(n))
            .map(|api| ApiSummary {
                name: api.name.clone(),
                base_url: api.base_url.clone(),
                title: api.title.clone(),
                description: api.description.clone(),
                auth_type: api.auth.kind().to_string(),
                endpoint_count: api.endpoints().len(),
            })
            .collect()
    }

    #[must_use]
    pub fn failures(&self) -> &[RegistrationFailure] {
        &self.failures
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

async fn fetch_and_build(config: &ApiConfig, loader: &dyn SpecLoader) -> Result<ApiDescriptor> {
    // Reject bad configs before touching the network.
    config.validate()?;
    let document = loader
        .load(&config.spec)
        .await
        .map_err(|e| BridgeError::Load {
            location: config.spec.clone(),
            message: format!("{e:#}"),
        })?;
    build_descriptor(config, &document)
}

/// Keep the first entry per name; later ones become config failures. Indices are input positions.
#[allow(clippy::type_complexity)]
fn split_duplicates<T>(
    items: Vec<T>,
    name_of: impl Fn(&T) -> &String,
) -> (Vec<(usize, T)>, Vec<(usize, RegistrationFailure)>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    let mut failures = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let name = name_of(&item).clone();
        if seen.insert(name.clone()) {
            unique.push((i, item));
        } else {
            tracing::error!(api = %name, "Duplicate API name; keeping the first registration");
            failures.push((
                i,
                RegistrationFailure {
                    error: BridgeError::Config(format!("Duplicate API name '{name}'")),
                    name,
                },
            ));
        }
    }
    (unique, failures)
}
