#![allow(dead_code)]

use anyhow::Context as _;
use bridge_http_tools::config::{ApiKeyLocation, ApiSettings, AuthConfig};
use bridge_openapi_tools::config::{ApiConfig, ApiSpecEntry, parse_document};
use bridge_openapi_tools::model::ApiDescriptor;
use bridge_openapi_tools::registry::Registry;
use bridge_test_support::{API_KEY, MockApi, PETSTORE_V3_YAML};
use std::sync::Arc;

pub fn api_key_auth(key: &str) -> AuthConfig {
    AuthConfig::ApiKey {
        key: key.to_string(),
        name: "X-API-Key".to_string(),
        location: ApiKeyLocation::Header,
    }
}

/// Settings fast enough for high-volume tests.
pub fn fast_settings() -> ApiSettings {
    ApiSettings {
        rate_limit_per_second: 100,
        ..ApiSettings::default()
    }
}

/// Register the v3 petstore fixture against `mock` and return its descriptor.
pub fn petstore(
    mock: &MockApi,
    auth: AuthConfig,
    settings: ApiSettings,
) -> anyhow::Result<Arc<ApiDescriptor>> {
    let document = parse_document(PETSTORE_V3_YAML).context("parse v3 fixture")?;
    let config = ApiConfig::new("petstore", "petstore_v3.yaml")
        .with_base_url(mock.base_url())
        .with_auth(auth)
        .with_settings(settings);

    let registry = Registry::load(vec![ApiSpecEntry::new(config, document)]);
    anyhow::ensure!(
        registry.failures().is_empty(),
        "registration failed: {:?}",
        registry.failures()
    );
    Ok(registry.get("petstore")?)
}

pub fn authorized_petstore(mock: &MockApi) -> anyhow::Result<Arc<ApiDescriptor>> {
    petstore(mock, api_key_auth(API_KEY), fast_settings())
}
