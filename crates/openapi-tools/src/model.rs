//! Canonical endpoint model produced by the normalizer and consumed by the executor.

use crate::error::{BridgeError, Result};
use bridge_http_tools::config::{ApiSettings, AuthConfig, ParamLocation};
use reqwest::Method;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

fn serialize_method<S: Serializer>(m: &Method, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(m.as_str())
}

/// Source dialect of a spec document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Swagger2,
    OpenApi3,
}

/// Security requirement object: scheme name to required scopes.
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub path: String,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub tags: BTreeSet<String>,
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    pub security: Vec<SecurityRequirement>,
    pub deprecated: bool,
}

impl EndpointDescriptor {
    /// `METHOD /path/template`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// First declared parameter with this name, in any location.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Placeholder names in the path template, in order.
    #[must_use]
    pub fn path_placeholders(&self) -> Vec<&str> {
        placeholders(&self.path)
    }
}

pub(crate) fn placeholders(template: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        out.push(&rest[start + 1..start + 1 + len]);
        rest = &rest[start + len + 2..];
    }
    out
}

/// Output of normalization, before it is bound to an API configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSpec {
    pub dialect: Dialect,
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Base URL derived from the document (`servers` or `host`/`basePath`/`schemes`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// One registered API. Read-only once built.
#[derive(Debug, Clone)]
pub struct ApiDescriptor {
    pub name: String,
    /// Absolute http(s) base URL without a trailing slash.
    pub base_url: String,
    pub auth: AuthConfig,
    pub settings: ApiSettings,
    pub title: String,
    pub version: String,
    pub description: Option<String>,
    endpoints: Vec<EndpointDescriptor>,
    index: HashMap<(Method, String), usize>,
}

impl ApiDescriptor {
    /// Bind a normalized spec to its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Spec`] if two endpoints share the same `(path, method)`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        auth: AuthConfig,
        settings: ApiSettings,
        spec: NormalizedSpec,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(spec.endpoints.len());
        for (i, ep) in spec.endpoints.iter().enumerate() {
            if index.insert((ep.method.clone(), ep.path.clone()), i).is_some() {
                return Err(BridgeError::spec(
                    format!("paths.{}.{}", ep.path, ep.method.as_str().to_ascii_lowercase()),
                    "duplicate (path, method) pair",
                ));
            }
        }
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            settings,
            title: spec.title,
            version: spec.version,
            description: spec.description,
            endpoints: spec.endpoints,
            index,
        })
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    /// Exact lookup by method and path template.
    #[must_use]
    pub fn endpoint(&self, method: &Method, path: &str) -> Option<&EndpointDescriptor> {
        self.index
            .get(&(method.clone(), path.to_string()))
            .map(|i| &self.endpoints[*i])
    }

    /// `METHOD /template` for every endpoint, in document order.
    #[must_use]
    pub fn endpoint_keys(&self) -> Vec<String> {
        self.endpoints.iter().map(EndpointDescriptor::key).collect()
    }
}

/// One caller-supplied parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParam {
    pub name: String,
    /// `None` lets the executor infer the location from the endpoint.
    pub location: Option<ParamLocation>,
    pub value: Value,
}

impl RequestParam {
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            location: None,
            value,
        }
    }

    #[must_use]
    pub fn at(location: ParamLocation, name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            location: Some(location),
            value,
        }
    }
}

/// A single call against one API.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Path template (`/pets/{pet_id}`) or a concrete path (`/pets/7`).
    pub path: String,
    pub method: Method,
    pub params: Vec<RequestParam>,
    pub body: Option<Value>,
    /// Extra headers. Auth headers win on name collisions.
    pub headers: Vec<(String, String)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub confirmed: bool,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            limit: None,
            offset: None,
            confirmed: false,
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.push(RequestParam::new(name, value));
        self
    }

    #[must_use]
    pub fn param_at(
        mut self,
        location: ParamLocation,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        self.params.push(RequestParam::at(location, name, value));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn window(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }
}

/// Why a call did not produce a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallFailure {
    /// No HTTP response at all (refused, reset, DNS, body read failure).
    Connection { message: String },
    /// Rate-gate wait plus the exchange exceeded the API's timeout.
    Timeout { message: String },
    /// The upstream answered with a 4xx/5xx status.
    Upstream { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Absent when no HTTP response was received (or the call was blocked).
    pub status_code: Option<u16>,
    pub data: Value,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    pub auth_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallFailure>,
}

impl ExecutionResult {
    /// Result for a call the guardrail refused. Nothing was sent.
    #[must_use]
    pub fn blocked(warning: String) -> Self {
        Self {
            status_code: None,
            data: Value::Null,
            truncated: false,
            total_count: None,
            auth_error: false,
            destructive_warning: Some(warning),
            error: None,
        }
    }

    pub(crate) fn failed(failure: CallFailure) -> Self {
        Self {
            status_code: None,
            data: Value::Null,
            truncated: false,
            total_count: None,
            auth_error: false,
            destructive_warning: None,
            error: Some(failure),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.is_some_and(|s| (200..300).contains(&s))
    }
}
