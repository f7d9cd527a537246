//! Error types for `bridge-openapi-tools`.

use bridge_http_tools::config::ParamLocation;
use bridge_http_tools::runtime::HttpToolsError;
use thiserror::Error;

/// `$ref` resolution failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("cyclic $ref detected: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("$ref '{reference}' nests deeper than {max_depth} levels")]
    DepthExceeded { reference: String, max_depth: usize },

    #[error("unresolved $ref '{reference}'")]
    Dangling { reference: String },

    #[error("$ref expansion produced more than {max_nodes} nodes")]
    TooLarge { max_nodes: usize },
}

/// Main error type for the bridge core.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors (invalid settings, unresolved credentials, duplicate names).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A spec document is structurally unusable. `path` names the offending location.
    #[error("Spec error at '{path}': {message}")]
    Spec { path: String, message: String },

    #[error("Unsupported spec version '{version}' (expected OpenAPI 3.x or Swagger 2.0)")]
    UnsupportedVersion { version: String },

    #[error("Reference resolution error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("API '{name}' not found. Available APIs: [{}]", available.join(", "))]
    ApiNotFound { name: String, available: Vec<String> },

    #[error("Endpoint {method} {path} not found in API '{api}'")]
    EndpointNotFound {
        api: String,
        method: String,
        path: String,
        /// `METHOD /template` for every endpoint the API does have.
        available: Vec<String>,
    },

    #[error("Missing required {location} parameter '{name}'")]
    MissingParameter {
        name: String,
        location: ParamLocation,
    },

    /// The external loader could not produce a document.
    #[error("Failed to load spec from '{location}': {message}")]
    Load { location: String, message: String },

    /// Request could not be assembled (invalid header name, bad URL).
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<HttpToolsError> for BridgeError {
    fn from(e: HttpToolsError) -> Self {
        match e {
            HttpToolsError::Config(m) => BridgeError::Config(m),
            HttpToolsError::Runtime(m) => BridgeError::Runtime(m),
        }
    }
}

impl BridgeError {
    pub(crate) fn spec(path: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Spec {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
