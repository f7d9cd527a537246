//! Per-API configuration shared by the executor layers: authentication and call settings.
//!
//! Credentials arrive here already resolved by the external configuration loader. Anything that
//! still looks like an environment placeholder is rejected by [`AuthConfig::validate`].

use crate::runtime::{HttpToolsError, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Where a request parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }

    /// Parse an `OpenAPI` `in` value. Returns `None` for body-ish locations (`body`, `formData`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "cookie" => Some(ParamLocation::Cookie),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an API key is injected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Authentication scheme for one API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No request decoration.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// API key in a header or query parameter.
    ApiKey {
        key: String,
        /// Header or query parameter name.
        #[serde(default = "default_api_key_name")]
        name: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
    /// `Authorization: Basic <credentials>`.
    ///
    /// `credentials` is sent as-is, i.e. it must already be the base64 form of `user:pass`.
    /// Use [`AuthConfig::basic_from_user_pass`] to build it from raw parts.
    Basic { credentials: String },
}

fn default_api_key_name() -> String {
    "X-API-Key".to_string()
}

impl AuthConfig {
    /// Build a basic-auth config by encoding `user:pass`.
    #[must_use]
    pub fn basic_from_user_pass(user: &str, pass: &str) -> Self {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        AuthConfig::Basic { credentials }
    }

    /// Short scheme name (`none`, `bearer`, `api_key`, `basic`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::ApiKey { .. } => "api_key",
            AuthConfig::Basic { .. } => "basic",
        }
    }

    fn credential(&self) -> Option<&str> {
        match self {
            AuthConfig::None => None,
            AuthConfig::Bearer { token } => Some(token),
            AuthConfig::ApiKey { key, .. } => Some(key),
            AuthConfig::Basic { credentials } => Some(credentials),
        }
    }

    /// Validate that the credential is present and fully resolved.
    ///
    /// # Errors
    ///
    /// Returns a config error if the credential is empty, still contains an environment
    /// placeholder (`$VAR` / `${VAR}`), or the API key target name is empty.
    pub fn validate(&self) -> Result<()> {
        if let AuthConfig::ApiKey { name, .. } = self
            && name.trim().is_empty()
        {
            return Err(HttpToolsError::Config(
                "api_key auth requires a non-empty header/query name".to_string(),
            ));
        }

        let Some(credential) = self.credential() else {
            return Ok(());
        };
        if credential.trim().is_empty() {
            return Err(HttpToolsError::Config(format!(
                "{} auth has an empty credential",
                self.kind()
            )));
        }
        if let Some(placeholder) = unresolved_placeholder(credential) {
            return Err(HttpToolsError::Config(format!(
                "{} auth credential contains unresolved placeholder '{placeholder}'",
                self.kind()
            )));
        }
        Ok(())
    }
}

/// Find a placeholder left behind by the config loader: `${NAME}` anywhere in the value, or a
/// bare `$NAME` that makes up the whole value. A `$` inside a literal secret is not a reference.
fn unresolved_placeholder(s: &str) -> Option<&str> {
    let mut offset = 0;
    while let Some(pos) = s[offset..].find("${") {
        let start = offset + pos;
        let inner = &s[start + 2..];
        if let Some(end) = inner.find('}')
            && is_env_name(&inner[..end])
        {
            return Some(&s[start..start + end + 3]);
        }
        offset = start + 2;
    }

    let trimmed = s.trim();
    trimmed
        .strip_prefix('$')
        .filter(|name| is_env_name(name))
        .map(|_| trimmed)
}

fn is_env_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Call settings for one API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Window size applied to list responses when the caller gives no limit.
    pub default_page_size: usize,
    /// Upper bound on in-flight calls for one batch.
    pub max_batch_size: usize,
    /// Calls per second admitted by the API's rate gate.
    pub rate_limit_per_second: u32,
    /// When false the guardrail lets destructive methods through unconfirmed.
    pub confirm_destructive: bool,
    /// Methods treated as destructive (case-insensitive).
    pub destructive_methods: Vec<String>,
    /// Per-call timeout in seconds (covers rate-gate wait and the HTTP exchange).
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_batch_size: 50,
            rate_limit_per_second: 5,
            confirm_destructive: true,
            destructive_methods: vec!["DELETE".into(), "PUT".into(), "PATCH".into()],
            request_timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    /// Validate ranges.
    ///
    /// # Errors
    ///
    /// Returns a config error if a numeric setting is out of range or a destructive method is not
    /// a valid HTTP method token.
    pub fn validate(&self) -> Result<()> {
        check_range("defaultPageSize", self.default_page_size, 1, 100)?;
        check_range("maxBatchSize", self.max_batch_size, 1, 100)?;
        check_range(
            "rateLimitPerSecond",
            self.rate_limit_per_second as usize,
            1,
            100,
        )?;
        if self.request_timeout_secs == 0 {
            return Err(HttpToolsError::Config(
                "requestTimeoutSecs must be at least 1".to_string(),
            ));
        }
        for m in &self.destructive_methods {
            reqwest::Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(
                |_| HttpToolsError::Config(format!("Invalid destructive method '{m}'")),
            )?;
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

fn check_range(field: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(HttpToolsError::Config(format!(
            "{field} must be between {min} and {max} (got {value})"
        )))
    }
}
