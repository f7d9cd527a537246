//! HTTP semantics helpers.
//!
//! RFC 9110-style method properties, used to decide whether a request carries a body and which
//! methods the guardrail treats as destructive by default.

use reqwest::Method;

/// Method properties. `None` means "do not guess" (extension methods, PATCH idempotence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSemantics {
    pub read_only: Option<bool>,
    pub destructive: Option<bool>,
    pub idempotent: Option<bool>,
}

impl MethodSemantics {
    #[must_use]
    pub fn of(method: &Method) -> Self {
        if method == Method::GET
            || method == Method::HEAD
            || method == Method::OPTIONS
            || method == Method::TRACE
        {
            return Self {
                read_only: Some(true),
                destructive: Some(false),
                idempotent: Some(true),
            };
        }

        if method == Method::POST {
            return Self {
                read_only: Some(false),
                destructive: Some(false),
                idempotent: Some(false),
            };
        }

        if method == Method::PUT || method == Method::DELETE {
            return Self {
                read_only: Some(false),
                destructive: Some(true),
                idempotent: Some(true),
            };
        }

        if method == Method::PATCH {
            return Self {
                read_only: Some(false),
                destructive: Some(true),
                // PATCH may or may not be idempotent; do not guess.
                idempotent: None,
            };
        }

        Self {
            read_only: None,
            destructive: None,
            idempotent: None,
        }
    }

    /// Whether a JSON body is attached when the caller supplies one.
    ///
    /// Only safe (read-only) methods drop the body; unknown extension methods keep it.
    #[must_use]
    pub fn carries_body(&self) -> bool {
        self.read_only != Some(true)
    }
}

/// Methods with `destructive == Some(true)`, in a stable order.
#[must_use]
pub fn default_destructive_methods() -> Vec<Method> {
    [Method::DELETE, Method::PUT, Method::PATCH]
        .into_iter()
        .filter(|m| MethodSemantics::of(m).destructive == Some(true))
        .collect()
}
