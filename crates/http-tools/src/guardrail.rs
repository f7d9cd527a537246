//! Destructive-operation guardrail.
//!
//! Classification only: the gate never performs I/O and never mutates anything, so the same
//! instance can be consulted for a single call and for every item of a batch.

use crate::config::ApiSettings;
use crate::runtime::{HttpToolsError, Result};
use crate::semantics::default_destructive_methods;
use reqwest::Method;
use std::collections::HashSet;

/// Outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    /// The call must not be sent; the message explains how to confirm it.
    RequireConfirmation(String),
}

impl GuardrailDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardrailDecision::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct Guardrail {
    destructive: HashSet<Method>,
    confirm_required: bool,
}

impl Default for Guardrail {
    fn default() -> Self {
        Self {
            destructive: default_destructive_methods().into_iter().collect(),
            confirm_required: true,
        }
    }
}

impl Guardrail {
    #[must_use]
    pub fn new(destructive: impl IntoIterator<Item = Method>, confirm_required: bool) -> Self {
        Self {
            destructive: destructive.into_iter().collect(),
            confirm_required,
        }
    }

    /// Build the gate for one API from its settings.
    ///
    /// # Errors
    ///
    /// Returns a config error if a configured method is not a valid HTTP method token.
    pub fn from_settings(settings: &ApiSettings) -> Result<Self> {
        let mut destructive = HashSet::new();
        for m in &settings.destructive_methods {
            let method = Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| HttpToolsError::Config(format!("Invalid destructive method '{m}'")))?;
            destructive.insert(method);
        }
        Ok(Self {
            destructive,
            confirm_required: settings.confirm_destructive,
        })
    }

    #[must_use]
    pub fn is_destructive(&self, method: &Method) -> bool {
        self.destructive.contains(method)
    }

    #[must_use]
    pub fn check(&self, method: &Method, path: &str, confirmed: bool) -> GuardrailDecision {
        if !self.confirm_required || confirmed || !self.is_destructive(method) {
            return GuardrailDecision::Allow;
        }
        GuardrailDecision::RequireConfirmation(format!(
            "This is a destructive operation ({method} {path}). \
             Set confirmed=true to proceed with this operation."
        ))
    }
}
