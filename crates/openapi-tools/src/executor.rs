//! Single-call executor.
//!
//! A call goes through these stages, and stops at the first one that refuses it:
//! endpoint lookup, parameter placement (missing required values fail before any I/O), the
//! guardrail, auth decoration, the API's rate gate, the transport, and finally response shaping
//! and failure classification.

use crate::error::{BridgeError, Result};
use crate::model::{ApiDescriptor, CallFailure, EndpointDescriptor, ExecutionRequest, ExecutionResult};
use bridge_http_tools::config::ParamLocation;
use bridge_http_tools::guardrail::{Guardrail, GuardrailDecision};
use bridge_http_tools::rate_gate::RateGates;
use bridge_http_tools::response_shaping::{PageWindow, decode_body, error_message, shape_payload};
use bridge_http_tools::runtime::{
    HttpTransport, InboundResponse, OutboundRequest, ReqwestTransport, TransportError,
    apply_auth, value_to_string,
};
use bridge_http_tools::safety::redact_url;
use bridge_http_tools::semantics::MethodSemantics;
use reqwest::Method;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Executes calls against registered APIs. Cheap to clone; clones share the transport and the
/// per-API rate gates.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    gates: RateGates,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestTransport::new()))
    }
}

impl Executor {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_rate_gates(transport, RateGates::new())
    }

    #[must_use]
    pub fn with_rate_gates(transport: Arc<dyn HttpTransport>, gates: RateGates) -> Self {
        Self { transport, gates }
    }

    #[must_use]
    pub fn rate_gates(&self) -> &RateGates {
        &self.gates
    }

    /// Execute one call.
    ///
    /// Network failures and HTTP error statuses are reported inside the returned
    /// [`ExecutionResult`]; so is a guardrail block.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::EndpointNotFound`] if no endpoint matches the method and path.
    /// - [`BridgeError::MissingParameter`] if a path placeholder or required parameter has no
    ///   value.
    /// - [`BridgeError::Runtime`] if a header name/value or the URL cannot be built.
    pub async fn execute(
        &self,
        api: &ApiDescriptor,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let (endpoint, captured) = match_endpoint(api, &request.method, &request.path)?;
        let placed = place_parameters(endpoint, &request, captured)?;
        let url = build_url(&api.base_url, &endpoint.path, &placed.path_values)?;

        let guardrail = Guardrail::from_settings(&api.settings)?;
        if let GuardrailDecision::RequireConfirmation(warning) =
            guardrail.check(&request.method, &request.path, request.confirmed)
        {
            tracing::info!(
                api = %api.name,
                method = %request.method,
                path = %request.path,
                "Destructive call held for confirmation"
            );
            return Ok(ExecutionResult::blocked(warning));
        }

        let timeout = api.settings.request_timeout();
        let mut outbound = OutboundRequest::new(request.method.clone(), url);
        outbound.timeout = Some(timeout);
        for (name, value) in &placed.query {
            outbound.append_query(name, value);
        }
        for (name, value) in request.headers.iter().chain(&placed.headers) {
            outbound.insert_header(name, value)?;
        }
        outbound.set_cookies(&placed.cookies)?;
        if !outbound.headers.contains_key(ACCEPT) {
            outbound.insert_header(ACCEPT.as_str(), "application/json")?;
        }
        if let Some(body) = request.body {
            if MethodSemantics::of(&request.method).carries_body() {
                outbound.body = Some(body);
            } else {
                tracing::debug!(method = %request.method, "Dropping body for a read-only method");
            }
        }
        apply_auth(&api.auth, &mut outbound)?;

        let window = PageWindow {
            offset: request.offset.unwrap_or(0),
            limit: request.limit.unwrap_or(api.settings.default_page_size),
        };
        Ok(self.dispatch(api, outbound, window).await)
    }

    async fn dispatch(
        &self,
        api: &ApiDescriptor,
        request: OutboundRequest,
        window: PageWindow,
    ) -> ExecutionResult {
        let timeout = api.settings.request_timeout();
        let gate = self.gates.gate(&api.name, api.settings.rate_limit_per_second);
        let method = request.method.clone();
        let redacted = redact_url(&request.url);
        let started = Instant::now();

        tracing::debug!(api = %api.name, method = %method, url = %redacted, "Sending request");

        let outcome = tokio::time::timeout(timeout, async {
            if let Err(e) = gate.acquire(timeout).await {
                return Err(TransportError::Timeout(e.to_string()));
            }
            self.transport.send(request).await
        })
        .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(
                    api = %api.name,
                    method = %method,
                    url = %redacted,
                    error = %e,
                    "Request failed"
                );
                return ExecutionResult::failed(transport_failure(e));
            }
            Err(_) => {
                tracing::warn!(
                    api = %api.name,
                    method = %method,
                    url = %redacted,
                    timeout_secs = timeout.as_secs(),
                    "Request timed out"
                );
                return ExecutionResult::failed(CallFailure::Timeout {
                    message: format!("Request timed out after {}s", timeout.as_secs()),
                });
            }
        };

        tracing::debug!(
            api = %api.name,
            method = %method,
            url = %redacted,
            status = response.status,
            elapsed = ?started.elapsed(),
            "Received response"
        );
        classify_response(response, window)
    }
}

fn transport_failure(e: TransportError) -> CallFailure {
    match e {
        TransportError::Timeout(_) => CallFailure::Timeout {
            message: e.to_string(),
        },
        TransportError::Connect(_)
        | TransportError::Body(_)
        | TransportError::TooLarge(_)
        | TransportError::Other(_) => CallFailure::Connection {
            message: e.to_string(),
        },
    }
}

fn classify_response(response: InboundResponse, window: PageWindow) -> ExecutionResult {
    let status = response.status;
    let data = decode_body(&response.body, response.content_type.as_deref());

    if status >= 400 {
        let message = error_message(status, &data);
        return ExecutionResult {
            status_code: Some(status),
            data,
            truncated: false,
            total_count: None,
            auth_error: status == 401 || status == 403,
            destructive_warning: None,
            error: Some(CallFailure::Upstream { status, message }),
        };
    }

    let shaped = shape_payload(data, window);
    ExecutionResult {
        status_code: Some(status),
        data: shaped.data,
        truncated: shaped.truncated,
        total_count: shaped.total_count,
        auth_error: false,
        destructive_warning: None,
        error: None,
    }
}

/// Find the endpoint for a call. `path` may be the template itself or a concrete path; for a
/// concrete path the placeholder segments are returned as captured (still URL-encoded) values.
fn match_endpoint<'a>(
    api: &'a ApiDescriptor,
    method: &Method,
    path: &str,
) -> Result<(&'a EndpointDescriptor, Vec<(String, String)>)> {
    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if let Some(ep) = api.endpoint(method, &normalized) {
        return Ok((ep, Vec::new()));
    }

    // Prefer the template with the most literal text (`/pets/mine` over `/pets/{id}`).
    let mut best: Option<(usize, &EndpointDescriptor, Vec<(String, String)>)> = None;
    for ep in api.endpoints().iter().filter(|e| &e.method == method) {
        if let Some(captures) = match_template(&ep.path, &normalized) {
            let literal = ep.path.len()
                - ep
                    .path_placeholders()
                    .iter()
                    .map(|name| name.len() + 2)
                    .sum::<usize>();
            if best.as_ref().is_none_or(|(l, _, _)| literal > *l) {
                best = Some((literal, ep, captures));
            }
        }
    }

    best.map(|(_, ep, captures)| (ep, captures))
        .ok_or_else(|| BridgeError::EndpointNotFound {
            api: api.name.clone(),
            method: method.to_string(),
            path: path.to_string(),
            available: api.endpoint_keys(),
        })
}

fn match_template(template: &str, path: &str) -> Option<Vec<(String, String)>> {
    let t: Vec<&str> = template.trim_matches('/').split('/').collect();
    let p: Vec<&str> = path.trim_matches('/').split('/').collect();
    if t.len() != p.len() {
        return None;
    }

    let mut captures = Vec::new();
    for (ts, ps) in t.iter().zip(&p) {
        if !match_pieces(&segment_pieces(ts), ps, &mut captures) {
            return None;
        }
    }
    Some(captures)
}

#[derive(Debug, Clone, Copy)]
enum Piece<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Split one template segment such as `{name}.{ext}` into literal and placeholder pieces.
fn segment_pieces(segment: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = segment;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        if start > 0 {
            pieces.push(Piece::Literal(&rest[..start]));
        }
        pieces.push(Piece::Placeholder(&rest[start + 1..start + 1 + len]));
        rest = &rest[start + len + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }
    pieces
}

/// Match `text` against `pieces`, capturing a non-empty value per placeholder. A placeholder takes
/// the longest value that still lets the rest of the segment match.
fn match_pieces(pieces: &[Piece<'_>], text: &str, captures: &mut Vec<(String, String)>) -> bool {
    match pieces.split_first() {
        None => text.is_empty(),
        Some((Piece::Literal(lit), rest)) => text
            .strip_prefix(lit)
            .is_some_and(|tail| match_pieces(rest, tail, captures)),
        Some((Piece::Placeholder(name), rest)) => {
            for end in (1..=text.len()).rev() {
                if !text.is_char_boundary(end) {
                    continue;
                }
                captures.push(((*name).to_string(), text[..end].to_string()));
                if match_pieces(rest, &text[end..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
    }
}

#[derive(Debug, Default)]
struct PlacedParameters {
    /// Placeholder name to its already-encoded path segment.
    path_values: HashMap<String, String>,
    query: Vec<(String, Value)>,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
}

fn place_parameters(
    endpoint: &EndpointDescriptor,
    request: &ExecutionRequest,
    captured: Vec<(String, String)>,
) -> Result<PlacedParameters> {
    let template_names = endpoint.path_placeholders();
    let mut placed = PlacedParameters {
        path_values: captured.into_iter().collect(),
        ..PlacedParameters::default()
    };

    for param in &request.params {
        if param.value.is_null() {
            continue;
        }
        let location = param
            .location
            .or_else(|| endpoint.parameter(&param.name).map(|p| p.location))
            .unwrap_or(if template_names.contains(&param.name.as_str()) {
                ParamLocation::Path
            } else {
                ParamLocation::Query
            });

        match location {
            ParamLocation::Path => {
                placed.path_values.insert(
                    param.name.clone(),
                    encode_path_segment(&value_to_string(&param.value)),
                );
            }
            ParamLocation::Query => placed.query.push((param.name.clone(), param.value.clone())),
            ParamLocation::Header => placed
                .headers
                .push((param.name.clone(), value_to_string(&param.value))),
            ParamLocation::Cookie => placed
                .cookies
                .push((param.name.clone(), value_to_string(&param.value))),
        }
    }

    for declared in endpoint.parameters.iter().filter(|p| p.required) {
        let present = match declared.location {
            ParamLocation::Path => placed.path_values.contains_key(&declared.name),
            ParamLocation::Query => placed.query.iter().any(|(n, _)| *n == declared.name),
            ParamLocation::Header => placed
                .headers
                .iter()
                .chain(&request.headers)
                .any(|(n, _)| n.eq_ignore_ascii_case(&declared.name)),
            ParamLocation::Cookie => placed.cookies.iter().any(|(n, _)| *n == declared.name),
        };
        if !present {
            return Err(BridgeError::MissingParameter {
                name: declared.name.clone(),
                location: declared.location,
            });
        }
    }

    Ok(placed)
}

/// Substitute every `{name}` placeholder and join onto the base URL. A segment that a
/// substitution turns into `.` or `..` is refused.
fn build_url(base_url: &str, template: &str, path_values: &HashMap<String, String>) -> Result<Url> {
    let mut segments = Vec::new();
    for segment in template.trim_start_matches('/').split('/') {
        let mut filled = String::with_capacity(segment.len());
        let mut substituted = None;
        for piece in segment_pieces(segment) {
            match piece {
                Piece::Literal(lit) => filled.push_str(lit),
                Piece::Placeholder(name) => {
                    let value = path_values
                        .get(name)
                        .ok_or_else(|| BridgeError::MissingParameter {
                            name: name.to_string(),
                            location: ParamLocation::Path,
                        })?;
                    filled.push_str(value);
                    substituted = Some(name);
                }
            }
        }
        if let Some(name) = substituted
            && is_dot_segment(&filled)
        {
            return Err(BridgeError::Runtime(format!(
                "Path parameter '{name}' must not produce a '.' or '..' segment"
            )));
        }
        segments.push(filled);
    }

    let url = format!("{}/{}", base_url.trim_end_matches('/'), segments.join("/"));
    Url::parse(&url).map_err(|e| BridgeError::Runtime(format!("Invalid URL: {e}")))
}

/// True for an already-encoded segment that URL parsing would treat as `.` or `..`
/// (`%2e` counts as a dot).
fn is_dot_segment(encoded: &str) -> bool {
    let decoded = encoded.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_path_segment(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use async_trait::async_trait;
    use bridge_http_tools::config::{ApiKeyLocation, ApiSettings, AuthConfig};
    use parking_lot::Mutex;
    use reqwest::header::{AUTHORIZATION, COOKIE};
    use serde_json::json;
    use std::time::Duration;

    type Responder = dyn Fn(&OutboundRequest) -> std::result::Result<InboundResponse, TransportError>
        + Send
        + Sync;

    struct FakeTransport {
        sent: Mutex<Vec<OutboundRequest>>,
        delay: Duration,
        respond: Box<Responder>,
    }

    impl FakeTransport {
        fn new(
            respond: impl Fn(&OutboundRequest) -> std::result::Result<InboundResponse, TransportError>
            + Send
            + Sync
            + 'static,
        ) -> Arc<Self> {
            Self::delayed(Duration::ZERO, respond)
        }

        fn delayed(
            delay: Duration,
            respond: impl Fn(&OutboundRequest) -> std::result::Result<InboundResponse, TransportError>
            + Send
            + Sync
            + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                delay,
                respond: Box::new(respond),
            })
        }

        fn json(status: u16, body: Value) -> Arc<Self> {
            Self::new(move |_| Ok(json_response(status, &body)))
        }

        fn calls(&self) -> usize {
            self.sent.lock().len()
        }

        fn last(&self) -> OutboundRequest {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn send(
            &self,
            request: OutboundRequest,
        ) -> std::result::Result<InboundResponse, TransportError> {
            self.sent.lock().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.respond)(&request)
        }
    }

    fn json_response(status: u16, body: &Value) -> InboundResponse {
        InboundResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: serde_json::to_vec(body).unwrap(),
        }
    }

    fn api_with(auth: AuthConfig, settings: ApiSettings) -> ApiDescriptor {
        let doc = json!({
            "openapi": "3.0.0",
            "paths": {
                "/pets": {
                    "get": {"parameters": [
                        {"name": "status", "in": "query", "schema": {"type": "array"}},
                        {"name": "X-Trace", "in": "header"},
                        {"name": "session", "in": "cookie"}
                    ], "responses": {}},
                    "post": {"responses": {}}
                },
                "/pets/mine": {"get": {"responses": {}}},
                "/pets/{pet_id}": {
                    "parameters": [{"name": "pet_id", "in": "path", "required": true}],
                    "get": {"responses": {}},
                    "put": {"responses": {}},
                    "patch": {"responses": {}},
                    "delete": {"responses": {}}
                },
                "/reports/{report_id}": {"get": {"responses": {}}},
                "/reports/{report_id}.{format}": {"get": {"responses": {}}},
                "/search": {"get": {"parameters": [
                    {"name": "q", "in": "query", "required": true}
                ], "responses": {}}}
            }
        });
        ApiDescriptor::new(
            "petstore",
            "https://api.example.com/v1",
            auth,
            settings,
            normalize(&doc).unwrap(),
        )
        .unwrap()
    }

    fn api() -> ApiDescriptor {
        api_with(
            AuthConfig::None,
            ApiSettings {
                rate_limit_per_second: 100,
                ..ApiSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn destructive_methods_need_confirmation() {
        let api = api();
        for method in [Method::DELETE, Method::PUT, Method::PATCH] {
            let transport = FakeTransport::json(200, json!({}));
            let exec = Executor::new(transport.clone());

            let blocked = exec
                .execute(
                    &api,
                    ExecutionRequest::new(method.clone(), "/pets/{pet_id}").param("pet_id", json!(1)),
                )
                .await
                .unwrap();
            assert_eq!(transport.calls(), 0, "{method} must not reach the network");
            assert!(blocked.destructive_warning.is_some());
            assert_eq!(blocked.status_code, None);

            let done = exec
                .execute(
                    &api,
                    ExecutionRequest::new(method.clone(), "/pets/{pet_id}")
                        .param("pet_id", json!(1))
                        .confirmed(true),
                )
                .await
                .unwrap();
            assert_eq!(transport.calls(), 1);
            assert!(done.destructive_warning.is_none());
            assert_eq!(done.status_code, Some(200));
        }
    }

    #[tokio::test]
    async fn missing_parameters_fail_before_any_call() {
        let api = api();
        let transport = FakeTransport::json(200, json!({}));
        let exec = Executor::new(transport.clone());

        let err = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets/{pet_id}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::MissingParameter { ref name, location: ParamLocation::Path } if name == "pet_id"
        ));

        // A destructive call with a missing parameter still fails as missing, not blocked.
        let err = exec
            .execute(&api, ExecutionRequest::new(Method::DELETE, "/pets/{pet_id}"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MissingParameter { .. }));

        let err = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/search"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::MissingParameter { ref name, location: ParamLocation::Query } if name == "q"
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_endpoint_lists_alternatives() {
        let exec = Executor::new(FakeTransport::json(200, json!({})));
        let err = exec
            .execute(&api(), ExecutionRequest::new(Method::POST, "/nope"))
            .await
            .unwrap_err();
        let BridgeError::EndpointNotFound { available, .. } = err else {
            panic!("unexpected error: {err}");
        };
        assert!(available.contains(&"GET /pets".to_string()));
        assert!(available.contains(&"DELETE /pets/{pet_id}".to_string()));
    }

    #[tokio::test]
    async fn concrete_paths_match_templates() {
        let transport = FakeTransport::json(200, json!({}));
        let exec = Executor::new(transport.clone());
        let api = api();

        exec.execute(&api, ExecutionRequest::new(Method::GET, "/pets/42"))
            .await
            .unwrap();
        assert_eq!(transport.last().url.path(), "/v1/pets/42");

        exec.execute(&api, ExecutionRequest::new(Method::GET, "pets/mine"))
            .await
            .unwrap();
        assert_eq!(transport.last().url.path(), "/v1/pets/mine");

        exec.execute(
            &api,
            ExecutionRequest::new(Method::GET, "/pets/{pet_id}").param("pet_id", json!("a b/c")),
        )
        .await
        .unwrap();
        assert_eq!(transport.last().url.path(), "/v1/pets/a%20b%2Fc");

        exec.execute(&api, ExecutionRequest::new(Method::GET, "/reports/7.csv"))
            .await
            .unwrap();
        assert_eq!(transport.last().url.path(), "/v1/reports/7.csv");

        exec.execute(&api, ExecutionRequest::new(Method::GET, "/reports/7"))
            .await
            .unwrap();
        assert_eq!(transport.last().url.path(), "/v1/reports/7");
    }

    #[tokio::test]
    async fn parameters_land_in_their_locations_and_auth_wins() {
        let transport = FakeTransport::json(200, json!([]));
        let exec = Executor::new(transport.clone());
        let api = api_with(
            AuthConfig::ApiKey {
                key: "secret".to_string(),
                name: "X-API-Key".to_string(),
                location: ApiKeyLocation::Header,
            },
            ApiSettings {
                rate_limit_per_second: 100,
                ..ApiSettings::default()
            },
        );

        exec.execute(
            &api,
            ExecutionRequest::new(Method::GET, "/pets")
                .param("status", json!(["available", "sold"]))
                .param("X-Trace", json!("t-1"))
                .param("session", json!("abc"))
                .param("unknown", json!(7))
                .header("x-api-key", "caller-supplied")
                .window(5, 0),
        )
        .await
        .unwrap();

        let sent = transport.last();
        assert_eq!(
            sent.url.query(),
            Some("status=available&status=sold&unknown=7")
        );
        assert_eq!(sent.headers["x-trace"], "t-1");
        assert_eq!(sent.headers[COOKIE], "session=abc");
        assert_eq!(sent.headers[ACCEPT], "application/json");
        assert_eq!(sent.headers.get_all("x-api-key").iter().count(), 1);
        assert_eq!(sent.headers["x-api-key"], "secret");
        assert!(sent.body.is_none());
    }

    #[tokio::test]
    async fn bearer_and_query_key_auth() {
        let settings = ApiSettings {
            rate_limit_per_second: 100,
            ..ApiSettings::default()
        };

        let transport = FakeTransport::json(200, json!({}));
        let exec = Executor::new(transport.clone());
        let api = api_with(
            AuthConfig::Bearer {
                token: "tok".to_string(),
            },
            settings.clone(),
        );
        exec.execute(
            &api,
            ExecutionRequest::new(Method::GET, "/pets").header("Authorization", "Bearer mine"),
        )
        .await
        .unwrap();
        assert_eq!(transport.last().headers[AUTHORIZATION], "Bearer tok");

        let api = api_with(
            AuthConfig::ApiKey {
                key: "k".to_string(),
                name: "api_key".to_string(),
                location: ApiKeyLocation::Query,
            },
            settings,
        );
        exec.execute(
            &api,
            ExecutionRequest::new(Method::GET, "/pets").param("api_key", json!("mine")),
        )
        .await
        .unwrap();
        assert_eq!(transport.last().url.query(), Some("api_key=k"));
    }

    #[tokio::test]
    async fn body_is_sent_only_for_write_methods() {
        let transport = FakeTransport::json(201, json!({"id": 1}));
        let exec = Executor::new(transport.clone());
        let api = api();

        exec.execute(
            &api,
            ExecutionRequest::new(Method::POST, "/pets").body(json!({"name": "Rex"})),
        )
        .await
        .unwrap();
        assert_eq!(transport.last().body, Some(json!({"name": "Rex"})));

        exec.execute(
            &api,
            ExecutionRequest::new(Method::GET, "/pets").body(json!({"ignored": true})),
        )
        .await
        .unwrap();
        assert_eq!(transport.last().body, None);
    }

    #[tokio::test]
    async fn list_responses_are_windowed() {
        let items: Vec<Value> = (0..100).map(|i| json!({"id": i})).collect();
        let transport = FakeTransport::json(200, Value::Array(items));
        let exec = Executor::new(transport.clone());
        let api = api();

        let first = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets").window(20, 0))
            .await
            .unwrap();
        assert_eq!(first.data.as_array().unwrap().len(), 20);
        assert!(first.truncated);
        assert_eq!(first.total_count, Some(100));

        let last = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets").window(20, 80))
            .await
            .unwrap();
        assert_eq!(last.data[0]["id"], 80);
        assert_eq!(last.data[19]["id"], 99);

        // No window given: the API's page size applies.
        let default = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets"))
            .await
            .unwrap();
        assert_eq!(default.data.as_array().unwrap().len(), 20);

        // Windowing is local; nothing is forwarded upstream.
        assert_eq!(transport.last().url.query(), None);
    }

    #[tokio::test]
    async fn upstream_errors_are_classified() {
        let transport = FakeTransport::new(|req| {
            let status = match req.url.path() {
                "/v1/pets/401" => 401,
                "/v1/pets/403" => 403,
                "/v1/pets/404" => 404,
                _ => 502,
            };
            if status == 502 {
                return Ok(InboundResponse {
                    status,
                    content_type: Some("text/html".to_string()),
                    body: b"<h1>Bad gateway</h1>".to_vec(),
                });
            }
            Ok(json_response(status, &json!({"detail": format!("failed with {status}")})))
        });
        let exec = Executor::new(transport);
        let api = api();

        for (id, auth_error) in [(401, true), (403, true), (404, false)] {
            let r = exec
                .execute(&api, ExecutionRequest::new(Method::GET, format!("/pets/{id}")))
                .await
                .unwrap();
            assert_eq!(r.status_code, Some(id));
            assert_eq!(r.auth_error, auth_error);
            assert_eq!(
                r.error,
                Some(CallFailure::Upstream {
                    status: id,
                    message: format!("failed with {id}")
                })
            );
            assert!(!r.is_success());
        }

        let r = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets/1"))
            .await
            .unwrap();
        assert_eq!(r.status_code, Some(502));
        assert_eq!(r.data, json!("<h1>Bad gateway</h1>"));
    }

    #[tokio::test]
    async fn transport_failures_have_no_status() {
        let api = api();

        let exec = Executor::new(FakeTransport::new(|_| {
            Err(TransportError::Connect("connection refused".to_string()))
        }));
        let r = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets"))
            .await
            .unwrap();
        assert_eq!(r.status_code, None);
        assert!(matches!(r.error, Some(CallFailure::Connection { .. })));

        let exec = Executor::new(FakeTransport::new(|_| {
            Err(TransportError::Timeout("deadline".to_string()))
        }));
        let r = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets"))
            .await
            .unwrap();
        assert!(matches!(r.error, Some(CallFailure::Timeout { .. })));
    }

    #[tokio::test]
    async fn hung_upstream_resolves_to_timeout() {
        let api = api_with(
            AuthConfig::None,
            ApiSettings {
                request_timeout_secs: 1,
                rate_limit_per_second: 100,
                ..ApiSettings::default()
            },
        );
        let exec = Executor::new(FakeTransport::delayed(Duration::from_secs(30), |_| {
            Ok(json_response(200, &json!({})))
        }));

        let started = Instant::now();
        let r = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/pets"))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(r.status_code, None);
        assert!(matches!(r.error, Some(CallFailure::Timeout { .. })));
    }

    #[tokio::test]
    async fn calls_share_the_api_rate_gate() {
        let api = api_with(
            AuthConfig::None,
            ApiSettings {
                rate_limit_per_second: 20,
                ..ApiSettings::default()
            },
        );
        let exec = Executor::new(FakeTransport::json(200, json!({})));
        let clone = exec.clone();

        let started = Instant::now();
        let a = exec.execute(&api, ExecutionRequest::new(Method::GET, "/pets"));
        let b = clone.execute(&api, ExecutionRequest::new(Method::GET, "/pets"));
        let c = exec.execute(&api, ExecutionRequest::new(Method::GET, "/pets"));
        let (a, b, c) = tokio::join!(a, b, c);
        assert!(a.unwrap().is_success() && b.unwrap().is_success() && c.unwrap().is_success());
        // Three admissions at 20/s span at least two 50ms intervals.
        assert!(started.elapsed() >= Duration::from_millis(95));
    }

    #[tokio::test]
    async fn dot_segments_cannot_escape_the_template() {
        let transport = FakeTransport::json(200, json!({}));
        let exec = Executor::new(transport.clone());
        let api = api();

        for path in ["/pets/..", "/pets/.", "/pets/%2e%2E", "/pets/.%2e"] {
            let err = exec
                .execute(&api, ExecutionRequest::new(Method::GET, path))
                .await
                .unwrap_err();
            assert!(
                matches!(err, BridgeError::Runtime(ref m) if m.contains("pet_id")),
                "{path}: {err}"
            );
        }
        for value in ["..", "."] {
            let err = exec
                .execute(
                    &api,
                    ExecutionRequest::new(Method::DELETE, "/pets/{pet_id}")
                        .param("pet_id", json!(value))
                        .confirmed(true),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::Runtime(_)), "{value}: {err}");
        }
        assert_eq!(transport.calls(), 0);

        // Dots inside a value are ordinary characters; an encoded `%2e` from the caller is
        // escaped and stays literal.
        for value in ["a..b", "...", "%2e%2e"] {
            exec.execute(
                &api,
                ExecutionRequest::new(Method::GET, "/pets/{pet_id}").param("pet_id", json!(value)),
            )
            .await
            .unwrap();
        }
        assert_eq!(transport.last().url.path(), "/v1/pets/%252e%252e");
        assert_eq!(transport.calls(), 3);

        // Only the finished segment counts when a placeholder shares it with literal text.
        exec.execute(
            &api,
            ExecutionRequest::new(Method::GET, "/reports/{report_id}.{format}")
                .param("report_id", json!(".."))
                .param("format", json!("csv")),
        )
        .await
        .unwrap();
        assert_eq!(transport.last().url.path(), "/v1/reports/...csv");

        let err = exec
            .execute(&api, ExecutionRequest::new(Method::GET, "/reports/.."))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Runtime(ref m) if m.contains("report_id")), "{err}");
        assert_eq!(transport.calls(), 4);
    }

    #[test]
    fn template_matching() {
        assert_eq!(
            match_template("/pets/{id}/toys/{toy}", "/pets/1/toys/ball"),
            Some(vec![
                ("id".to_string(), "1".to_string()),
                ("toy".to_string(), "ball".to_string())
            ])
        );
        assert_eq!(match_template("/pets/{id}", "/pets"), None);
        assert_eq!(match_template("/pets/{id}", "/users/1"), None);
        assert_eq!(match_template("/pets/{id}", "/pets//"), None);
    }

    #[test]
    fn placeholders_inside_a_segment_are_captured() {
        assert_eq!(
            match_template("/files/{name}.json", "/files/report.v2.json"),
            Some(vec![("name".to_string(), "report.v2".to_string())])
        );
        assert_eq!(
            match_template("/files/{name}.{ext}", "/files/a.tar.gz"),
            Some(vec![
                ("name".to_string(), "a.tar".to_string()),
                ("ext".to_string(), "gz".to_string())
            ])
        );
        assert_eq!(
            match_template("/reports/v{version}/latest", "/reports/v3/latest"),
            Some(vec![("version".to_string(), "3".to_string())])
        );
        assert_eq!(match_template("/files/{name}.json", "/files/.json"), None);
        assert_eq!(match_template("/files/{name}.json", "/files/report.xml"), None);
    }
}
