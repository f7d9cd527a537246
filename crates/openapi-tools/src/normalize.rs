//! Spec normalization: OpenAPI 3.x / Swagger 2.0 document to [`NormalizedSpec`].
//!
//! Swagger 2 documents are first rewritten into the OpenAPI 3 `components` layout (including
//! every internal `$ref`), so reference resolution and endpoint extraction run one code path for
//! both dialects. Only the places where the dialects genuinely describe things differently
//! (parameter schemas, request bodies, response schemas, base URL) branch on [`Dialect`].

use crate::error::{BridgeError, Result};
use crate::model::{
    Dialect, EndpointDescriptor, NormalizedSpec, ParameterDescriptor, SecurityRequirement,
};
use crate::resolver::{
    CyclePolicy, DEFAULT_MAX_EXPANDED_NODES, DEFAULT_MAX_REF_DEPTH, RefResolver,
};
use bridge_http_tools::config::ParamLocation;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use url::Url;

/// Methods read from a path item, in this order.
fn operation_methods() -> [(&'static str, Method); 8] {
    [
        ("get", Method::GET),
        ("put", Method::PUT),
        ("post", Method::POST),
        ("delete", Method::DELETE),
        ("options", Method::OPTIONS),
        ("head", Method::HEAD),
        ("patch", Method::PATCH),
        ("trace", Method::TRACE),
    ]
}

/// Response codes consulted for the response schema, in priority order.
const RESPONSE_PRIORITY: &[&str] = &["200", "201", "default"];

/// Swagger 2 top-level sections and where they live in the OpenAPI 3 layout.
const SWAGGER2_SECTIONS: &[(&str, &str)] = &[
    ("definitions", "schemas"),
    ("parameters", "parameters"),
    ("responses", "responses"),
    ("securityDefinitions", "securitySchemes"),
];

/// Schema keywords copied from a Swagger 2 non-body parameter into its schema.
const SWAGGER2_SCHEMA_KEYS: &[&str] = &[
    "type",
    "format",
    "items",
    "enum",
    "default",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "multipleOf",
];

/// Per-API knobs for `$ref` expansion. Both fields may be omitted in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NormalizeOptions {
    pub max_ref_depth: usize,
    pub cycles: CyclePolicy,
    /// Bound on the expanded size of the whole document, in JSON nodes.
    pub max_expanded_nodes: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
            cycles: CyclePolicy::Fail,
            max_expanded_nodes: DEFAULT_MAX_EXPANDED_NODES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpecNormalizer {
    options: NormalizeOptions,
}

/// Normalize with default options.
///
/// # Errors
///
/// See [`SpecNormalizer::normalize_with_source`].
pub fn normalize(raw: &Value) -> Result<NormalizedSpec> {
    SpecNormalizer::new().normalize(raw)
}

impl SpecNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: NormalizeOptions) -> Self {
        Self { options }
    }

    /// # Errors
    ///
    /// See [`SpecNormalizer::normalize_with_source`].
    pub fn normalize(&self, raw: &Value) -> Result<NormalizedSpec> {
        self.normalize_with_source(raw, None)
    }

    /// Normalize a parsed document. `source` is where it was loaded from; an http(s) source lets
    /// relative server URLs resolve.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnsupportedVersion`] for a version marker other than 3.x / 2.x.
    /// - [`BridgeError::Spec`] for a missing marker, a non-object root or a missing `paths`.
    /// - [`BridgeError::Reference`] when a `$ref` cannot be resolved.
    pub fn normalize_with_source(
        &self,
        raw: &Value,
        source: Option<&str>,
    ) -> Result<NormalizedSpec> {
        let root = raw
            .as_object()
            .ok_or_else(|| BridgeError::spec("$", "spec root must be an object"))?;
        let dialect = detect_dialect(root)?;
        if !root.get("paths").is_some_and(Value::is_object) {
            return Err(BridgeError::spec("paths", "required object is missing"));
        }

        let doc: Cow<'_, Value> = match dialect {
            Dialect::OpenApi3 => Cow::Borrowed(raw),
            Dialect::Swagger2 => Cow::Owned(canonicalize_swagger2(root)),
        };
        let root = doc
            .as_object()
            .ok_or_else(|| BridgeError::spec("$", "spec root must be an object"))?;

        let info = root.get("info").and_then(Value::as_object);
        let title = info
            .and_then(|i| str_field(i, "title"))
            .unwrap_or("Untitled API")
            .to_string();
        let version = info
            .and_then(|i| info_version(i.get("version")))
            .unwrap_or_default();
        let description = info
            .and_then(|i| str_field(i, "description"))
            .map(str::to_string);

        let base_url = match dialect {
            Dialect::OpenApi3 => openapi3_base_url(root, source),
            Dialect::Swagger2 => swagger2_base_url(root, source),
        };

        let mut resolver = RefResolver::new(&doc)
            .with_max_depth(self.options.max_ref_depth)
            .with_cycle_policy(self.options.cycles)
            .with_node_budget(self.options.max_expanded_nodes);
        let global_security = match root.get("security") {
            Some(v) => parse_security(&resolver.resolve(v)?),
            None => Vec::new(),
        };

        let mut endpoints = Vec::new();
        let paths = root
            .get("paths")
            .and_then(Value::as_object)
            .into_iter()
            .flatten();
        for (path, raw_item) in paths {
            if !raw_item.is_object() {
                tracing::warn!(path = %path, "Skipping path item that is not an object");
                continue;
            }
            let item = resolver.resolve(raw_item)?;
            let Some(item) = item.as_object() else {
                tracing::warn!(path = %path, "Skipping path item whose $ref is not an object");
                continue;
            };
            let shared_params = item.get("parameters").and_then(Value::as_array);

            for (key, method) in operation_methods() {
                let Some(op) = item.get(key).and_then(Value::as_object) else {
                    continue;
                };
                let ctx = OperationContext {
                    dialect,
                    path,
                    method: &method,
                    global_security: &global_security,
                };
                endpoints.push(ctx.build(op, shared_params));
            }
        }

        tracing::debug!(
            dialect = ?dialect,
            title = %title,
            endpoints = endpoints.len(),
            "Normalized spec"
        );

        Ok(NormalizedSpec {
            dialect,
            title,
            version,
            description,
            base_url,
            endpoints,
        })
    }
}

fn detect_dialect(root: &Map<String, Value>) -> Result<Dialect> {
    if let Some(v) = root.get("openapi") {
        let version = marker_string(v);
        if version.starts_with("3.") {
            return Ok(Dialect::OpenApi3);
        }
        return Err(BridgeError::UnsupportedVersion { version });
    }
    if let Some(v) = root.get("swagger") {
        let version = marker_string(v);
        if version == "2" || version.starts_with("2.") {
            return Ok(Dialect::Swagger2);
        }
        return Err(BridgeError::UnsupportedVersion { version });
    }
    Err(BridgeError::spec(
        "openapi|swagger",
        "document declares neither an 'openapi' nor a 'swagger' version",
    ))
}

/// Version markers are strings, but unquoted YAML turns `2.0` into a number.
fn marker_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn info_version(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        other => Some(marker_string(other)),
    }
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Rewrite a Swagger 2 document into the OpenAPI 3 component layout.
fn canonicalize_swagger2(root: &Map<String, Value>) -> Value {
    let mut out = root.clone();
    let mut components = Map::new();
    for (v2, v3) in SWAGGER2_SECTIONS {
        if let Some(section) = out.remove(*v2) {
            components.insert((*v3).to_string(), section);
        }
    }
    out.insert("components".to_string(), Value::Object(components));

    let mut doc = Value::Object(out);
    rewrite_swagger2_refs(&mut doc);
    doc
}

fn rewrite_swagger2_refs(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(r)) = map.get_mut("$ref") {
                for (v2, v3) in SWAGGER2_SECTIONS {
                    if let Some(rest) = r.strip_prefix(&format!("#/{v2}/")) {
                        *r = format!("#/components/{v3}/{rest}");
                        break;
                    }
                }
            }
            for v in map.values_mut() {
                rewrite_swagger2_refs(v);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_swagger2_refs),
        _ => {}
    }
}

fn openapi3_base_url(root: &Map<String, Value>, source: Option<&str>) -> Option<String> {
    let server = root.get("servers")?.as_array()?.first()?.as_object()?;
    let mut url = server.get("url")?.as_str()?.to_string();
    if let Some(vars) = server.get("variables").and_then(Value::as_object) {
        for (name, var) in vars {
            if let Some(default) = var.get("default") {
                let default = marker_string(default);
                url = url.replace(&format!("{{{name}}}"), &default);
            }
        }
    }
    Some(absolutize(&url, source))
}

fn swagger2_base_url(root: &Map<String, Value>, source: Option<&str>) -> Option<String> {
    let base_path = str_field(root, "basePath").unwrap_or("");
    let Some(host) = str_field(root, "host") else {
        // No host: the API is served from the host the spec came from.
        if base_path.is_empty() {
            return None;
        }
        return Some(absolutize(base_path, source));
    };
    let scheme = root
        .get("schemes")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(Value::as_str)
        .unwrap_or("https");
    let url = format!("{scheme}://{host}{base_path}");
    Some(url.trim_end_matches('/').to_string())
}

/// Join a relative server URL against an http(s) spec source. Anything else is returned as-is
/// (minus a trailing slash); the registry rejects non-absolute base URLs.
fn absolutize(url: &str, source: Option<&str>) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.trim_end_matches('/').to_string();
    }
    let joined = source
        .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
        .and_then(|s| Url::parse(s).ok())
        .and_then(|mut base| {
            base.set_fragment(None);
            base.join(url).ok()
        });
    match joined {
        Some(u) => u.as_str().trim_end_matches('/').to_string(),
        None => url.trim_end_matches('/').to_string(),
    }
}

fn parse_security(value: &Value) -> Vec<SecurityRequirement> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|req| {
            req.iter()
                .map(|(scheme, scopes)| {
                    let scopes = scopes
                        .as_array()
                        .map(|s| s.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default();
                    (scheme.clone(), scopes)
                })
                .collect()
        })
        .collect()
}

struct OperationContext<'a> {
    dialect: Dialect,
    path: &'a str,
    method: &'a Method,
    global_security: &'a [SecurityRequirement],
}

impl OperationContext<'_> {
    fn build(
        &self,
        op: &Map<String, Value>,
        shared_params: Option<&Vec<Value>>,
    ) -> EndpointDescriptor {
        let merged = merge_parameters(
            shared_params.map(Vec::as_slice).unwrap_or_default(),
            op.get("parameters")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        );

        let mut parameters = Vec::new();
        let mut body_schema: Option<Value> = None;
        let mut form_fields: Vec<&Map<String, Value>> = Vec::new();
        for p in merged {
            let Some(name) = str_field(p, "name") else {
                tracing::warn!(
                    path = %self.path,
                    method = %self.method,
                    "Skipping parameter without a name"
                );
                continue;
            };
            let location = str_field(p, "in").unwrap_or("");
            match (ParamLocation::parse(location), location) {
                (Some(loc), _) => parameters.push(self.parameter(name, loc, p)),
                (None, "body") => {
                    body_schema = Some(p.get("schema").cloned().unwrap_or_else(|| json!({})));
                }
                (None, "formData") => form_fields.push(p),
                (None, other) => tracing::warn!(
                    path = %self.path,
                    method = %self.method,
                    parameter = %name,
                    location = %other,
                    "Skipping parameter with unknown location"
                ),
            }
        }

        let request_body_schema = match self.dialect {
            Dialect::OpenApi3 => op
                .get("requestBody")
                .and_then(|b| b.get("content"))
                .and_then(Value::as_object)
                .and_then(media_schema),
            Dialect::Swagger2 if !form_fields.is_empty() => Some(form_schema(&form_fields)),
            Dialect::Swagger2 => body_schema,
        };

        let security = match op.get("security") {
            Some(v) => parse_security(v),
            None => self.global_security.to_vec(),
        };

        let tags: BTreeSet<String> = op
            .get("tags")
            .and_then(Value::as_array)
            .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        EndpointDescriptor {
            path: self.path.to_string(),
            method: self.method.clone(),
            summary: str_field(op, "summary").map(str::to_string),
            description: str_field(op, "description").map(str::to_string),
            operation_id: str_field(op, "operationId").map(str::to_string),
            tags,
            parameters,
            request_body_schema,
            response_schema: self.response_schema(op),
            security,
            deprecated: op.get("deprecated").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    fn parameter(
        &self,
        name: &str,
        location: ParamLocation,
        p: &Map<String, Value>,
    ) -> ParameterDescriptor {
        let schema = match self.dialect {
            Dialect::OpenApi3 => p
                .get("schema")
                .cloned()
                .or_else(|| p.get("content").and_then(Value::as_object).and_then(media_schema))
                .unwrap_or_else(|| json!({})),
            Dialect::Swagger2 => swagger2_schema(p),
        };
        ParameterDescriptor {
            name: name.to_string(),
            location,
            // Path parameters are always required, whatever the document says.
            required: location == ParamLocation::Path
                || p.get("required").and_then(Value::as_bool).unwrap_or(false),
            description: str_field(p, "description").map(str::to_string),
            schema,
        }
    }

    fn response_schema(&self, op: &Map<String, Value>) -> Option<Value> {
        let responses = op.get("responses")?.as_object()?;
        let response = RESPONSE_PRIORITY.iter().find_map(|code| responses.get(*code))?;
        match self.dialect {
            Dialect::OpenApi3 => response
                .get("content")
                .and_then(Value::as_object)
                .and_then(media_schema),
            Dialect::Swagger2 => response.get("schema").cloned(),
        }
    }
}

/// Merge path-item parameters with operation parameters. Operation entries replace path-item
/// entries with the same `(name, in)`; first-seen order is kept.
fn merge_parameters<'a>(
    path_item_params: &'a [Value],
    operation_params: &'a [Value],
) -> Vec<&'a Map<String, Value>> {
    let mut merged: Vec<&Map<String, Value>> = Vec::new();
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();

    for p in path_item_params.iter().chain(operation_params).filter_map(Value::as_object) {
        let key = (
            str_field(p, "name").unwrap_or(""),
            str_field(p, "in").unwrap_or(""),
        );
        if let Some(i) = index.get(&key).copied() {
            merged[i] = p;
        } else {
            index.insert(key, merged.len());
            merged.push(p);
        }
    }

    merged
}

/// Pick a schema from an OpenAPI 3 `content` map: `application/json`, then any `+json`, then the
/// first entry.
fn media_schema(content: &Map<String, Value>) -> Option<Value> {
    let media = content
        .get("application/json")
        .or_else(|| {
            content
                .iter()
                .find(|(ct, _)| ct.split(';').next().is_some_and(|t| t.trim().ends_with("+json")))
                .map(|(_, v)| v)
        })
        .or_else(|| content.values().next())?;
    media.get("schema").cloned()
}

fn swagger2_schema(p: &Map<String, Value>) -> Value {
    let schema: Map<String, Value> = SWAGGER2_SCHEMA_KEYS
        .iter()
        .filter_map(|k| p.get(*k).map(|v| ((*k).to_string(), v.clone())))
        .collect();
    Value::Object(schema)
}

fn form_schema(fields: &[&Map<String, Value>]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for f in fields {
        let Some(name) = str_field(f, "name") else {
            continue;
        };
        let mut schema = swagger2_schema(f);
        if schema.get("type").and_then(Value::as_str) == Some("file") {
            schema = json!({"type": "string", "format": "binary"});
        }
        if let (Some(desc), Value::Object(s)) = (str_field(f, "description"), &mut schema) {
            s.insert("description".to_string(), Value::String(desc.to_string()));
        }
        properties.insert(name.to_string(), schema);
        if f.get("required").and_then(Value::as_bool).unwrap_or(false) {
            required.push(Value::String(name.to_string()));
        }
    }
    let mut out = json!({"type": "object", "properties": properties});
    if !required.is_empty()
        && let Value::Object(m) = &mut out
    {
        m.insert("required".to_string(), Value::Array(required));
    }
    out
}
