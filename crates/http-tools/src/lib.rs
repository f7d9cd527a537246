//! HTTP-level building blocks for the OpenAPI bridge.
//!
//! This crate is used by `bridge-openapi-tools` (normalization, registry, executor, batches).
//!
//! It intentionally contains **no** `OpenAPI` document handling: everything here works on plain
//! methods, URLs, headers and response bytes.

pub mod config;
pub mod guardrail;
pub mod rate_gate;
pub mod response_shaping;
pub mod runtime;
pub mod safety;
pub mod semantics;
