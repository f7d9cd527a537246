//! OpenAPI bridge core.
//!
//! Turns OpenAPI 3.x and Swagger 2.0 documents into a canonical endpoint model
//! ([`normalize`]), keeps one descriptor per configured API ([`registry`]) and executes calls
//! against those APIs behind the destructive-operation guardrail ([`executor`], [`batch`]).
//!
//! Fetching spec documents, resolving secrets and exposing operations to a caller all live
//! outside this crate.

pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod normalize;
pub mod registry;
pub mod resolver;
