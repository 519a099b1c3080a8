//! TabGuard Core Library
//!
//! This crate holds the rule model shared by every TabGuard component.
//!
//! # Architecture
//!
//! Filter lists are compiled into ordered trigger/action rules, serialized as
//! JSON artifacts and handed to a host content-blocking engine. This crate
//! owns the in-memory rule model, the bit-exact artifact schema and a
//! reference evaluator that mirrors the host engine's top-to-bottom
//! semantics.
//!
//! # Modules
//!
//! - `types`: Rule, trigger, action and resource-type definitions
//! - `schema`: Artifact JSON wire format
//! - `url`: Host extraction and domain normalization
//! - `matcher`: Reference rule evaluator

pub mod matcher;
pub mod schema;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use matcher::{Matcher, MatcherError};
pub use schema::{rules_from_json, rules_to_json, SchemaError};
pub use types::{Action, MatchDecision, MatchResult, RequestContext, ResourceType, Rule, Trigger};
pub use url::{domain_of_url, extract_host, host_matches_domain, normalize_domain};
