//! TabGuard Runtime
//!
//! Keeps compiled rule lists in sync with user state. Filter lists are
//! downloaded and cached, compiled into sharded artifacts, handed to the
//! host engine and applied to every registered surface. Navigations the
//! engine blocks go through an interactive decision flow.
//!
//! # Modules
//!
//! - `service`: `ContentBlocker` handle and the coordinator task
//! - `pipeline`: fetch → compile → shard → engine compile
//! - `artifact_store`: compiled artifacts and surface state
//! - `decision`: block decision state machine
//! - `filter_list` / `filter_source`: list registry, download and disk cache
//! - `host`: host engine and browser shell interfaces
//! - `settings`, `stats`, `whitelist`: persisted user state

pub mod artifact_store;
pub mod config;
pub mod decision;
pub mod error;
pub mod filter_list;
pub mod filter_source;
pub mod host;
pub mod persist;
pub mod pipeline;
pub mod service;
pub mod settings;
pub mod stats;
pub mod whitelist;

pub use artifact_store::{ArtifactStore, InstalledManifest, SurfaceState};
pub use config::Config;
pub use decision::{BlockDecisionController, BlockedSession, DecisionEffect};
pub use error::{Error, Result};
pub use filter_list::{FilterList, FilterListRegistry};
pub use filter_source::{FilterSource, HttpTransport, Transport, TransportError};
pub use host::{
    BrowserShell, CompiledArtifact, EngineError, HostEngine, InMemoryEngine, SurfaceId, CONTENT_BLOCKER_ERROR_CODE,
    FALLBACK_IDENTIFIER,
};
pub use service::{CompileOutcome, ContentBlocker, Dependencies};
pub use settings::{Settings, SettingsStore};
pub use stats::{PageStats, Statistics, StatisticsTracker};
pub use whitelist::WhitelistSet;
