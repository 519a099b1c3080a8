//! Host interfaces
//!
//! The content-blocking engine and the browser shell live outside this
//! crate. They are reached through the two traits below; `InMemoryEngine`
//! is a self-contained engine used by the CLI and the tests.

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tg_core::matcher::Matcher;
use tg_core::schema::rules_from_json;
use tg_core::types::{MatchDecision, MatchResult, RequestContext};
use twox_hash::XxHash64;
use uuid::Uuid;

use crate::decision::BlockedSession;

/// Identifier of the artifact compiled from the minimal fallback rule set.
pub const FALLBACK_IDENTIFIER: &str = "minimal";

/// Error code the host reports for a navigation cancelled by a rule list.
pub const CONTENT_BLOCKER_ERROR_CODE: i64 = 104;

/// Stable identifier of a content surface (one tab's page view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Handle to a rule list compiled by the host engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledArtifact {
    pub identifier: String,
    pub rule_count: usize,
    /// xxh64 of the JSON payload the artifact was compiled from
    pub fingerprint: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("rule list rejected: {0}")]
    Rejected(String),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// xxh64 fingerprint of an artifact payload.
pub fn fingerprint(rules_json: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(rules_json.as_bytes());
    hasher.finish()
}

/// Host content-blocking engine.
#[async_trait]
pub trait HostEngine: Send + Sync {
    /// Compile a rule-list payload under `identifier`, replacing any stored
    /// artifact with the same identifier.
    async fn compile(&self, identifier: &str, rules_json: &str) -> Result<CompiledArtifact, EngineError>;

    /// Look up an artifact the engine kept from an earlier compile.
    async fn lookup(&self, identifier: &str) -> Option<CompiledArtifact>;

    fn attach(&self, artifact: &CompiledArtifact, surface: SurfaceId);

    fn detach_all(&self, surface: SurfaceId);
}

/// The browser shell's side of a surface.
pub trait BrowserShell: Send + Sync {
    fn navigate(&self, surface: SurfaceId, url: &str);

    /// Navigate back; `false` when the surface has no history.
    fn go_back(&self, surface: SurfaceId) -> bool;

    fn load_blank(&self, surface: SurfaceId);

    fn present_block_decision(&self, session: &BlockedSession);

    fn dismiss_block_decision(&self, session_id: Uuid, surface: SurfaceId);

    /// Install the navigation observer and log channel on a surface.
    fn attach_observer(&self, surface: SurfaceId);

    fn detach_observer(&self, surface: SurfaceId);
}

// =============================================================================
// In-memory engine
// =============================================================================

struct StoredArtifact {
    artifact: CompiledArtifact,
    matcher: Arc<Matcher>,
}

#[derive(Default)]
struct EngineState {
    store: HashMap<String, StoredArtifact>,
    attached: HashMap<SurfaceId, Vec<String>>,
    failing: HashSet<String>,
    compile_calls: usize,
}

/// Engine that validates payloads against the artifact schema, evaluates
/// attached rule lists with the reference matcher, and keeps compiled
/// artifacts for later lookups.
pub struct InMemoryEngine {
    rule_limit: Option<usize>,
    state: Mutex<EngineState>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            rule_limit: None,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Reject payloads with more than `limit` rules, like a real engine.
    pub fn with_rule_limit(limit: usize) -> Self {
        Self {
            rule_limit: Some(limit),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every compile of `identifier` fail.
    pub fn fail_identifier(&self, identifier: &str) {
        self.state().failing.insert(identifier.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    pub fn compile_calls(&self) -> usize {
        self.state().compile_calls
    }

    pub fn stored_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().store.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Identifiers attached to `surface`, in attach order.
    pub fn attached(&self, surface: SurfaceId) -> Vec<String> {
        self.state().attached.get(&surface).cloned().unwrap_or_default()
    }

    /// Evaluate a request on a surface. Each attached list is evaluated on
    /// its own; the request is blocked when any list blocks it.
    pub fn evaluate(&self, surface: SurfaceId, ctx: &RequestContext<'_>) -> MatchResult {
        let matchers: Vec<Arc<Matcher>> = {
            let state = self.state();
            state
                .attached
                .get(&surface)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.store.get(id).map(|s| s.matcher.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut combined = MatchResult::default();
        for matcher in matchers {
            let result = matcher.match_request(ctx);
            if result.decision == MatchDecision::Block {
                combined.decision = MatchDecision::Block;
                combined.rule_index = result.rule_index;
            }
            combined.hidden_selectors.extend(result.hidden_selectors);
            combined.upgrade_https |= result.upgrade_https;
        }
        combined
    }
}

#[async_trait]
impl HostEngine for InMemoryEngine {
    async fn compile(&self, identifier: &str, rules_json: &str) -> Result<CompiledArtifact, EngineError> {
        {
            let mut state = self.state();
            state.compile_calls += 1;
            if state.failing.contains(identifier) {
                return Err(EngineError::Unavailable(format!("compile of '{identifier}' failed")));
            }
        }

        let rules = rules_from_json(rules_json).map_err(|e| EngineError::Rejected(e.to_string()))?;
        if let Some(limit) = self.rule_limit {
            if rules.len() > limit {
                return Err(EngineError::Rejected(format!(
                    "{} rules exceed the limit of {}",
                    rules.len(),
                    limit
                )));
            }
        }
        let matcher = Matcher::new(&rules).map_err(|e| EngineError::Rejected(e.to_string()))?;

        let artifact = CompiledArtifact {
            identifier: identifier.to_string(),
            rule_count: rules.len(),
            fingerprint: fingerprint(rules_json),
        };
        self.state().store.insert(
            identifier.to_string(),
            StoredArtifact {
                artifact: artifact.clone(),
                matcher: Arc::new(matcher),
            },
        );
        Ok(artifact)
    }

    async fn lookup(&self, identifier: &str) -> Option<CompiledArtifact> {
        self.state().store.get(identifier).map(|s| s.artifact.clone())
    }

    fn attach(&self, artifact: &CompiledArtifact, surface: SurfaceId) {
        self.state()
            .attached
            .entry(surface)
            .or_default()
            .push(artifact.identifier.clone());
    }

    fn detach_all(&self, surface: SurfaceId) {
        self.state().attached.remove(&surface);
    }
}
