//! Compiled artifact management
//!
//! Compiles shards through the host engine and keeps the current artifact
//! set. Applying the set to a surface always detaches everything first, so
//! a surface never runs a mix of old and new rule lists.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tg_compiler::RuleCompiler;
use tg_core::schema::rules_to_json;
use tg_core::types::Rule;

use crate::error::{Error, Result};
use crate::host::{BrowserShell, CompiledArtifact, EngineError, HostEngine, SurfaceId, FALLBACK_IDENTIFIER};
use crate::persist::{read_json, write_json_atomic};

// =============================================================================
// Compilation
// =============================================================================

pub fn shard_identifier(namespace: &str, index: usize) -> String {
    format!("{namespace}_{index}")
}

/// Compile every shard as `<namespace>_<index>`. Failed shards are logged
/// and left out; the result keeps shard order.
pub async fn compile_shards(engine: &dyn HostEngine, namespace: &str, shards: &[Vec<Rule>]) -> Vec<CompiledArtifact> {
    let compiles = shards.iter().enumerate().map(|(index, shard)| {
        let identifier = shard_identifier(namespace, index);
        async move {
            let json = match rules_to_json(shard) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize '{identifier}': {e}");
                    return None;
                }
            };
            match engine.compile(&identifier, &json).await {
                Ok(artifact) => {
                    debug!("compiled '{}' ({} rules)", identifier, artifact.rule_count);
                    Some(artifact)
                }
                Err(e) => {
                    warn!("compile of '{identifier}' failed: {e}");
                    None
                }
            }
        }
    });

    join_all(compiles).await.into_iter().flatten().collect()
}

/// Compile the minimal fallback set under [`FALLBACK_IDENTIFIER`].
pub async fn compile_minimal(engine: &dyn HostEngine, excluded: &BTreeSet<String>) -> Result<CompiledArtifact> {
    let rules = RuleCompiler::default().compile_minimal(excluded);
    let json = rules_to_json(&rules).map_err(|e| Error::CompileFailure {
        identifier: FALLBACK_IDENTIFIER.to_string(),
        source: EngineError::Rejected(e.to_string()),
    })?;

    engine
        .compile(FALLBACK_IDENTIFIER, &json)
        .await
        .map_err(|source| {
            error!("minimal fallback compile failed: {source}");
            Error::CompileFailure {
                identifier: FALLBACK_IDENTIFIER.to_string(),
                source,
            }
        })
}

/// Look up each identifier in the engine's store, in order. `None` unless
/// every identifier is found.
pub async fn lookup_existing(engine: &dyn HostEngine, identifiers: &[String]) -> Option<Vec<CompiledArtifact>> {
    if identifiers.is_empty() {
        return None;
    }
    let mut found = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        match engine.lookup(identifier).await {
            Some(artifact) => found.push(artifact),
            None => {
                info!("stored artifact '{identifier}' missing, recompiling");
                return None;
            }
        }
    }
    Some(found)
}

/// Identifiers of the installed set, written after every install so that a
/// restart reuses exactly that set and nothing else the engine still holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledManifest {
    pub generation: u64,
    pub identifiers: Vec<String>,
}

impl InstalledManifest {
    pub fn of(generation: u64, artifacts: &[CompiledArtifact]) -> Self {
        Self {
            generation,
            identifiers: artifacts.iter().map(|a| a.identifier.clone()).collect(),
        }
    }

    /// `None` when absent or unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        match read_json(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("{e}; ignoring stored artifacts");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Registered,
    RulesApplied,
}

/// Current artifact set and the surfaces it is applied to.
pub struct ArtifactStore {
    engine: Arc<dyn HostEngine>,
    shell: Arc<dyn BrowserShell>,
    current: Vec<CompiledArtifact>,
    installed_generation: u64,
    surfaces: BTreeMap<SurfaceId, SurfaceState>,
    /// Surfaces detached for a bypassed navigation, with their resume token
    suspended: HashMap<SurfaceId, u64>,
    next_token: u64,
}

impl ArtifactStore {
    pub fn new(engine: Arc<dyn HostEngine>, shell: Arc<dyn BrowserShell>) -> Self {
        Self {
            engine,
            shell,
            current: Vec::new(),
            installed_generation: 0,
            surfaces: BTreeMap::new(),
            suspended: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn current(&self) -> &[CompiledArtifact] {
        &self.current
    }

    pub fn installed_generation(&self) -> u64 {
        self.installed_generation
    }

    pub fn surface_state(&self, surface: SurfaceId) -> Option<SurfaceState> {
        self.surfaces.get(&surface).copied()
    }

    pub fn is_suspended(&self, surface: SurfaceId) -> bool {
        self.suspended.contains_key(&surface)
    }

    /// Returns `false` if the surface was already registered.
    pub fn register_surface(&mut self, surface: SurfaceId) -> bool {
        if self.surfaces.contains_key(&surface) {
            return false;
        }
        self.shell.attach_observer(surface);
        self.surfaces.insert(surface, SurfaceState::Registered);
        debug!("{surface} registered");
        true
    }

    pub fn unregister_surface(&mut self, surface: SurfaceId) -> bool {
        if self.surfaces.remove(&surface).is_none() {
            return false;
        }
        self.suspended.remove(&surface);
        self.engine.detach_all(surface);
        self.shell.detach_observer(surface);
        debug!("{surface} unregistered");
        true
    }

    /// Replace whatever is attached to `surface` with the current set.
    pub fn apply(&mut self, surface: SurfaceId) -> bool {
        let Some(state) = self.surfaces.get_mut(&surface) else {
            return false;
        };
        self.engine.detach_all(surface);
        for artifact in &self.current {
            self.engine.attach(artifact, surface);
        }
        *state = SurfaceState::RulesApplied;
        true
    }

    /// Apply the current set to every registered, non-suspended surface.
    pub fn apply_all(&mut self) -> usize {
        let targets: Vec<SurfaceId> = self
            .surfaces
            .keys()
            .copied()
            .filter(|s| !self.suspended.contains_key(s))
            .collect();
        for surface in &targets {
            self.apply(*surface);
        }
        targets.len()
    }

    pub fn detach(&mut self, surface: SurfaceId) -> bool {
        let Some(state) = self.surfaces.get_mut(&surface) else {
            return false;
        };
        self.engine.detach_all(surface);
        *state = SurfaceState::Registered;
        true
    }

    pub fn detach_all_surfaces(&mut self) {
        let surfaces: Vec<SurfaceId> = self.surfaces.keys().copied().collect();
        for surface in surfaces {
            self.detach(surface);
        }
    }

    /// Detach `surface` until [`resume`](Self::resume) is called with the
    /// returned token. A later suspend invalidates earlier tokens.
    pub fn suspend(&mut self, surface: SurfaceId) -> Option<u64> {
        if !self.detach(surface) {
            return None;
        }
        self.next_token += 1;
        self.suspended.insert(surface, self.next_token);
        Some(self.next_token)
    }

    /// Lift a suspension. Returns `false` for an outdated token.
    pub fn resume(&mut self, surface: SurfaceId, token: u64) -> bool {
        match self.suspended.get(&surface) {
            Some(current) if *current == token => {
                self.suspended.remove(&surface);
                true
            }
            _ => false,
        }
    }

    /// Swap in a new artifact set unless a newer generation is installed.
    pub fn install(&mut self, generation: u64, artifacts: Vec<CompiledArtifact>) -> bool {
        if generation < self.installed_generation {
            info!(
                "discarding artifacts of generation {} (generation {} installed)",
                generation, self.installed_generation
            );
            return false;
        }
        self.installed_generation = generation;
        self.current = artifacts;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::BlockedSession;
    use crate::host::InMemoryEngine;
    use std::sync::Mutex;
    use tg_core::types::Trigger;
    use uuid::Uuid;

    #[derive(Default)]
    struct ObserverLog(Mutex<Vec<String>>);

    impl BrowserShell for ObserverLog {
        fn navigate(&self, _: SurfaceId, _: &str) {}
        fn go_back(&self, _: SurfaceId) -> bool {
            false
        }
        fn load_blank(&self, _: SurfaceId) {}
        fn present_block_decision(&self, _: &BlockedSession) {}
        fn dismiss_block_decision(&self, _: Uuid, _: SurfaceId) {}
        fn attach_observer(&self, surface: SurfaceId) {
            self.0.lock().unwrap().push(format!("attach {}", surface.0));
        }
        fn detach_observer(&self, surface: SurfaceId) {
            self.0.lock().unwrap().push(format!("detach {}", surface.0));
        }
    }

    fn shard(domain: &str) -> Vec<Rule> {
        vec![Rule::block(Trigger::url(format!(".*{domain}.*")))]
    }

    #[tokio::test]
    async fn compiles_shards_in_order_and_skips_failures() {
        let engine = InMemoryEngine::new();
        engine.fail_identifier("shard_1");
        let artifacts = compile_shards(&engine, "shard", &[shard("a"), shard("b"), shard("c")]).await;
        let ids: Vec<&str> = artifacts.iter().map(|a| a.identifier.as_str()).collect();
        assert_eq!(ids, vec!["shard_0", "shard_2"]);
    }

    #[tokio::test]
    async fn minimal_fallback() {
        let engine = InMemoryEngine::new();
        let artifact = compile_minimal(&engine, &BTreeSet::new()).await.unwrap();
        assert_eq!(artifact.identifier, FALLBACK_IDENTIFIER);

        engine.fail_identifier(FALLBACK_IDENTIFIER);
        assert!(matches!(
            compile_minimal(&engine, &BTreeSet::new()).await,
            Err(Error::CompileFailure { .. })
        ));
    }

    #[tokio::test]
    async fn lookup_returns_exactly_the_listed_identifiers() {
        let engine = InMemoryEngine::new();
        compile_shards(&engine, "shard", &[shard("a"), shard("b"), shard("c")]).await;

        let listed = vec!["shard_0".to_string()];
        let found = lookup_existing(&engine, &listed).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|a| a.identifier.as_str()).collect();
        assert_eq!(ids, vec!["shard_0"]);

        let gap = vec!["shard_0".to_string(), "shard_5".to_string()];
        assert!(lookup_existing(&engine, &gap).await.is_none());
        assert!(lookup_existing(&engine, &[]).await.is_none());
    }

    #[tokio::test]
    async fn manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.json");
        assert_eq!(InstalledManifest::load(&path), None);

        let engine = InMemoryEngine::new();
        let artifacts = vec![compile_minimal(&engine, &BTreeSet::new()).await.unwrap()];
        InstalledManifest::of(4, &artifacts).save(&path).unwrap();

        let manifest = InstalledManifest::load(&path).unwrap();
        assert_eq!(manifest.generation, 4);
        assert_eq!(manifest.identifiers, vec![FALLBACK_IDENTIFIER.to_string()]);

        std::fs::write(&path, b"[").unwrap();
        assert_eq!(InstalledManifest::load(&path), None);
    }

    #[tokio::test]
    async fn apply_replaces_attached_set() {
        let engine = Arc::new(InMemoryEngine::new());
        let shell = Arc::new(ObserverLog::default());
        let mut store = ArtifactStore::new(engine.clone(), shell.clone());
        let surface = SurfaceId(7);

        assert!(!store.apply(surface));
        assert!(store.register_surface(surface));
        assert!(!store.register_surface(surface));
        assert_eq!(store.surface_state(surface), Some(SurfaceState::Registered));

        let first = compile_shards(engine.as_ref(), "shard", &[shard("a"), shard("b")]).await;
        store.install(1, first);
        store.apply_all();
        assert_eq!(engine.attached(surface), vec!["shard_0", "shard_1"]);
        assert_eq!(store.surface_state(surface), Some(SurfaceState::RulesApplied));

        let second = compile_shards(engine.as_ref(), "shard", &[shard("c")]).await;
        store.install(2, second);
        store.apply_all();
        assert_eq!(engine.attached(surface), vec!["shard_0"]);

        store.unregister_surface(surface);
        assert!(engine.attached(surface).is_empty());
        assert_eq!(*shell.0.lock().unwrap(), vec!["attach 7", "detach 7"]);
    }

    #[tokio::test]
    async fn stale_generation_is_discarded() {
        let engine = Arc::new(InMemoryEngine::new());
        let mut store = ArtifactStore::new(engine.clone(), Arc::new(ObserverLog::default()));
        let newer = compile_shards(engine.as_ref(), "shard", &[shard("new")]).await;
        let older = compile_shards(engine.as_ref(), "shard", &[shard("a"), shard("b")]).await;

        assert!(store.install(3, newer));
        assert!(!store.install(2, older));
        assert_eq!(store.current().len(), 1);
        assert_eq!(store.installed_generation(), 3);
    }

    #[tokio::test]
    async fn suspended_surfaces_skip_apply_all() {
        let engine = Arc::new(InMemoryEngine::new());
        let mut store = ArtifactStore::new(engine.clone(), Arc::new(ObserverLog::default()));
        let artifacts = compile_shards(engine.as_ref(), "shard", &[shard("a")]).await;
        store.install(1, artifacts);
        store.register_surface(SurfaceId(1));
        store.apply_all();

        let old = store.suspend(SurfaceId(1)).unwrap();
        let token = store.suspend(SurfaceId(1)).unwrap();
        assert!(engine.attached(SurfaceId(1)).is_empty());
        assert_eq!(store.apply_all(), 0);

        assert!(!store.resume(SurfaceId(1), old));
        assert!(store.resume(SurfaceId(1), token));
        assert_eq!(store.apply_all(), 1);
        assert_eq!(engine.attached(SurfaceId(1)), vec!["shard_0"]);
    }
}
