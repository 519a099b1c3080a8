//! Content blocker coordinator
//!
//! One task owns every mutable collection: the filter-list registry, the
//! whitelist, settings, the artifact store, the block decision controller
//! and the statistics. [`ContentBlocker`] handles talk to it over a channel.
//!
//! Pipeline runs and reattach timers are spawned tasks that report back as
//! events. Every pipeline run gets the next generation number; a run that
//! finishes after a newer one was installed is discarded.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::artifact_store::{ArtifactStore, InstalledManifest, SurfaceState};
use crate::config::Config;
use crate::decision::{BlockDecisionController, BlockedSession, DecisionEffect};
use crate::error::{Error, Result};
use crate::filter_list::{FilterList, FilterListRegistry};
use crate::filter_source::{FilterSource, Transport};
use crate::host::{BrowserShell, CompiledArtifact, HostEngine, SurfaceId};
use crate::pipeline::{self, PipelineInput, PipelineOutput};
use crate::settings::SettingsStore;
use crate::stats::{Statistics, StatisticsTracker};
use crate::whitelist::WhitelistSet;

const COMMAND_BUFFER: usize = 64;

/// External collaborators.
pub struct Dependencies {
    pub engine: Arc<dyn HostEngine>,
    pub shell: Arc<dyn BrowserShell>,
    pub transport: Arc<dyn Transport>,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    pub generation: u64,
    /// `false` when a newer generation was already installed
    pub installed: bool,
    /// Blocking state when the run finished
    pub enabled: bool,
    pub artifacts: Vec<CompiledArtifact>,
    pub fallback: bool,
    pub reused: bool,
    pub dropped_rules: usize,
}

impl CompileOutcome {
    pub fn rule_count(&self) -> usize {
        self.artifacts.iter().map(|a| a.rule_count).sum()
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;
type CompileWaiter = Box<dyn FnOnce(Result<CompileOutcome>) + Send>;
type Query = Box<dyn FnOnce(&Coordinator) + Send>;

fn reply_with<T: Send + 'static>(reply: Reply<T>, map: impl FnOnce(CompileOutcome) -> T + Send + 'static) -> CompileWaiter {
    Box::new(move |result| {
        let _ = reply.send(result.map(map));
    })
}

enum Command {
    Initialize(CompileWaiter),
    Toggle(CompileWaiter),
    AddToWhitelist { input: String, waiter: CompileWaiter, reply: Reply<()> },
    RemoveFromWhitelist { input: String, waiter: CompileWaiter, reply: Reply<()> },
    UpdateFilterLists(CompileWaiter),
    SetListEnabled { id: String, enabled: bool, waiter: CompileWaiter, reply: Reply<()> },
    AddCustomList { name: String, url: String, reply: Reply<(FilterList, CompileOutcome)> },
    RemoveCustomList { id: String, waiter: CompileWaiter, reply: Reply<()> },
    RegisterSurface(SurfaceId, Reply<()>),
    UnregisterSurface(SurfaceId, Reply<()>),
    ReportBlock { surface: SurfaceId, url: String, error_code: i64, reply: Reply<Option<BlockedSession>> },
    ContinueOnce(Uuid, Reply<()>),
    WhitelistPermanently { session: Uuid, waiter: CompileWaiter, reply: Reply<()> },
    Cancel(Uuid, Reply<()>),
    RecordRequest(String, Reply<()>),
    RecordBlocked { url: String, on_page: Option<String>, estimated_size: Option<u64>, reply: Reply<()> },
    RecordPageLoad(String, Reply<()>),
    ResetSession(Reply<()>),
    Query(Query),
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    PipelineFinished { generation: u64, result: Result<PipelineOutput> },
    Reattach { surface: SurfaceId, token: u64 },
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct ContentBlocker {
    tx: mpsc::Sender<Command>,
}

impl ContentBlocker {
    /// Load persisted state and spawn the coordinator. Must be called from
    /// within a tokio runtime.
    pub fn start(config: Config, deps: Dependencies) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;

        let mut settings = SettingsStore::open(config.settings_path());
        settings.update_logged(|s| s.blocked_requests_this_session = 0);
        let whitelist = WhitelistSet::from_entries(&settings.get().whitelisted_domains);
        let registry = FilterListRegistry::open(config.filter_lists_path());
        let stats = StatisticsTracker::open(
            config.statistics_path(),
            config.max_tracked_pages,
            config.estimated_blocked_bytes,
        );
        let source = Arc::new(FilterSource::new(deps.transport, config.cache_dir(), config.cache_ttl()));
        let store = ArtifactStore::new(deps.engine.clone(), deps.shell.clone());

        info!(
            "content blocker starting: {} lists enabled, {} whitelisted domains, blocking {}",
            registry.enabled().len(),
            whitelist.len(),
            if settings.get().is_enabled { "on" } else { "off" }
        );

        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            config,
            engine: deps.engine,
            shell: deps.shell,
            source,
            registry,
            settings,
            whitelist,
            store,
            decisions: BlockDecisionController::new(),
            stats,
            generation: 0,
            initialized: false,
            waiters: HashMap::new(),
            events: events_tx,
        };
        let handle = tokio::spawn(coordinator.run(commands, events));
        Ok((Self { tx }, handle))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::Shutdown)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Send a command that starts a pipeline run and wait for the run.
    /// Validation errors are returned before the run starts.
    async fn call_compile(&self, make: impl FnOnce(CompileWaiter, Reply<()>) -> Command) -> Result<CompileOutcome> {
        let (done, done_rx) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        self.send(make(reply_with(done, |o| o), reply)).await?;
        rx.await.map_err(|_| Error::Shutdown)??;
        done_rx.await.map_err(|_| Error::Shutdown)?
    }

    async fn compile(&self, make: impl FnOnce(CompileWaiter) -> Command) -> Result<CompileOutcome> {
        let (done, rx) = oneshot::channel();
        self.send(make(reply_with(done, |o| o))).await?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    async fn query<T: Send + 'static>(&self, f: impl FnOnce(&Coordinator) -> T + Send + 'static) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Query(Box::new(move |c: &Coordinator| {
            let _ = tx.send(f(c));
        })))
        .await?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Load stored artifacts from the engine, or compile from scratch.
    pub async fn initialize(&self) -> Result<CompileOutcome> {
        self.compile(Command::Initialize).await
    }

    /// Flip blocking on or off. Returns the new state.
    pub async fn toggle(&self) -> Result<bool> {
        self.compile(Command::Toggle).await.map(|o| o.enabled)
    }

    pub async fn add_to_whitelist(&self, input: &str) -> Result<CompileOutcome> {
        let input = input.to_string();
        self.call_compile(|waiter, reply| Command::AddToWhitelist { input, waiter, reply })
            .await
    }

    pub async fn remove_from_whitelist(&self, input: &str) -> Result<CompileOutcome> {
        let input = input.to_string();
        self.call_compile(|waiter, reply| Command::RemoveFromWhitelist { input, waiter, reply })
            .await
    }

    /// Re-download every enabled list and recompile.
    pub async fn update_filter_lists(&self) -> Result<CompileOutcome> {
        self.compile(Command::UpdateFilterLists).await
    }

    pub async fn set_list_enabled(&self, id: &str, enabled: bool) -> Result<CompileOutcome> {
        let id = id.to_string();
        self.call_compile(|waiter, reply| Command::SetListEnabled { id, enabled, waiter, reply })
            .await
    }

    pub async fn add_custom_list(&self, name: &str, url: &str) -> Result<(FilterList, CompileOutcome)> {
        let (name, url) = (name.to_string(), url.to_string());
        self.call(|reply| Command::AddCustomList { name, url, reply }).await
    }

    pub async fn remove_custom_list(&self, id: &str) -> Result<CompileOutcome> {
        let id = id.to_string();
        self.call_compile(|waiter, reply| Command::RemoveCustomList { id, waiter, reply })
            .await
    }

    pub async fn register_surface(&self, surface: SurfaceId) -> Result<()> {
        self.call(|reply| Command::RegisterSurface(surface, reply)).await
    }

    pub async fn unregister_surface(&self, surface: SurfaceId) -> Result<()> {
        self.call(|reply| Command::UnregisterSurface(surface, reply)).await
    }

    /// Feed a navigation failure reported by the engine. Returns the session
    /// pending on the surface afterwards.
    pub async fn report_block(&self, surface: SurfaceId, url: &str, error_code: i64) -> Result<Option<BlockedSession>> {
        let url = url.to_string();
        self.call(|reply| Command::ReportBlock {
            surface,
            url,
            error_code,
            reply,
        })
        .await
    }

    pub async fn continue_once(&self, session: Uuid) -> Result<()> {
        self.call(|reply| Command::ContinueOnce(session, reply)).await
    }

    pub async fn whitelist_permanently(&self, session: Uuid) -> Result<CompileOutcome> {
        self.call_compile(|waiter, reply| Command::WhitelistPermanently { session, waiter, reply })
            .await
    }

    pub async fn cancel(&self, session: Uuid) -> Result<()> {
        self.call(|reply| Command::Cancel(session, reply)).await
    }

    pub async fn record_request(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.call(|reply| Command::RecordRequest(url, reply)).await
    }

    pub async fn record_blocked(&self, url: &str, on_page: Option<&str>, estimated_size: Option<u64>) -> Result<()> {
        let url = url.to_string();
        let on_page = on_page.map(str::to_string);
        self.call(|reply| Command::RecordBlocked {
            url,
            on_page,
            estimated_size,
            reply,
        })
        .await
    }

    pub async fn record_page_load(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.call(|reply| Command::RecordPageLoad(url, reply)).await
    }

    pub async fn reset_session(&self) -> Result<()> {
        self.call(Command::ResetSession).await
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        self.query(|c| c.settings.get().is_enabled).await
    }

    pub async fn whitelist(&self) -> Result<Vec<String>> {
        self.query(|c| c.whitelist.to_vec()).await
    }

    pub async fn filter_lists(&self) -> Result<Vec<FilterList>> {
        self.query(|c| c.registry.lists().to_vec()).await
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        self.query(|c| c.stats.snapshot()).await
    }

    pub async fn top_domains(&self, n: usize) -> Result<Vec<(String, u64)>> {
        self.query(move |c| c.stats.top_domains(n)).await
    }

    pub async fn current_artifacts(&self) -> Result<Vec<CompiledArtifact>> {
        self.query(|c| c.store.current().to_vec()).await
    }

    pub async fn pending_session(&self, surface: SurfaceId) -> Result<Option<BlockedSession>> {
        self.query(move |c| c.decisions.session_for(surface).cloned()).await
    }

    pub async fn surface_state(&self, surface: SurfaceId) -> Result<Option<SurfaceState>> {
        self.query(move |c| c.store.surface_state(surface)).await
    }

    /// Stop the coordinator. Pipeline runs still in flight are abandoned.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Coordinator {
    config: Config,
    engine: Arc<dyn HostEngine>,
    shell: Arc<dyn BrowserShell>,
    source: Arc<FilterSource>,
    registry: FilterListRegistry,
    settings: SettingsStore,
    whitelist: WhitelistSet,
    store: ArtifactStore,
    decisions: BlockDecisionController,
    stats: StatisticsTracker,
    generation: u64,
    initialized: bool,
    waiters: HashMap<u64, CompileWaiter>,
    events: mpsc::UnboundedSender<Event>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: mpsc::UnboundedReceiver<Event>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        info!("content blocker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Initialize(waiter) => {
                let reuse = if self.initialized {
                    None
                } else {
                    self.initialized = true;
                    InstalledManifest::load(&self.config.installed_artifacts_path()).map(|m| m.identifiers)
                };
                self.start_pipeline(reuse, false, Some(waiter));
            }
            Command::Toggle(waiter) => {
                let enabled = !self.settings.get().is_enabled;
                self.settings.update_logged(|s| s.is_enabled = enabled);
                info!("blocking turned {}", if enabled { "on" } else { "off" });
                if !enabled {
                    self.store.detach_all_surfaces();
                }
                self.start_pipeline(None, false, Some(waiter));
            }
            Command::AddToWhitelist { input, waiter, reply } => {
                let result = self.whitelist.add(&input).map(|(domain, inserted)| {
                    if inserted {
                        info!("whitelisted {domain}");
                        self.persist_whitelist();
                    }
                });
                self.reply_then_compile(result, reply, waiter);
            }
            Command::RemoveFromWhitelist { input, waiter, reply } => {
                let result = self.whitelist.remove(&input).map(|removed| {
                    if removed {
                        info!("removed '{input}' from whitelist");
                        self.persist_whitelist();
                    }
                });
                self.reply_then_compile(result, reply, waiter);
            }
            Command::UpdateFilterLists(waiter) => self.start_pipeline(None, true, Some(waiter)),
            Command::SetListEnabled { id, enabled, waiter, reply } => {
                let result = self.registry.set_enabled(&id, enabled).map(|_| ());
                self.reply_then_compile(result, reply, waiter);
            }
            Command::AddCustomList { name, url, reply } => match self.registry.add_custom(&name, &url) {
                Ok(list) => {
                    let waiter = reply_with(reply, move |outcome| (list, outcome));
                    self.start_pipeline(None, false, Some(waiter));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::RemoveCustomList { id, waiter, reply } => {
                let result = self.registry.remove_custom(&id).map(|removed| {
                    let source = self.source.clone();
                    tokio::spawn(async move { source.evict(&removed.id).await });
                });
                self.reply_then_compile(result, reply, waiter);
            }
            Command::RegisterSurface(surface, reply) => {
                if self.store.register_surface(surface) && self.settings.get().is_enabled && !self.store.current().is_empty() {
                    self.store.apply(surface);
                }
                let _ = reply.send(Ok(()));
            }
            Command::UnregisterSurface(surface, reply) => {
                let effects = self.decisions.surface_closed(surface);
                self.execute(effects, None);
                self.store.unregister_surface(surface);
                let _ = reply.send(Ok(()));
            }
            Command::ReportBlock {
                surface,
                url,
                error_code,
                reply,
            } => {
                let effects = self.decisions.on_block_signal(surface, &url, error_code, &self.whitelist);
                self.execute(effects, None);
                let _ = reply.send(Ok(self.decisions.session_for(surface).cloned()));
            }
            Command::ContinueOnce(session, reply) => {
                let result = self.decisions.continue_once(session).map(|effects| self.execute(effects, None));
                let _ = reply.send(result);
            }
            Command::WhitelistPermanently { session, waiter, reply } => {
                match self.decisions.whitelist_permanently(session) {
                    Ok(effects) => {
                        let _ = reply.send(Ok(()));
                        self.execute(effects, Some(waiter));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Cancel(session, reply) => {
                let result = self.decisions.cancel(session).map(|effects| self.execute(effects, None));
                let _ = reply.send(result);
            }
            Command::RecordRequest(url, reply) => {
                self.stats.record_request(&url);
                let _ = reply.send(Ok(()));
            }
            Command::RecordBlocked {
                url,
                on_page,
                estimated_size,
                reply,
            } => {
                self.stats.record_blocked(&url, on_page.as_deref(), estimated_size);
                self.settings.update_logged(|s| {
                    s.total_blocked_requests += 1;
                    s.blocked_requests_this_session += 1;
                });
                let _ = reply.send(Ok(()));
            }
            Command::RecordPageLoad(url, reply) => {
                self.stats.record_page_load(&url);
                let _ = reply.send(Ok(()));
            }
            Command::ResetSession(reply) => {
                self.stats.reset_session();
                self.settings.update_logged(|s| s.blocked_requests_this_session = 0);
                let _ = reply.send(Ok(()));
            }
            Command::Query(query) => query(&*self),
            Command::Shutdown(_) => {}
        }
    }

    /// Answer a validated mutation and, on success, recompile.
    fn reply_then_compile(&mut self, result: Result<()>, reply: Reply<()>, waiter: CompileWaiter) {
        let ok = result.is_ok();
        let _ = reply.send(result);
        if ok {
            self.start_pipeline(None, false, Some(waiter));
        }
    }

    fn persist_whitelist(&mut self) {
        let domains = self.whitelist.to_vec();
        self.settings.update_logged(|s| s.whitelisted_domains = domains);
    }

    fn start_pipeline(&mut self, reuse: Option<Vec<String>>, force_refresh: bool, waiter: Option<CompileWaiter>) {
        self.generation += 1;
        let generation = self.generation;
        let input = PipelineInput {
            generation,
            lists: self.registry.enabled(),
            excluded: self.whitelist.domains().clone(),
            force_refresh,
            reuse,
            options: self.config.compile_options(),
            namespace: self.config.artifact_namespace.clone(),
            max_rules_per_shard: self.config.max_rules_per_shard,
            max_shards: self.config.max_shards,
        };
        if let Some(waiter) = waiter {
            self.waiters.insert(generation, waiter);
        }
        debug!("generation {generation}: pipeline started ({} lists)", input.lists.len());

        let source = self.source.clone();
        let engine = self.engine.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = pipeline::run(input, &source, engine.as_ref()).await;
            let _ = events.send(Event::PipelineFinished { generation, result });
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::PipelineFinished { generation, result } => self.finish_pipeline(generation, result),
            Event::Reattach { surface, token } => {
                if self.store.resume(surface, token) && self.settings.get().is_enabled {
                    debug!("{surface}: grace period over, reattaching rules");
                    self.store.apply(surface);
                }
            }
        }
    }

    fn finish_pipeline(&mut self, generation: u64, result: Result<PipelineOutput>) {
        let outcome = match result {
            Ok(output) => {
                for (id, timestamp) in &output.refreshed {
                    self.registry.mark_updated(id, *timestamp);
                }
                let installed = self.store.install(generation, output.artifacts.clone());
                if installed {
                    let manifest = InstalledManifest::of(generation, &output.artifacts);
                    if let Err(e) = manifest.save(&self.config.installed_artifacts_path()) {
                        warn!("{e}");
                    }
                }
                let enabled = self.settings.get().is_enabled;
                if installed && enabled {
                    let applied = self.store.apply_all();
                    debug!("generation {generation}: applied to {applied} surfaces");
                }
                Ok(CompileOutcome {
                    generation,
                    installed,
                    enabled,
                    artifacts: output.artifacts,
                    fallback: output.fallback,
                    reused: output.reused,
                    dropped_rules: output.dropped_rules,
                })
            }
            Err(e) => {
                error!("generation {generation}: {e}");
                Err(e)
            }
        };

        if let Some(waiter) = self.waiters.remove(&generation) {
            waiter(outcome);
        }
    }

    fn execute(&mut self, effects: Vec<DecisionEffect>, mut waiter: Option<CompileWaiter>) {
        for effect in effects {
            match effect {
                DecisionEffect::ReloadWithoutBlocking { surface, url } => self.reload_without_blocking(surface, &url),
                DecisionEffect::PresentDecision(session) => self.shell.present_block_decision(&session),
                DecisionEffect::DismissDecision { session_id, surface } => {
                    self.shell.dismiss_block_decision(session_id, surface)
                }
                DecisionEffect::Whitelist(domain) => {
                    match self.whitelist.add(&domain) {
                        Ok((domain, true)) => {
                            info!("whitelisted {domain}");
                            self.persist_whitelist();
                        }
                        Ok(_) => {}
                        Err(e) => warn!("{e}"),
                    }
                    self.start_pipeline(None, false, waiter.take());
                }
                DecisionEffect::GoBackOrBlank(surface) => {
                    if !self.shell.go_back(surface) {
                        self.shell.load_blank(surface);
                    }
                }
            }
        }
    }

    /// Detach, navigate, reattach once the grace delay has passed.
    fn reload_without_blocking(&mut self, surface: SurfaceId, url: &str) {
        let token = self.store.suspend(surface);
        self.shell.navigate(surface, url);

        if let Some(token) = token {
            let events = self.events.clone();
            let delay = self.config.reattach_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(Event::Reattach { surface, token });
            });
        }
    }
}
