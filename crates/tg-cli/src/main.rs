//! TabGuard CLI
//!
//! CLI tool for compiling filter lists into shard artifacts, inspecting
//! them, and running the content blocker against live lists.

mod artifacts;
mod shell;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use tg_compiler::{CompileOptions, DEFAULT_MAX_RULES_PER_SHARD, DEFAULT_MAX_SHARDS};
use tg_core::types::{Action, MatchDecision, RequestContext, ResourceType};
use tg_runtime::{Config, ContentBlocker, Dependencies, HostEngine, HttpTransport, InMemoryEngine, SurfaceId};

use crate::artifacts::{compile_shard_files, read_artifact, verify_artifact, write_shards, ShardOptions};
use crate::shell::LoggingShell;

#[derive(Parser)]
#[command(name = "tg-cli")]
#[command(about = "TabGuard filter list compiler and tools")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into shard artifacts
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output directory for `<namespace>_<n>.json` files
        #[arg(short, long, default_value = "artifacts")]
        output: PathBuf,

        /// Whitelisted domains to leave out
        #[arg(short, long)]
        exclude: Vec<String>,

        #[arg(long, default_value_t = DEFAULT_MAX_RULES_PER_SHARD)]
        max_rules_per_shard: usize,

        #[arg(long, default_value_t = DEFAULT_MAX_SHARDS)]
        max_shards: usize,

        #[arg(long, default_value = "shard")]
        namespace: String,
    },

    /// Validate shard artifacts
    Validate {
        /// Artifact files to validate
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,
    },

    /// Dump artifact info
    Info {
        /// Artifact file to inspect
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Evaluate a request against shard artifacts
    Check {
        /// Artifact files, attached in the given order
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Host of the page issuing the request
        #[arg(short, long, default_value = "")]
        page_host: String,

        /// Resource type (script, image, style-sheet, document, ...)
        #[arg(short = 't', long = "type", default_value = "script")]
        resource_type: String,
    },

    /// Download enabled lists and compile them with the runtime
    Update {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ignore cached list copies
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            exclude,
            max_rules_per_shard,
            max_shards,
            namespace,
        } => cmd_compile(
            &input,
            &output,
            &exclude,
            ShardOptions {
                namespace,
                max_rules_per_shard,
                max_shards,
                compile: CompileOptions::default(),
            },
        ),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { input } => cmd_info(&input),
        Commands::Check {
            input,
            url,
            page_host,
            resource_type,
        } => cmd_check(&input, &url, &page_host, &resource_type),
        Commands::Update { config, force } => cmd_update(config.as_deref(), force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))
}

fn cmd_compile(inputs: &[String], output: &Path, exclude: &[String], options: ShardOptions) -> Result<(), String> {
    let mut excluded = BTreeSet::new();
    for entry in exclude {
        excluded.insert(tg_runtime::whitelist::normalize_whitelist_input(entry).map_err(|e| e.to_string())?);
    }

    let (files, stats) = compile_shard_files(inputs, &excluded, &options)?;
    let paths = write_shards(output, &files)?;

    println!("Compiled {} filter lists to '{}'", inputs.len(), output.display());
    for list in &stats.report.lists {
        println!(
            "  [{}] {} rules, {} rejected{}",
            list.list_id,
            list.rules,
            list.rejected,
            if list.truncated { " (truncated)" } else { "" }
        );
    }
    println!(
        "  Rules:    {} ({} built-in, {} exceptions, dedupe removed {})",
        stats.rules, stats.report.builtin, stats.exceptions, stats.report.deduped
    );
    println!("  Shards:   {}", files.len());
    for (file, path) in files.iter().zip(&paths) {
        println!("    {} - {} rules, {} bytes", path.display(), file.rule_count, file.json.len());
    }
    if stats.dropped_rules > 0 {
        println!("  Dropped:  {} rules over the shard limit", stats.dropped_rules);
    }
    println!("  Time:     {:.1}ms", stats.total_ms);

    Ok(())
}

fn cmd_validate(inputs: &[PathBuf]) -> Result<(), String> {
    for path in inputs {
        let json = read_artifact(path)?;
        let rules = verify_artifact(&json).map_err(|e| format!("Invalid artifact '{}': {}", path.display(), e))?;
        println!("Artifact '{}' is valid ({} rules, {} bytes)", path.display(), rules.len(), json.len());
    }
    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), String> {
    let json = read_artifact(input)?;
    let rules = verify_artifact(&json).map_err(|e| format!("Invalid artifact: {}", e))?;

    let mut block = 0usize;
    let mut css = 0usize;
    let mut exceptions = 0usize;
    let mut https = 0usize;
    let mut typed = 0usize;
    let mut domain_scoped = 0usize;
    for rule in &rules {
        match rule.action {
            Action::Block => block += 1,
            Action::CssHide { .. } => css += 1,
            Action::IgnorePreviousRules => exceptions += 1,
            Action::MakeHttps => https += 1,
        }
        if !rule.trigger.resource_types.is_empty() {
            typed += 1;
        }
        if rule.trigger.if_domains.is_some() || rule.trigger.unless_domains.is_some() {
            domain_scoped += 1;
        }
    }

    println!("Artifact: {}", input.display());
    println!("  Size:          {} bytes ({:.1} KB)", json.len(), json.len() as f64 / 1024.0);
    println!("  Rules:         {}", rules.len());
    println!();
    println!("Actions:");
    println!("  block:                 {}", block);
    println!("  css-display-none:      {}", css);
    println!("  ignore-previous-rules: {}", exceptions);
    println!("  make-https:            {}", https);
    println!();
    println!("Triggers:");
    println!("  Resource-typed: {}", typed);
    println!("  Domain-scoped:  {}", domain_scoped);

    Ok(())
}

fn cmd_check(inputs: &[PathBuf], url: &str, page_host: &str, resource_type: &str) -> Result<(), String> {
    let resource_type =
        ResourceType::from_wire_name(resource_type).ok_or_else(|| format!("Unknown resource type '{}'", resource_type))?;

    let engine = InMemoryEngine::new();
    let surface = SurfaceId(0);
    runtime()?.block_on(async {
        for path in inputs {
            let json = read_artifact(path)?;
            let identifier = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let artifact = engine
                .compile(&identifier, &json)
                .await
                .map_err(|e| format!("'{}': {}", path.display(), e))?;
            engine.attach(&artifact, surface);
        }
        Ok::<(), String>(())
    })?;

    let ctx = RequestContext {
        url,
        page_host,
        resource_type,
    };
    let result = engine.evaluate(surface, &ctx);
    match result.decision {
        MatchDecision::Block => println!("BLOCK {url} (rule #{})", result.rule_index.unwrap_or_default()),
        MatchDecision::Allow => println!("ALLOW {url}"),
    }
    if result.upgrade_https {
        println!("  upgrade to https");
    }
    for selector in &result.hidden_selectors {
        println!("  hide: {selector}");
    }

    Ok(())
}

fn cmd_update(config_path: Option<&Path>, force: bool) -> Result<(), String> {
    runtime()?.block_on(async {
        let config = match config_path {
            Some(path) => Config::load(path).await.map_err(|e| e.to_string())?,
            None => Config::default(),
        };
        info!("data directory: {}", config.data_dir.display());

        let transport = HttpTransport::new(
            std::time::Duration::from_secs(config.fetch_timeout_secs),
            std::time::Duration::from_secs(config.connect_timeout_secs),
        )
        .map_err(|e| e.to_string())?;
        let (blocker, task) = ContentBlocker::start(
            config,
            Dependencies {
                engine: Arc::new(InMemoryEngine::new()),
                shell: Arc::new(LoggingShell),
                transport: Arc::new(transport),
            },
        )
        .map_err(|e| e.to_string())?;

        let outcome = if force {
            blocker.update_filter_lists().await
        } else {
            blocker.initialize().await
        }
        .map_err(|e| e.to_string())?;

        println!("Generation {}:", outcome.generation);
        for artifact in &outcome.artifacts {
            println!(
                "  {} - {} rules (fingerprint {:016x})",
                artifact.identifier, artifact.rule_count, artifact.fingerprint
            );
        }
        if outcome.fallback {
            println!("  every shard failed, minimal rules compiled");
        }
        if outcome.dropped_rules > 0 {
            println!("  {} rules dropped over the shard limit", outcome.dropped_rules);
        }

        println!("Filter lists:");
        for list in blocker.filter_lists().await.map_err(|e| e.to_string())? {
            println!(
                "  [{}] {} {}{}",
                if list.is_enabled { "x" } else { " " },
                list.id,
                list.name,
                list.last_updated.map(|t| format!(" (updated {t})")).unwrap_or_default()
            );
        }

        blocker.shutdown().await.map_err(|e| e.to_string())?;
        task.await.map_err(|e| e.to_string())
    })
}
