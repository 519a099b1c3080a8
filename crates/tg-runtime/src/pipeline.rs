//! Fetch → parse → compile → shard → engine compile.
//!
//! Runs off the coordinator. Lists are fetched concurrently; a list that
//! cannot be fetched is skipped. Parsing and sharding run on the blocking
//! pool. When no shard compiles, the minimal rule set is compiled instead.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{error, info, warn};
use tg_compiler::{plan_shards, CompileOptions, CompileReport, ListText, RuleCompiler, ShardPlan};

use crate::artifact_store::{compile_minimal, compile_shards, lookup_existing};
use crate::error::Result;
use crate::filter_list::FilterList;
use crate::filter_source::FilterSource;
use crate::host::{CompiledArtifact, HostEngine};

/// Everything a pipeline run needs, captured on the coordinator.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub generation: u64,
    pub lists: Vec<FilterList>,
    pub excluded: BTreeSet<String>,
    pub force_refresh: bool,
    /// Identifiers installed by an earlier run, looked up before compiling
    pub reuse: Option<Vec<String>>,
    pub options: CompileOptions,
    pub namespace: String,
    pub max_rules_per_shard: usize,
    pub max_shards: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub generation: u64,
    pub artifacts: Vec<CompiledArtifact>,
    pub fallback: bool,
    pub reused: bool,
    pub dropped_rules: usize,
    pub report: Option<CompileReport>,
    /// Lists downloaded during this run, with their download time
    pub refreshed: Vec<(String, u64)>,
}

pub async fn run(input: PipelineInput, source: &FilterSource, engine: &dyn HostEngine) -> Result<PipelineOutput> {
    let generation = input.generation;

    if let Some(identifiers) = &input.reuse {
        if let Some(existing) = lookup_existing(engine, identifiers).await {
            info!("generation {}: reusing {} stored artifacts", generation, existing.len());
            return Ok(PipelineOutput {
                generation,
                artifacts: existing,
                fallback: false,
                reused: true,
                dropped_rules: 0,
                report: None,
                refreshed: Vec::new(),
            });
        }
    }

    let fetches = input.lists.iter().map(|list| source.load(list, input.force_refresh));
    let fetched = join_all(fetches).await;

    let mut texts = Vec::with_capacity(input.lists.len());
    let mut refreshed = Vec::new();
    for (list, result) in input.lists.iter().zip(fetched) {
        let text = match result {
            Ok(fetched) => {
                if !fetched.from_cache {
                    refreshed.push((list.id.clone(), fetched.timestamp));
                }
                Some(fetched.text)
            }
            Err(e) => {
                warn!("{e}");
                None
            }
        };
        texts.push(ListText {
            list_id: list.id.clone(),
            text,
        });
    }

    let PipelineInput {
        excluded,
        options,
        max_rules_per_shard,
        max_shards,
        ..
    } = input;
    let excluded = Arc::new(excluded);
    let planned = {
        let excluded = excluded.clone();
        tokio::task::spawn_blocking(move || {
            let compiled = RuleCompiler::new(options).compile(&texts, &excluded);
            let plan = plan_shards(&compiled.rules, max_rules_per_shard, max_shards);
            (compiled.report, plan)
        })
        .await
    };

    let (report, plan) = match planned {
        Ok((report, plan)) => (Some(report), plan),
        Err(e) => {
            error!("generation {generation}: rule compilation task failed: {e}");
            (None, ShardPlan::default())
        }
    };

    let mut artifacts = compile_shards(engine, &input.namespace, &plan.shards).await;
    let fallback = artifacts.is_empty();
    if fallback {
        warn!("generation {generation}: no shard compiled, falling back to minimal rules");
        artifacts = vec![compile_minimal(engine, &excluded).await?];
    }

    info!(
        "generation {}: {} artifacts, {} rules, {} dropped",
        generation,
        artifacts.len(),
        artifacts.iter().map(|a| a.rule_count).sum::<usize>(),
        plan.dropped_rules
    );

    Ok(PipelineOutput {
        generation,
        artifacts,
        fallback,
        reused: false,
        dropped_rules: plan.dropped_rules,
        report,
        refreshed,
    })
}
