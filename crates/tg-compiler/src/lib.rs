//! TabGuard Filter List Compiler
//!
//! This crate turns ABP-style filter lists into ordered trigger/action rule
//! collections and plans how they are split into host-engine artifacts.

pub mod builtin;
pub mod compiler;
pub mod optimizer;
pub mod parser;
pub mod shard;

pub use compiler::{CompileOptions, CompileReport, CompiledRules, ListText, RuleCompiler};
pub use optimizer::optimize_rules;
pub use parser::{parse_filter_list, parse_line, ParsedList};
pub use shard::{plan_shards, ShardPlan, DEFAULT_MAX_RULES_PER_SHARD, DEFAULT_MAX_SHARDS};
